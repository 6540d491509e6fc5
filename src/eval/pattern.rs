use std::collections::HashMap;

use regex::Regex;
use slog::{debug, o, Discard, Logger};

use crate::error::Error;

/// Compiled regex patterns, keyed by pattern text.
///
/// Lives for one evaluation pass so every distinct pattern is compiled once
/// no matter how many records are tested.
pub struct PatternCache {
    logger: Logger,
    compiled: HashMap<String, Regex>,
}

impl PatternCache {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.new(o!("component" => "pattern_cache")),
            compiled: HashMap::new(),
        }
    }

    pub fn get_or_compile(&mut self, pattern: &str) -> Result<&Regex, Error> {
        if !self.compiled.contains_key(pattern) {
            let regex = Regex::new(pattern).map_err(|source| {
                debug!(self.logger, "pattern failed to compile"; "pattern" => pattern, "error" => %source);
                Error::InvalidPattern {
                    pattern: pattern.to_owned(),
                    source,
                }
            })?;
            debug!(self.logger, "compiled pattern"; "pattern" => pattern);
            self.compiled.insert(pattern.to_owned(), regex);
        }
        Ok(&self.compiled[pattern])
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(&Logger::root(Discard, o!()))
    }
}
