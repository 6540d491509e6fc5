use std::collections::BTreeSet;
use std::fmt::{self, Display};

use prost::bytes::BufMut;
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::codec::{self, DecodeOptions};
use crate::error::{Error, Side};
use crate::eval::pattern::PatternCache;
use crate::eval::short_circuit::ShortCircuit;
use crate::eval::truth;
use crate::node::Node;
use crate::record::Record;

/// A complete filter: the unit that is encoded, shipped to a storage reader
/// and evaluated there.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Predicate {
    root: Node,
}

impl Predicate {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    /// Check that the root produces a boolean and every operand is legal.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.root.is_boolean() {
            return Err(Error::InvalidOperand {
                operator: "Predicate",
                side: Side::Root,
                operand: self.root.describe(),
            });
        }
        self.root.validate()
    }

    /// One-off evaluation. Use an [`Evaluator`](crate::Evaluator) to test
    /// many records so regex patterns are compiled once.
    pub fn matches<R: Record + ?Sized>(&self, record: &R) -> Result<bool, Error> {
        truth(&self.root, record, &mut PatternCache::default(), "Predicate")
    }

    /// Tag keys referenced anywhere in the tree
    pub fn tag_keys(&self) -> BTreeSet<&str> {
        self.root
            .visit()
            .filter_map(|node| match node {
                Node::TagRef(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Field keys referenced anywhere in the tree
    pub fn field_keys(&self) -> BTreeSet<&str> {
        self.root
            .visit()
            .filter_map(|node| match node {
                Node::FieldRef(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reduce_with_tags<R: Record + ?Sized>(
        &self,
        record: &R,
        patterns: &mut PatternCache,
    ) -> ShortCircuit<Predicate> {
        self.root
            .reduce_with_tags(record, patterns)
            .map(Predicate::new)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        codec::encode_predicate(self, buf)
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Self::decode_with(bytes, &DecodeOptions::default())
    }

    pub fn decode_with(bytes: &[u8], options: &DecodeOptions) -> Result<Self, Error> {
        codec::decode_predicate(bytes, options)
    }
}

impl From<Node> for Predicate {
    fn from(root: Node) -> Self {
        Self::new(root)
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
