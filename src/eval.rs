//! Evaluation of predicate trees against records.

pub mod pattern;
pub mod short_circuit;

use std::cmp::Ordering;

use slog::{debug, o, Logger};

use crate::error::Error;
use crate::node::{Comparison, Literal, Logical, Node};
use crate::predicate::Predicate;
use crate::record::{FieldValue, Record};

use self::pattern::PatternCache;

/// Tests records against one predicate.
///
/// An evaluator owns the regex cache for a single pass over many records, so
/// it is cheap to create one per worker over a shared `&Predicate`.
pub struct Evaluator<'p> {
    logger: Logger,
    root: &'p Node,
    patterns: PatternCache,
}

impl<'p> Evaluator<'p> {
    pub fn new(logger: &Logger, predicate: &'p Predicate) -> Self {
        let logger = logger.new(o!("predicate" => predicate.to_string()));
        let patterns = PatternCache::new(&logger);
        Self {
            logger,
            root: predicate.root(),
            patterns,
        }
    }

    /// Whether `record` satisfies the predicate. Errors abort this record
    /// only; the evaluator stays usable for the next one.
    pub fn eval<R: Record + ?Sized>(&mut self, record: &R) -> Result<bool, Error> {
        let result = truth(self.root, record, &mut self.patterns, "Predicate");
        if let Err(err) = &result {
            debug!(self.logger, "evaluation failed"; "error" => %err);
        }
        result
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }
}

/// Evaluate a node that must produce a boolean. `context` names the
/// operator expecting it, for error messages.
pub(crate) fn truth<R: Record + ?Sized>(
    node: &Node,
    record: &R,
    patterns: &mut PatternCache,
    context: &'static str,
) -> Result<bool, Error> {
    match node {
        Node::Logical { op, left, right } => {
            let context = op.as_str_name();
            match (op, truth(left, record, patterns, context)?) {
                (Logical::And, false) => Ok(false),
                (Logical::Or, true) => Ok(true),
                _ => truth(right, record, patterns, context),
            }
        }
        Node::Comparison { op, left, right } => {
            let lhs = operand(left, record, patterns)?;
            let rhs = operand(right, record, patterns)?;
            compare(*op, lhs, rhs, patterns)
        }
        Node::Paren(child) => truth(child, record, patterns, context),
        Node::Literal(Literal::Boolean(b)) => Ok(*b),
        other => Err(Error::TypeMismatch {
            operator: context,
            expected: "a boolean expression",
            found: other.describe().to_owned(),
        }),
    }
}

fn operand<'a, R: Record + ?Sized>(
    node: &'a Node,
    record: &'a R,
    patterns: &mut PatternCache,
) -> Result<Operand<'a>, Error> {
    let value = match node {
        Node::TagRef(name) => record.tag(name).map_or(Operand::Missing, Operand::String),
        Node::FieldRef(name) => record.field(name).map_or(Operand::Missing, Operand::from),
        Node::Literal(literal) => Operand::from(literal),
        Node::Paren(child) => operand(child, record, patterns)?,
        Node::Logical { op, .. } => {
            Operand::Boolean(truth(node, record, patterns, op.as_str_name())?)
        }
        Node::Comparison { op, .. } => {
            Operand::Boolean(truth(node, record, patterns, op.as_str_name())?)
        }
    };
    Ok(value)
}

/// A resolved comparison operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Operand<'a> {
    /// reference to a tag or field the record does not have
    Missing,
    String(&'a str),
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Pattern(&'a str),
}

impl<'a> Operand<'a> {
    fn type_name(&self) -> &'static str {
        match self {
            Operand::Missing => "missing value",
            Operand::String(_) => "string",
            Operand::Boolean(_) => "boolean",
            Operand::Integer(_) => "integer",
            Operand::Unsigned(_) => "unsigned",
            Operand::Float(_) => "float",
            Operand::Pattern(_) => "regex",
        }
    }

    fn number(&self) -> Option<Number> {
        match *self {
            Operand::Integer(i) => Some(Number::Integer(i)),
            Operand::Unsigned(u) => Some(Number::Unsigned(u)),
            Operand::Float(x) => Some(Number::Float(x)),
            _ => None,
        }
    }
}

impl<'a> From<FieldValue<'a>> for Operand<'a> {
    fn from(value: FieldValue<'a>) -> Self {
        match value {
            FieldValue::String(s) => Operand::String(s),
            FieldValue::Boolean(b) => Operand::Boolean(b),
            FieldValue::Integer(i) => Operand::Integer(i),
            FieldValue::Unsigned(u) => Operand::Unsigned(u),
            FieldValue::Float(x) => Operand::Float(x),
        }
    }
}

impl<'a> From<&'a Literal> for Operand<'a> {
    fn from(literal: &'a Literal) -> Self {
        match literal {
            Literal::String(s) => Operand::String(s),
            Literal::Boolean(b) => Operand::Boolean(*b),
            Literal::Integer(i) => Operand::Integer(*i),
            Literal::Unsigned(u) => Operand::Unsigned(*u),
            Literal::Float(x) => Operand::Float(*x),
            Literal::Regex(p) => Operand::Pattern(p),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Unsigned(u) => u as f64,
            Number::Float(x) => x,
        }
    }
}

/// Order two numbers across representations. Negative signed values sort
/// below every unsigned value; anything involving a float compares as `f64`,
/// and NaN is unordered.
fn compare_numbers(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(&b)),
        (Number::Unsigned(a), Number::Unsigned(b)) => Some(a.cmp(&b)),
        (Number::Integer(a), Number::Unsigned(b)) => match u64::try_from(a) {
            Ok(a) => Some(a.cmp(&b)),
            Err(_) => Some(Ordering::Less),
        },
        (Number::Unsigned(a), Number::Integer(b)) => {
            compare_numbers(Number::Integer(b), Number::Unsigned(a)).map(Ordering::reverse)
        }
        (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

pub(crate) fn compare(
    op: Comparison,
    lhs: Operand<'_>,
    rhs: Operand<'_>,
    patterns: &mut PatternCache,
) -> Result<bool, Error> {
    if lhs == Operand::Missing || rhs == Operand::Missing {
        return Ok(op == Comparison::NotEqual);
    }

    match op {
        Comparison::Equal | Comparison::NotEqual => {
            let equal = match (lhs, rhs) {
                (Operand::String(a), Operand::String(b)) => a == b,
                (Operand::Boolean(a), Operand::Boolean(b)) => a == b,
                _ => ordered(op, lhs, rhs)? == Some(Ordering::Equal),
            };
            Ok(equal == (op == Comparison::Equal))
        }
        Comparison::StartsWith => match (lhs, rhs) {
            (Operand::String(s), Operand::String(prefix)) => Ok(s.starts_with(prefix)),
            _ => Err(mismatch(op, lhs, rhs)),
        },
        Comparison::Regex | Comparison::NotRegex => match (lhs, rhs) {
            (Operand::String(s), Operand::Pattern(pattern)) => {
                let matched = patterns.get_or_compile(pattern)?.is_match(s);
                Ok(matched == (op == Comparison::Regex))
            }
            _ => Err(mismatch(op, lhs, rhs)),
        },
        Comparison::Less => Ok(ordered(op, lhs, rhs)?.is_some_and(Ordering::is_lt)),
        Comparison::LessEqual => Ok(ordered(op, lhs, rhs)?.is_some_and(Ordering::is_le)),
        Comparison::Greater => Ok(ordered(op, lhs, rhs)?.is_some_and(Ordering::is_gt)),
        Comparison::GreaterEqual => Ok(ordered(op, lhs, rhs)?.is_some_and(Ordering::is_ge)),
    }
}

fn ordered(op: Comparison, lhs: Operand<'_>, rhs: Operand<'_>) -> Result<Option<Ordering>, Error> {
    match (lhs.number(), rhs.number()) {
        (Some(a), Some(b)) => Ok(compare_numbers(a, b)),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

fn mismatch(op: Comparison, lhs: Operand<'_>, rhs: Operand<'_>) -> Error {
    Error::TypeMismatch {
        operator: op.as_str_name(),
        expected: op.expects(),
        found: format!("{} and {}", lhs.type_name(), rhs.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(op: Comparison, lhs: Operand<'_>, rhs: Operand<'_>) -> Result<bool, Error> {
        compare(op, lhs, rhs, &mut PatternCache::default())
    }

    #[test]
    fn test_missing_is_only_not_equal() {
        for op in [
            Comparison::Equal,
            Comparison::StartsWith,
            Comparison::Regex,
            Comparison::NotRegex,
            Comparison::Less,
            Comparison::GreaterEqual,
        ] {
            assert!(!cmp(op, Operand::Missing, Operand::String("a")).unwrap(), "{op}");
        }
        assert!(cmp(Comparison::NotEqual, Operand::Missing, Operand::String("a")).unwrap());
    }

    #[test]
    fn test_mixed_sign_ordering() {
        assert_eq!(
            compare_numbers(Number::Integer(-1), Number::Unsigned(0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_numbers(Number::Unsigned(u64::MAX), Number::Integer(i64::MAX)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_numbers(Number::Integer(5), Number::Unsigned(5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_numbers(Number::Float(0.5), Number::Integer(1)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_nan_is_unordered() {
        let nan = Operand::Float(f64::NAN);
        assert!(!cmp(Comparison::Equal, nan, nan).unwrap());
        assert!(cmp(Comparison::NotEqual, nan, Operand::Integer(1)).unwrap());
        assert!(!cmp(Comparison::Less, nan, Operand::Integer(1)).unwrap());
        assert!(!cmp(Comparison::GreaterEqual, Operand::Float(1.0), nan).unwrap());
    }

    #[test]
    fn test_equality_needs_same_family() {
        assert!(cmp(Comparison::Equal, Operand::Integer(3), Operand::Float(3.0)).unwrap());
        assert!(cmp(Comparison::NotEqual, Operand::Boolean(true), Operand::Boolean(false)).unwrap());

        let err = cmp(Comparison::Equal, Operand::String("3"), Operand::Integer(3)).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch { operator: "ComparisonEqual", ref found, .. } if found == "string and integer"
        ));
    }

    #[test]
    fn test_string_operators() {
        assert!(cmp(Comparison::StartsWith, Operand::String("/api/v1"), Operand::String("/api")).unwrap());
        assert!(cmp(Comparison::StartsWith, Operand::Integer(1), Operand::String("1")).is_err());
        assert!(cmp(Comparison::Regex, Operand::String("/api/v1"), Operand::Pattern("^/api/")).unwrap());
        assert!(cmp(Comparison::NotRegex, Operand::String("/web/"), Operand::Pattern("^/api/")).unwrap());
        // a string literal is not a pattern
        assert!(cmp(Comparison::Regex, Operand::String("/api"), Operand::String("/api")).is_err());
    }
}
