use std::fmt;

use miette::Diagnostic;
use prost::encoding::WireType;
use thiserror::Error;

use crate::node::NodeType;

/// Errors raised while building, decoding or evaluating a predicate
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// An operand that the operator can never accept, caught when the tree is built.
    #[error("{side} operand of {operator} cannot be a {operand}")]
    #[diagnostic(code(predicate::invalid_operand))]
    InvalidOperand {
        operator: &'static str,
        side: Side,
        operand: &'static str,
    },

    /// The encoded payload does not describe a well-formed tree.
    #[error("malformed predicate: {0}")]
    #[diagnostic(code(predicate::malformed))]
    MalformedPredicate(#[from] Malformed),

    /// Operand values the operator cannot compare, caught during evaluation.
    #[error("{operator} expects {expected}, found {found}")]
    #[diagnostic(code(predicate::type_mismatch))]
    TypeMismatch {
        operator: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("predicate nesting exceeds the maximum depth of {limit}")]
    #[diagnostic(
        code(predicate::recursion_limit),
        help("decode with a larger max_depth if trees this deep are expected")
    )]
    RecursionLimitExceeded { limit: usize },

    #[error("invalid regex pattern {pattern:?}")]
    #[diagnostic(code(predicate::invalid_pattern))]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Which operand of an operator an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    /// the top of a predicate, which must itself be a boolean expression
    Root,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
            Side::Root => write!(f, "root"),
        }
    }
}

/// Reasons a wire payload is rejected by the decoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformed {
    #[error("invalid field key: {0}")]
    InvalidKey(String),

    #[error("field {tag} has wire type {found:?}, expected {expected:?}")]
    WrongWireType {
        tag: u32,
        found: WireType,
        expected: WireType,
    },

    #[error("field {tag} holds an invalid varint")]
    InvalidVarint { tag: u32 },

    #[error("field {tag} runs past the end of the input")]
    Truncated { tag: u32 },

    #[error("field {tag} is not valid UTF-8")]
    InvalidUtf8 { tag: u32 },

    #[error("unknown field {tag} cannot be skipped: {reason}")]
    UnknownField { tag: u32, reason: String },

    #[error("unknown {enumeration} value {value}")]
    UnknownEnum {
        enumeration: &'static str,
        value: i32,
    },

    #[error("node sets both {first} and {second}")]
    ConflictingValues {
        first: &'static str,
        second: &'static str,
    },

    #[error("{node_type} node has no value")]
    MissingValue { node_type: NodeType },

    #[error("node declared as {declared} carries a {actual} value")]
    NodeTypeMismatch { declared: NodeType, actual: NodeType },

    #[error("{node_type} expects {expected} children, found {found}")]
    Arity {
        node_type: NodeType,
        expected: usize,
        found: usize,
    },

    #[error("predicate has no root node")]
    MissingRoot,

    #[error("predicate sets its root more than once")]
    DuplicateRoot,
}
