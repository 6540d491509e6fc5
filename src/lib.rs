//! Predicate expression trees for filtering time-series records.
//!
//! A query planner builds a [`Predicate`] out of [`Node`]s, encodes it with the
//! protobuf wire format in [`codec`], and a storage reader decodes it and tests
//! each candidate [`Record`] with an [`Evaluator`].

pub mod codec;
mod error;
pub mod eval;
pub mod node;
mod predicate;
#[cfg(test)]
mod proptest_generators;
pub mod record;

pub use codec::{DecodeOptions, DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};
pub use error::{Error, Malformed, Side};
pub use eval::pattern::PatternCache;
pub use eval::short_circuit::ShortCircuit;
pub use eval::Evaluator;
pub use node::{Comparison, Literal, Logical, Node, NodeType};
pub use predicate::Predicate;
pub use record::{Field, FieldValue, Record, Row};
