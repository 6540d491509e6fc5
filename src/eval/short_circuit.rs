use std::fmt::Display;

use recursion::CollapsibleExt;

use crate::eval::pattern::PatternCache;
use crate::eval::{compare, Operand};
use crate::node::frame::NodeFrame;
use crate::node::{Literal, Logical, Node};
use crate::record::Record;

/// Outcome of evaluating a tree with only part of a record available
#[derive(Debug, Clone, PartialEq)]
pub enum ShortCircuit<X> {
    Known(bool),
    Unknown(X),
}

impl<X: Display> Display for ShortCircuit<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShortCircuit::Known(x) => write!(f, "known: {}", x),
            ShortCircuit::Unknown(x) => write!(f, "unknown: {}", x),
        }
    }
}

impl<X> ShortCircuit<X> {
    pub fn map<Y>(self, f: impl FnOnce(X) -> Y) -> ShortCircuit<Y> {
        match self {
            ShortCircuit::Known(b) => ShortCircuit::Known(b),
            ShortCircuit::Unknown(x) => ShortCircuit::Unknown(f(x)),
        }
    }
}

/// one collapsed layer during reduction
enum Partial<'a> {
    Known(bool),
    /// a leaf of the input tree that did not settle on its own
    Leaf(&'a Node),
    Residual(Node),
}

impl<'a> Partial<'a> {
    fn into_node(self) -> Node {
        match self {
            Partial::Known(b) => Node::literal(b),
            Partial::Leaf(leaf) => leaf.clone(),
            Partial::Residual(node) => node,
        }
    }

    /// the operand value, if it can be known without reading fields
    fn settle<'r, R: Record + ?Sized>(&'r self, record: &'r R) -> Option<Operand<'r>> {
        match self {
            Partial::Known(b) => Some(Operand::Boolean(*b)),
            Partial::Leaf(Node::TagRef(name)) => {
                Some(record.tag(name).map_or(Operand::Missing, Operand::String))
            }
            Partial::Leaf(Node::Literal(literal)) => Some(Operand::from(literal)),
            Partial::Leaf(_) | Partial::Residual(_) => None,
        }
    }
}

impl Node {
    /// Evaluate every comparison that reads only tags, then fold the logical
    /// operators around the results.
    ///
    /// Comparisons that reference fields, or whose evaluation fails, are kept
    /// as they are so a later full evaluation reaches the same outcome,
    /// errors included. A settled right operand never discards an unsettled
    /// left one, because the left side is evaluated first.
    pub fn reduce_with_tags<'a, R: Record + ?Sized>(
        &'a self,
        record: &R,
        patterns: &mut PatternCache,
    ) -> ShortCircuit<Node> {
        let reduced = self.collapse_frames(|frame: NodeFrame<Partial<'a>, &'a Node>| match frame {
            NodeFrame::Leaf(Node::Literal(Literal::Boolean(b))) => Partial::Known(*b),
            NodeFrame::Leaf(leaf) => Partial::Leaf(leaf),
            NodeFrame::Paren(Partial::Known(b)) => Partial::Known(b),
            NodeFrame::Paren(child) => Partial::Residual(Node::paren(child.into_node())),
            NodeFrame::Comparison(op, left, right) => {
                let settled = match (left.settle(record), right.settle(record)) {
                    (Some(lhs), Some(rhs)) => compare(op, lhs, rhs, patterns).ok(),
                    _ => None,
                };
                match settled {
                    Some(b) => Partial::Known(b),
                    None => Partial::Residual(Node::Comparison {
                        op,
                        left: Box::new(left.into_node()),
                        right: Box::new(right.into_node()),
                    }),
                }
            }
            NodeFrame::Logical(op, left, right) => {
                use Partial::Known;
                // the left side runs first in a full evaluation and may fail,
                // so a settled right side only absorbs a settled left side
                match (op, left, right) {
                    (Logical::And, Known(false), _) => Known(false),
                    (Logical::And, Known(true), x) => x,
                    (Logical::And, x, Known(true)) => x,
                    (Logical::Or, Known(true), _) => Known(true),
                    (Logical::Or, Known(false), x) => x,
                    (Logical::Or, x, Known(false)) => x,
                    (op, a, b) => Partial::Residual(Node::logical(op, a.into_node(), b.into_node())),
                }
            }
        });

        match reduced {
            Partial::Known(b) => ShortCircuit::Known(b),
            Partial::Leaf(leaf) => ShortCircuit::Unknown(leaf.clone()),
            Partial::Residual(node) => ShortCircuit::Unknown(node),
        }
    }
}
