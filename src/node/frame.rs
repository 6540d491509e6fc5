use recursion::{Collapsible, Expandable, MappableFrame, PartiallyApplied};

use super::{Comparison, Logical, Node};

/// short-lived single layer of a predicate tree, used for expressing
/// stack-safe recursive algorithms (encoding, decoding, reduction) over one
/// layer at a time. Leaf nodes are carried through untouched as `L`.
pub enum NodeFrame<X, L> {
    Logical(Logical, X, X),
    Comparison(Comparison, X, X),
    Paren(X),
    Leaf(L),
}

impl<L> MappableFrame for NodeFrame<PartiallyApplied, L> {
    type Frame<X> = NodeFrame<X, L>;

    fn map_frame<A, B>(input: Self::Frame<A>, mut f: impl FnMut(A) -> B) -> Self::Frame<B> {
        match input {
            NodeFrame::Logical(op, left, right) => {
                let left = f(left);
                NodeFrame::Logical(op, left, f(right))
            }
            NodeFrame::Comparison(op, left, right) => {
                let left = f(left);
                NodeFrame::Comparison(op, left, f(right))
            }
            NodeFrame::Paren(child) => NodeFrame::Paren(f(child)),
            NodeFrame::Leaf(leaf) => NodeFrame::Leaf(leaf),
        }
    }
}

impl<'a> Collapsible for &'a Node {
    type FrameToken = NodeFrame<PartiallyApplied, &'a Node>;

    fn into_frame(self) -> NodeFrame<Self, &'a Node> {
        match self {
            Node::Logical { op, left, right } => NodeFrame::Logical(*op, left.as_ref(), right.as_ref()),
            Node::Comparison { op, left, right } => {
                NodeFrame::Comparison(*op, left.as_ref(), right.as_ref())
            }
            Node::Paren(child) => NodeFrame::Paren(child.as_ref()),
            leaf @ (Node::TagRef(_) | Node::FieldRef(_) | Node::Literal(_)) => NodeFrame::Leaf(leaf),
        }
    }
}

impl Expandable for Node {
    type FrameToken = NodeFrame<PartiallyApplied, Node>;

    fn from_frame(val: NodeFrame<Self, Node>) -> Self {
        match val {
            NodeFrame::Logical(op, left, right) => Node::logical(op, left, right),
            NodeFrame::Comparison(op, left, right) => Node::Comparison {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            NodeFrame::Paren(child) => Node::paren(child),
            NodeFrame::Leaf(leaf) => leaf,
        }
    }
}
