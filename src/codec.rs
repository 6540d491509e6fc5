//! Protobuf wire encoding of predicate trees.
//!
//! The byte layout is that of the `Node` / `Predicate` protobuf messages, so
//! any protobuf implementation of the same schema produces and accepts the
//! same bytes. Fields are written in field-number order: `node_type`
//! (omitted when zero), then `children`, then the single value field.
//!
//! Decoding is stricter than a generic protobuf parser: a node may carry at
//! most one value field, enum values must be known, the declared node type
//! must agree with the value, and every node must have the child count its
//! kind requires. Unknown fields, groups included, are skipped. Both
//! directions walk the tree with an explicit stack, and decoding stops at a
//! configurable depth that never exceeds [`MAX_DEPTH_LIMIT`].

use prost::bytes::{Buf, BufMut};
use prost::encoding::{
    decode_key, decode_varint, encode_key, encode_varint, skip_field, DecodeContext, WireType,
};
use recursion::{CollapsibleExt, Expandable, PartiallyApplied};

use crate::error::{Error, Malformed};
use crate::node::frame::NodeFrame;
use crate::node::{Comparison, Literal, Logical, Node, NodeType};
use crate::predicate::Predicate;

pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Hard ceiling on `max_depth`. Evaluation, `Display`, `Clone` and `Drop`
/// recurse once per level, and trees up to this depth fit in a 2 MiB thread
/// stack.
pub const MAX_DEPTH_LIMIT: usize = 1000;

/// Decoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// deepest node accepted, counting the root as depth 1. Values above
    /// [`MAX_DEPTH_LIMIT`] are treated as the limit.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DecodeOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.min(MAX_DEPTH_LIMIT);
        self
    }

    /// the depth limit actually enforced
    pub fn limit(&self) -> usize {
        self.max_depth.min(MAX_DEPTH_LIMIT)
    }
}

/// field numbers of the `Node` and `Predicate` messages
mod field {
    pub const NODE_TYPE: u32 = 1;
    pub const CHILDREN: u32 = 2;
    pub const STRING_VALUE: u32 = 3;
    pub const BOOLEAN_VALUE: u32 = 4;
    pub const INTEGER_VALUE: u32 = 5;
    pub const UNSIGNED_VALUE: u32 = 6;
    pub const FLOAT_VALUE: u32 = 7;
    pub const REGEX_VALUE: u32 = 8;
    pub const TAG_REF_VALUE: u32 = 9;
    pub const FIELD_REF_VALUE: u32 = 10;
    pub const LOGICAL: u32 = 11;
    pub const COMPARISON: u32 = 12;

    pub const ROOT: u32 = 1;

    pub fn value_name(tag: u32) -> &'static str {
        match tag {
            STRING_VALUE => "StringValue",
            BOOLEAN_VALUE => "BooleanValue",
            INTEGER_VALUE => "IntegerValue",
            UNSIGNED_VALUE => "UnsignedValue",
            FLOAT_VALUE => "FloatValue",
            REGEX_VALUE => "RegexValue",
            TAG_REF_VALUE => "TagRefValue",
            FIELD_REF_VALUE => "FieldRefValue",
            LOGICAL => "logical",
            COMPARISON => "comparison",
            _ => "unknown",
        }
    }
}

/// Append the `Node` message for `node` to `buf`
pub fn encode_node(node: &Node, buf: &mut impl BufMut) {
    buf.put_slice(&node_bytes(node));
}

/// Append the `Predicate` message for `predicate` to `buf`
pub fn encode_predicate(predicate: &Predicate, buf: &mut impl BufMut) {
    put_bytes(field::ROOT, &node_bytes(predicate.root()), buf);
}

pub fn decode_node(bytes: &[u8], options: &DecodeOptions) -> Result<Node, Error> {
    recursion::try_expand_and_collapse::<NodeFrame<PartiallyApplied, Node>, _, _, _>(
        Pending { bytes, depth: 1 },
        |pending| expand(pending, options),
        |frame| Ok(Node::from_frame(frame)),
    )
}

pub fn decode_predicate(mut bytes: &[u8], options: &DecodeOptions) -> Result<Predicate, Error> {
    let buf = &mut bytes;
    let mut root = None;

    while buf.has_remaining() {
        let (tag, wire_type) = read_key(buf)?;
        match tag {
            field::ROOT => {
                let body = read_bytes(tag, wire_type, buf)?;
                if root.replace(body).is_some() {
                    return Err(Malformed::DuplicateRoot.into());
                }
            }
            _ => skip(tag, wire_type, buf)?,
        }
    }

    let root = root.ok_or(Malformed::MissingRoot)?;
    Ok(Predicate::new(decode_node(root, options)?))
}

fn node_bytes(node: &Node) -> Vec<u8> {
    node.collapse_frames(encode_layer)
}

/// encode one node given the already-encoded bytes of its children
fn encode_layer(frame: NodeFrame<Vec<u8>, &Node>) -> Vec<u8> {
    let mut buf = Vec::new();
    match frame {
        NodeFrame::Logical(op, left, right) => {
            put_children(NodeType::LogicalExpression, &[left, right], &mut buf);
            put_varint(field::LOGICAL, op as i32 as u64, &mut buf);
        }
        NodeFrame::Comparison(op, left, right) => {
            put_children(NodeType::ComparisonExpression, &[left, right], &mut buf);
            put_varint(field::COMPARISON, op as i32 as u64, &mut buf);
        }
        NodeFrame::Paren(child) => {
            put_children(NodeType::ParenExpression, &[child], &mut buf);
        }
        NodeFrame::Leaf(leaf) => put_leaf(leaf, &mut buf),
    }
    buf
}

fn put_children(node_type: NodeType, children: &[Vec<u8>], buf: &mut Vec<u8>) {
    put_node_type(node_type, buf);
    for child in children {
        put_bytes(field::CHILDREN, child, buf);
    }
}

fn put_leaf(leaf: &Node, buf: &mut Vec<u8>) {
    put_node_type(leaf.node_type(), buf);
    match leaf {
        Node::TagRef(name) => put_bytes(field::TAG_REF_VALUE, name.as_bytes(), buf),
        Node::FieldRef(name) => put_bytes(field::FIELD_REF_VALUE, name.as_bytes(), buf),
        Node::Literal(Literal::String(s)) => put_bytes(field::STRING_VALUE, s.as_bytes(), buf),
        Node::Literal(Literal::Boolean(b)) => put_varint(field::BOOLEAN_VALUE, u64::from(*b), buf),
        Node::Literal(Literal::Integer(i)) => put_varint(field::INTEGER_VALUE, *i as u64, buf),
        Node::Literal(Literal::Unsigned(u)) => put_varint(field::UNSIGNED_VALUE, *u, buf),
        Node::Literal(Literal::Float(x)) => {
            encode_key(field::FLOAT_VALUE, WireType::SixtyFourBit, buf);
            buf.put_f64_le(*x);
        }
        Node::Literal(Literal::Regex(p)) => put_bytes(field::REGEX_VALUE, p.as_bytes(), buf),
        Node::Logical { .. } | Node::Comparison { .. } | Node::Paren(_) => {
            unreachable!("only leaf nodes are carried in NodeFrame::Leaf")
        }
    }
}

fn put_node_type(node_type: NodeType, buf: &mut Vec<u8>) {
    // proto3 scalars are omitted at their default value
    if node_type != NodeType::LogicalExpression {
        put_varint(field::NODE_TYPE, node_type as i32 as u64, buf);
    }
}

fn put_varint(tag: u32, value: u64, buf: &mut impl BufMut) {
    encode_key(tag, WireType::Varint, buf);
    encode_varint(value, buf);
}

fn put_bytes(tag: u32, bytes: &[u8], buf: &mut impl BufMut) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

/// an encoded node waiting to be expanded
struct Pending<'a> {
    bytes: &'a [u8],
    depth: usize,
}

/// the value field of a node, after enum validation
enum WireValue {
    Leaf(Node),
    Logical(Logical),
    Comparison(Comparison),
}

impl WireValue {
    fn node_type(&self) -> NodeType {
        match self {
            WireValue::Leaf(leaf) => leaf.node_type(),
            WireValue::Logical(_) => NodeType::LogicalExpression,
            WireValue::Comparison(_) => NodeType::ComparisonExpression,
        }
    }
}

/// one `Node` message with its children still encoded
struct RawNode<'a> {
    node_type: NodeType,
    children: Vec<&'a [u8]>,
    value: Option<(u32, WireValue)>,
}

impl<'a> RawNode<'a> {
    fn parse(mut bytes: &'a [u8]) -> Result<Self, Malformed> {
        let buf = &mut bytes;
        let mut raw = RawNode {
            node_type: NodeType::LogicalExpression,
            children: Vec::new(),
            value: None,
        };

        while buf.has_remaining() {
            let (tag, wire_type) = read_key(buf)?;
            let value = match tag {
                field::NODE_TYPE => {
                    let value = read_varint(tag, wire_type, buf)?;
                    raw.node_type = NodeType::try_from(value as i32)?;
                    continue;
                }
                field::CHILDREN => {
                    raw.children.push(read_bytes(tag, wire_type, buf)?);
                    continue;
                }
                field::STRING_VALUE => {
                    WireValue::Leaf(Node::literal(read_string(tag, wire_type, buf)?))
                }
                field::BOOLEAN_VALUE => {
                    WireValue::Leaf(Node::literal(read_varint(tag, wire_type, buf)? != 0))
                }
                field::INTEGER_VALUE => {
                    WireValue::Leaf(Node::literal(read_varint(tag, wire_type, buf)? as i64))
                }
                field::UNSIGNED_VALUE => {
                    WireValue::Leaf(Node::literal(read_varint(tag, wire_type, buf)?))
                }
                field::FLOAT_VALUE => WireValue::Leaf(Node::literal(read_f64(tag, wire_type, buf)?)),
                field::REGEX_VALUE => WireValue::Leaf(Node::regex(read_string(tag, wire_type, buf)?)),
                field::TAG_REF_VALUE => {
                    WireValue::Leaf(Node::tag_ref(read_string(tag, wire_type, buf)?))
                }
                field::FIELD_REF_VALUE => {
                    WireValue::Leaf(Node::field_ref(read_string(tag, wire_type, buf)?))
                }
                field::LOGICAL => {
                    let value = read_varint(tag, wire_type, buf)?;
                    WireValue::Logical(Logical::try_from(value as i32)?)
                }
                field::COMPARISON => {
                    let value = read_varint(tag, wire_type, buf)?;
                    WireValue::Comparison(Comparison::try_from(value as i32)?)
                }
                _ => {
                    skip(tag, wire_type, buf)?;
                    continue;
                }
            };

            if let Some((first, _)) = &raw.value {
                return Err(Malformed::ConflictingValues {
                    first: field::value_name(*first),
                    second: field::value_name(tag),
                });
            }
            raw.value = Some((tag, value));
        }

        Ok(raw)
    }
}

fn expand<'a>(
    pending: Pending<'a>,
    options: &DecodeOptions,
) -> Result<NodeFrame<Pending<'a>, Node>, Error> {
    let limit = options.limit();
    if pending.depth > limit {
        return Err(Error::RecursionLimitExceeded { limit });
    }

    let raw = RawNode::parse(pending.bytes)?;
    let depth = pending.depth + 1;
    let child = |bytes: &'a [u8]| Pending { bytes, depth };

    let declared = raw.node_type;
    let value = raw.value.map(|(_, value)| value);
    let actual = value
        .as_ref()
        .map_or(NodeType::ParenExpression, WireValue::node_type);
    if declared != actual {
        let reason = match value {
            None => Malformed::MissingValue { node_type: declared },
            Some(_) => Malformed::NodeTypeMismatch { declared, actual },
        };
        return Err(reason.into());
    }

    let frame = match value {
        None => {
            let [inner] = arity::<1, _>(actual, raw.children)?;
            NodeFrame::Paren(child(inner))
        }
        Some(WireValue::Logical(op)) => {
            let [left, right] = arity::<2, _>(actual, raw.children)?;
            NodeFrame::Logical(op, child(left), child(right))
        }
        Some(WireValue::Comparison(op)) => {
            let [left, right] = arity::<2, _>(actual, raw.children)?;
            NodeFrame::Comparison(op, child(left), child(right))
        }
        Some(WireValue::Leaf(leaf)) => {
            let [] = arity::<0, _>(actual, raw.children)?;
            NodeFrame::Leaf(leaf)
        }
    };
    Ok(frame)
}

fn arity<const N: usize, T>(node_type: NodeType, children: Vec<T>) -> Result<[T; N], Malformed> {
    let found = children.len();
    <[T; N]>::try_from(children).map_err(|_| Malformed::Arity {
        node_type,
        expected: N,
        found,
    })
}

fn read_key(buf: &mut &[u8]) -> Result<(u32, WireType), Malformed> {
    decode_key(buf).map_err(|err| Malformed::InvalidKey(err.to_string()))
}

fn expect_wire_type(tag: u32, found: WireType, expected: WireType) -> Result<(), Malformed> {
    if found == expected {
        Ok(())
    } else {
        Err(Malformed::WrongWireType {
            tag,
            found,
            expected,
        })
    }
}

fn read_varint(tag: u32, wire_type: WireType, buf: &mut &[u8]) -> Result<u64, Malformed> {
    expect_wire_type(tag, wire_type, WireType::Varint)?;
    decode_varint(buf).map_err(|_| Malformed::InvalidVarint { tag })
}

fn read_f64(tag: u32, wire_type: WireType, buf: &mut &[u8]) -> Result<f64, Malformed> {
    expect_wire_type(tag, wire_type, WireType::SixtyFourBit)?;
    if buf.remaining() < 8 {
        return Err(Malformed::Truncated { tag });
    }
    Ok(buf.get_f64_le())
}

fn read_bytes<'a>(tag: u32, wire_type: WireType, buf: &mut &'a [u8]) -> Result<&'a [u8], Malformed> {
    expect_wire_type(tag, wire_type, WireType::LengthDelimited)?;
    take_length_delimited(tag, buf)
}

fn read_string(tag: u32, wire_type: WireType, buf: &mut &[u8]) -> Result<String, Malformed> {
    let bytes = read_bytes(tag, wire_type, buf)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| Malformed::InvalidUtf8 { tag })
}

fn take_length_delimited<'a>(tag: u32, buf: &mut &'a [u8]) -> Result<&'a [u8], Malformed> {
    let len = decode_varint(buf).map_err(|_| Malformed::InvalidVarint { tag })?;
    let len = usize::try_from(len).map_err(|_| Malformed::Truncated { tag })?;
    if len > buf.len() {
        return Err(Malformed::Truncated { tag });
    }
    let (body, rest) = buf.split_at(len);
    *buf = rest;
    Ok(body)
}

/// skip a field this decoder does not know about
fn skip(tag: u32, wire_type: WireType, buf: &mut &[u8]) -> Result<(), Malformed> {
    skip_field(wire_type, tag, buf, DecodeContext::default()).map_err(|err| {
        Malformed::UnknownField {
            tag,
            reason: err.to_string(),
        }
    })
}
