pub mod frame;
pub mod visit;

use std::fmt::{self, Display};

use recursion::CollapsibleExt;
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Malformed, Side};

use self::frame::NodeFrame;
use self::visit::Visit;

/// Role of a node, as carried in the `node_type` wire field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum NodeType {
    LogicalExpression = 0,
    ComparisonExpression = 1,
    ParenExpression = 2,
    TagRef = 3,
    Literal = 4,
    FieldRef = 5,
}

impl NodeType {
    /// Protobuf enum name, for diagnostics only
    pub fn as_str_name(&self) -> &'static str {
        match self {
            NodeType::LogicalExpression => "TypeLogicalExpression",
            NodeType::ComparisonExpression => "TypeComparisonExpression",
            NodeType::ParenExpression => "TypeParenExpression",
            NodeType::TagRef => "TypeTagRef",
            NodeType::Literal => "TypeLiteral",
            NodeType::FieldRef => "TypeFieldRef",
        }
    }
}

impl TryFrom<i32> for NodeType {
    type Error = Malformed;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeType::LogicalExpression),
            1 => Ok(NodeType::ComparisonExpression),
            2 => Ok(NodeType::ParenExpression),
            3 => Ok(NodeType::TagRef),
            4 => Ok(NodeType::Literal),
            5 => Ok(NodeType::FieldRef),
            value => Err(Malformed::UnknownEnum {
                enumeration: "Node.Type",
                value,
            }),
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_name())
    }
}

/// Comparison operators. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[repr(i32)]
pub enum Comparison {
    Equal = 0,
    NotEqual = 1,
    StartsWith = 2,
    Regex = 3,
    NotRegex = 4,
    Less = 5,
    LessEqual = 6,
    Greater = 7,
    GreaterEqual = 8,
}

impl Comparison {
    /// Protobuf enum name, for diagnostics only
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Comparison::Equal => "ComparisonEqual",
            Comparison::NotEqual => "ComparisonNotEqual",
            Comparison::StartsWith => "ComparisonStartsWith",
            Comparison::Regex => "ComparisonRegex",
            Comparison::NotRegex => "ComparisonNotRegex",
            Comparison::Less => "ComparisonLess",
            Comparison::LessEqual => "ComparisonLessEqual",
            Comparison::Greater => "ComparisonGreater",
            Comparison::GreaterEqual => "ComparisonGreaterEqual",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::NotEqual => "!=",
            Comparison::StartsWith => "^=",
            Comparison::Regex => "=~",
            Comparison::NotRegex => "!~",
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
        }
    }

    /// true for `<`, `<=`, `>` and `>=`
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Comparison::Less | Comparison::LessEqual | Comparison::Greater | Comparison::GreaterEqual
        )
    }

    pub(crate) fn expects(&self) -> &'static str {
        match self {
            Comparison::Equal | Comparison::NotEqual => "operands of the same type",
            Comparison::StartsWith => "string operands",
            Comparison::Regex | Comparison::NotRegex => "a string and a regex pattern",
            _ => "numeric operands",
        }
    }
}

impl TryFrom<i32> for Comparison {
    type Error = Malformed;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Comparison::Equal),
            1 => Ok(Comparison::NotEqual),
            2 => Ok(Comparison::StartsWith),
            3 => Ok(Comparison::Regex),
            4 => Ok(Comparison::NotRegex),
            5 => Ok(Comparison::Less),
            6 => Ok(Comparison::LessEqual),
            7 => Ok(Comparison::Greater),
            8 => Ok(Comparison::GreaterEqual),
            value => Err(Malformed::UnknownEnum {
                enumeration: "Node.Comparison",
                value,
            }),
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_name())
    }
}

/// Logical operators combining two boolean subexpressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[repr(i32)]
pub enum Logical {
    And = 0,
    Or = 1,
}

impl Logical {
    /// Protobuf enum name, for diagnostics only
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Logical::And => "LogicalAnd",
            Logical::Or => "LogicalOr",
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Logical::And => "AND",
            Logical::Or => "OR",
        }
    }
}

impl TryFrom<i32> for Logical {
    type Error = Malformed;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Logical::And),
            1 => Ok(Logical::Or),
            value => Err(Malformed::UnknownEnum {
                enumeration: "Node.Logical",
                value,
            }),
        }
    }
}

impl Display for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_name())
    }
}

/// Typed literal payload of a leaf node
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum Literal {
    String(String),
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    /// a regular expression pattern, only valid as the right side of `=~` / `!~`
    Regex(String),
}

impl Literal {
    pub fn regex(pattern: impl Into<String>) -> Self {
        Literal::Regex(pattern.into())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Literal::Integer(_) | Literal::Unsigned(_) | Literal::Float(_)
        )
    }

    /// whether `Equal`/`NotEqual` can compare the two literals
    fn same_family(&self, other: &Literal) -> bool {
        match (self, other) {
            (Literal::String(_), Literal::String(_)) => true,
            (Literal::Boolean(_), Literal::Boolean(_)) => true,
            (a, b) => a.is_numeric() && b.is_numeric(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::String(_) => "string literal",
            Literal::Boolean(_) => "boolean literal",
            Literal::Integer(_) => "integer literal",
            Literal::Unsigned(_) => "unsigned literal",
            Literal::Float(_) => "float literal",
            Literal::Regex(_) => "regex literal",
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_owned())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Integer(value)
    }
}

impl From<u64> for Literal {
    fn from(value: u64) -> Self {
        Literal::Unsigned(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Unsigned(u) => write!(f, "{}u", u),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Regex(p) => write!(f, "/{}/", p.replace('/', "\\/")),
        }
    }
}

/// A predicate expression tree.
///
/// Children are owned exclusively through `Box`, so a tree can never contain
/// a cycle or share a subtree between two parents. Logical and comparison
/// nodes always hold exactly two children and paren nodes exactly one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum Node {
    Logical {
        op: Logical,
        left: Box<Node>,
        right: Box<Node>,
    },
    Comparison {
        op: Comparison,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// grouping only, evaluates to its child
    Paren(Box<Node>),
    TagRef(String),
    FieldRef(String),
    Literal(Literal),
}

impl Node {
    pub fn logical(op: Logical, left: Node, right: Node) -> Self {
        Node::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Node, right: Node) -> Self {
        Self::logical(Logical::And, left, right)
    }

    pub fn or(left: Node, right: Node) -> Self {
        Self::logical(Logical::Or, left, right)
    }

    pub fn paren(child: Node) -> Self {
        Node::Paren(Box::new(child))
    }

    pub fn tag_ref(name: impl Into<String>) -> Self {
        Node::TagRef(name.into())
    }

    pub fn field_ref(name: impl Into<String>) -> Self {
        Node::FieldRef(name.into())
    }

    pub fn literal(value: impl Into<Literal>) -> Self {
        Node::Literal(value.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Node::Literal(Literal::regex(pattern))
    }

    /// Build a comparison, rejecting operands the operator can never accept.
    ///
    /// The right side must be a literal of a type legal for `op`, and the left
    /// side a tag reference, field reference or literal compatible with it.
    /// Tags are always strings, so tag references only pair with string and
    /// regex literals. Regex literals are compiled once here so a bad pattern
    /// fails at construction rather than on the first record.
    pub fn comparison(op: Comparison, left: Node, right: Node) -> Result<Self, Error> {
        check_operands(op, &left, &right)?;
        Ok(Node::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Logical { .. } => NodeType::LogicalExpression,
            Node::Comparison { .. } => NodeType::ComparisonExpression,
            Node::Paren(_) => NodeType::ParenExpression,
            Node::TagRef(_) => NodeType::TagRef,
            Node::FieldRef(_) => NodeType::FieldRef,
            Node::Literal(_) => NodeType::Literal,
        }
    }

    /// Ordered children: left before right
    pub fn children(&self) -> impl DoubleEndedIterator<Item = &Node> {
        let (first, second): (Option<&Node>, Option<&Node>) = match self {
            Node::Logical { left, right, .. } | Node::Comparison { left, right, .. } => {
                (Some(left.as_ref()), Some(right.as_ref()))
            }
            Node::Paren(child) => (Some(child.as_ref()), None),
            Node::TagRef(_) | Node::FieldRef(_) | Node::Literal(_) => (None, None),
        };
        first.into_iter().chain(second)
    }

    /// Depth-first, pre-order traversal starting at this node
    pub fn visit(&self) -> Visit<'_> {
        Visit::new(self)
    }

    /// Nesting depth, counting this node as 1
    pub fn depth(&self) -> usize {
        self.collapse_frames(|frame: NodeFrame<usize, &Node>| match frame {
            NodeFrame::Logical(_, left, right) | NodeFrame::Comparison(_, left, right) => {
                1 + left.max(right)
            }
            NodeFrame::Paren(child) => 1 + child,
            NodeFrame::Leaf(_) => 1,
        })
    }

    pub fn has_field_refs(&self) -> bool {
        self.visit().any(|node| matches!(node, Node::FieldRef(_)))
    }

    /// Re-check operand typing over a tree that may have been assembled
    /// without the checked constructors, e.g. deserialized from JSON.
    pub fn validate(&self) -> Result<(), Error> {
        for node in self.visit() {
            match node {
                Node::Comparison { op, left, right } => check_operands(*op, left, right)?,
                Node::Logical { op, left, right } => {
                    for (side, child) in [(Side::Left, left), (Side::Right, right)] {
                        if !child.is_boolean() {
                            return Err(Error::InvalidOperand {
                                operator: op.as_str_name(),
                                side,
                                operand: child.describe(),
                            });
                        }
                    }
                }
                Node::Paren(_) | Node::TagRef(_) | Node::FieldRef(_) | Node::Literal(_) => {}
            }
        }
        Ok(())
    }

    /// whether the node can stand where a boolean is required
    pub(crate) fn is_boolean(&self) -> bool {
        match self {
            Node::Logical { .. } | Node::Comparison { .. } => true,
            Node::Paren(child) => child.is_boolean(),
            Node::Literal(Literal::Boolean(_)) => true,
            Node::TagRef(_) | Node::FieldRef(_) | Node::Literal(_) => false,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Node::Logical { .. } => "logical expression",
            Node::Comparison { .. } => "comparison",
            Node::Paren(_) => "parenthesized expression",
            Node::TagRef(_) => "tag reference",
            Node::FieldRef(_) => "field reference",
            Node::Literal(literal) => literal.type_name(),
        }
    }
}

fn check_operands(op: Comparison, left: &Node, right: &Node) -> Result<(), Error> {
    let invalid = |side, node: &Node| Error::InvalidOperand {
        operator: op.as_str_name(),
        side,
        operand: node.describe(),
    };

    let rhs = match right {
        Node::Literal(literal) => literal,
        other => return Err(invalid(Side::Right, other)),
    };
    let rhs_ok = match op {
        Comparison::Equal | Comparison::NotEqual => !matches!(rhs, Literal::Regex(_)),
        Comparison::StartsWith => matches!(rhs, Literal::String(_)),
        Comparison::Regex | Comparison::NotRegex => matches!(rhs, Literal::Regex(_)),
        Comparison::Less
        | Comparison::LessEqual
        | Comparison::Greater
        | Comparison::GreaterEqual => rhs.is_numeric(),
    };
    if !rhs_ok {
        return Err(invalid(Side::Right, right));
    }

    let mut inner = left;
    while let Node::Paren(child) = inner {
        inner = child;
    }
    let lhs_ok = match inner {
        Node::FieldRef(_) => true,
        Node::TagRef(_) => matches!(rhs, Literal::String(_) | Literal::Regex(_)),
        Node::Literal(literal) => match op {
            Comparison::Equal | Comparison::NotEqual => literal.same_family(rhs),
            Comparison::StartsWith | Comparison::Regex | Comparison::NotRegex => {
                matches!(literal, Literal::String(_))
            }
            _ => literal.is_numeric(),
        },
        // a nested expression is a boolean, which only equality with a boolean accepts
        Node::Logical { .. } | Node::Comparison { .. } => {
            matches!(op, Comparison::Equal | Comparison::NotEqual)
                && matches!(rhs, Literal::Boolean(_))
        }
        // unwrapped above
        Node::Paren(_) => false,
    };
    if !lhs_ok {
        return Err(invalid(Side::Left, left));
    }

    if let Literal::Regex(pattern) = rhs {
        regex::Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
    }

    Ok(())
}

fn quote_identifier(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    write!(f, "\"{}\"", name.replace('"', "\\\""))
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Logical { op, left, right } => write!(f, "{} {} {}", left, op.keyword(), right),
            Node::Comparison { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Node::Paren(child) => write!(f, "({})", child),
            Node::TagRef(name) => {
                quote_identifier(f, name)?;
                write!(f, "::tag")
            }
            Node::FieldRef(name) => {
                quote_identifier(f, name)?;
                write!(f, "::field")
            }
            Node::Literal(literal) => write!(f, "{}", literal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_is(value: &str) -> Node {
        Node::comparison(Comparison::Equal, Node::tag_ref("host"), Node::literal(value)).unwrap()
    }

    #[test]
    fn test_comparison_accepts_well_typed_operands() {
        let cases = vec![
            (Comparison::Equal, Node::tag_ref("host"), Node::literal("a")),
            (Comparison::NotEqual, Node::field_ref("ok"), Node::literal(true)),
            (Comparison::StartsWith, Node::tag_ref("path"), Node::literal("/api")),
            (Comparison::Regex, Node::field_ref("path"), Node::regex("^/api/")),
            (Comparison::NotRegex, Node::tag_ref("host"), Node::regex("^db")),
            (Comparison::Less, Node::field_ref("cpu"), Node::literal(0.5)),
            (Comparison::GreaterEqual, Node::literal(5i64), Node::literal(10u64)),
            (Comparison::Equal, Node::literal(1i64), Node::literal(1.0)),
            (Comparison::Equal, host_is("a"), Node::literal(true)),
            (Comparison::NotEqual, Node::paren(host_is("a")), Node::literal(false)),
            (Comparison::Greater, Node::paren(Node::field_ref("cpu")), Node::literal(0.5)),
        ];

        for (op, left, right) in cases {
            let description = format!("{} {} {}", left, op.symbol(), right);
            assert!(
                Node::comparison(op, left, right).is_ok(),
                "should accept {}",
                description
            );
        }
    }

    #[test]
    fn test_comparison_rejects_ill_typed_right_operand() {
        let cases = vec![
            (Comparison::Less, Node::field_ref("n"), Node::literal("abc")),
            (Comparison::Greater, Node::field_ref("n"), Node::literal(true)),
            (Comparison::Regex, Node::field_ref("path"), Node::literal("^/api/")),
            (Comparison::StartsWith, Node::tag_ref("host"), Node::literal(3i64)),
            (Comparison::Equal, Node::tag_ref("host"), Node::regex("a")),
            (Comparison::Equal, Node::tag_ref("host"), Node::field_ref("cpu")),
        ];

        for (op, left, right) in cases {
            match Node::comparison(op, left, right) {
                Err(Error::InvalidOperand { side, .. }) => assert_eq!(side, Side::Right),
                other => panic!("expected invalid right operand for {op}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_comparison_rejects_ill_typed_left_operand() {
        let cases = vec![
            // tags are strings, so they never order and never equal a number
            (Comparison::Less, Node::tag_ref("host"), Node::literal(1i64)),
            (Comparison::Equal, Node::tag_ref("host"), Node::literal(1i64)),
            (Comparison::StartsWith, Node::literal(1i64), Node::literal("1")),
            (Comparison::Equal, Node::literal("5"), Node::literal(5i64)),
            (Comparison::Less, host_is("a"), Node::literal(1i64)),
            (Comparison::Equal, Node::paren(host_is("a")), Node::literal("true")),
        ];

        for (op, left, right) in cases {
            match Node::comparison(op, left, right) {
                Err(Error::InvalidOperand { side, .. }) => assert_eq!(side, Side::Left),
                other => panic!("expected invalid left operand for {op}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_comparison_rejects_bad_pattern() {
        let result = Node::comparison(Comparison::Regex, Node::field_ref("path"), Node::regex("(unclosed"));
        assert!(matches!(result, Err(Error::InvalidPattern { pattern, .. }) if pattern == "(unclosed"));
    }

    #[test]
    fn test_children_are_ordered() {
        let tree = Node::and(host_is("a"), Node::paren(host_is("b")));
        let kinds: Vec<NodeType> = tree.children().map(Node::node_type).collect();
        assert_eq!(
            kinds,
            vec![NodeType::ComparisonExpression, NodeType::ParenExpression]
        );
        assert_eq!(Node::tag_ref("host").children().count(), 0);
    }

    #[test]
    fn test_visit_is_preorder_and_restartable() {
        let tree = Node::or(host_is("a"), Node::paren(host_is("b")));

        let first: Vec<String> = tree.visit().map(|n| n.to_string()).collect();
        let second: Vec<String> = tree.visit().map(|n| n.to_string()).collect();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                "\"host\"::tag = 'a' OR (\"host\"::tag = 'b')",
                "\"host\"::tag = 'a'",
                "\"host\"::tag",
                "'a'",
                "(\"host\"::tag = 'b')",
                "\"host\"::tag = 'b'",
                "\"host\"::tag",
                "'b'",
            ]
        );
    }

    #[test]
    fn test_depth() {
        assert_eq!(Node::literal(true).depth(), 1);
        assert_eq!(host_is("a").depth(), 2);
        assert_eq!(Node::and(host_is("a"), Node::paren(host_is("b"))).depth(), 4);
    }

    #[test]
    fn test_display() {
        let cpu = Node::comparison(
            Comparison::GreaterEqual,
            Node::field_ref("cpu"),
            Node::literal(0.9),
        )
        .unwrap();
        let tree = Node::and(host_is("it's"), Node::paren(cpu));
        assert_eq!(
            tree.to_string(),
            "\"host\"::tag = 'it\\'s' AND (\"cpu\"::field >= 0.9)"
        );
        assert_eq!(Node::regex("^/api/").to_string(), "/^\\/api\\//");
        assert_eq!(Node::literal(7u64).to_string(), "7u");
    }

    #[test]
    fn test_validate_unchecked_trees() {
        let ok = Node::and(host_is("a"), Node::literal(false));
        assert!(ok.validate().is_ok());

        let bad_comparison = Node::and(
            host_is("a"),
            Node::Comparison {
                op: Comparison::Less,
                left: Box::new(Node::field_ref("n")),
                right: Box::new(Node::literal("abc")),
            },
        );
        assert!(matches!(
            bad_comparison.validate(),
            Err(Error::InvalidOperand { side: Side::Right, .. })
        ));

        let bad_logical = Node::or(Node::tag_ref("host"), host_is("a"));
        assert!(matches!(
            bad_logical.validate(),
            Err(Error::InvalidOperand { operator: "LogicalOr", side: Side::Left, operand: "tag reference" })
        ));
    }

    #[test]
    fn test_wire_enum_values() {
        assert_eq!(Comparison::GreaterEqual as i32, 8);
        assert_eq!(Comparison::try_from(3), Ok(Comparison::Regex));
        assert_eq!(Logical::try_from(1), Ok(Logical::Or));
        assert_eq!(NodeType::try_from(5), Ok(NodeType::FieldRef));
        assert_eq!(
            Comparison::try_from(9),
            Err(Malformed::UnknownEnum {
                enumeration: "Node.Comparison",
                value: 9
            })
        );
        assert_eq!(Logical::And.as_str_name(), "LogicalAnd");
        assert_eq!(NodeType::TagRef.as_str_name(), "TypeTagRef");
    }
}
