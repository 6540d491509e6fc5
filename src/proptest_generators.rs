#[cfg(test)]
mod tests {
    use crate::eval::pattern::PatternCache;
    use crate::eval::short_circuit::ShortCircuit;
    use crate::node::{Comparison, Literal, Node};
    use crate::predicate::Predicate;
    use crate::record::{Field, Row};
    use proptest::prelude::*;

    // Small key space so generated records actually hit the referenced keys
    fn arb_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("host".to_string()),
            Just("region".to_string()),
            Just("cpu".to_string()),
            Just("path".to_string()),
        ]
    }

    fn arb_string() -> impl Strategy<Value = String> {
        "[a-z/]{0,6}"
    }

    fn arb_pattern() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("^/api/".to_string()),
            Just(".*".to_string()),
            Just("[0-9]+".to_string()),
            Just("^[a-z]+$".to_string()),
            Just("a|b".to_string()),
        ]
    }

    fn arb_number() -> impl Strategy<Value = Literal> {
        prop_oneof![
            (-1000i64..1000).prop_map(Literal::Integer),
            (0u64..1000).prop_map(Literal::Unsigned),
            any::<u64>().prop_map(Literal::Unsigned),
            (-1e6f64..1e6).prop_map(Literal::Float),
        ]
    }

    fn arb_literal() -> impl Strategy<Value = Literal> {
        prop_oneof![
            arb_string().prop_map(Literal::String),
            any::<bool>().prop_map(Literal::Boolean),
            arb_number(),
            arb_pattern().prop_map(Literal::Regex),
        ]
    }

    fn arb_comparison() -> impl Strategy<Value = Comparison> {
        prop_oneof![
            Just(Comparison::Equal),
            Just(Comparison::NotEqual),
            Just(Comparison::StartsWith),
            Just(Comparison::Regex),
            Just(Comparison::NotRegex),
            Just(Comparison::Less),
            Just(Comparison::LessEqual),
            Just(Comparison::Greater),
            Just(Comparison::GreaterEqual),
        ]
    }

    fn arb_leaf() -> impl Strategy<Value = Node> {
        prop_oneof![
            arb_name().prop_map(Node::TagRef),
            arb_name().prop_map(Node::FieldRef),
            arb_literal().prop_map(Node::Literal),
        ]
    }

    /// Structurally valid trees with no operand typing, the shape the codec
    /// has to carry faithfully.
    fn arb_node() -> impl Strategy<Value = Node> {
        arb_leaf().prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Node::and(a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Node::or(a, b)),
                (arb_comparison(), inner.clone(), inner.clone()).prop_map(|(op, left, right)| {
                    Node::Comparison {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }),
                inner.prop_map(Node::paren),
            ]
        })
    }

    fn arb_well_typed_comparison() -> impl Strategy<Value = Node> {
        prop_oneof![
            (
                prop_oneof![Just(Comparison::Equal), Just(Comparison::NotEqual)],
                arb_name(),
                arb_string()
            )
                .prop_map(|(op, tag, value)| (op, Node::tag_ref(tag), Literal::String(value))),
            (arb_name(), arb_string())
                .prop_map(|(tag, prefix)| (
                    Comparison::StartsWith,
                    Node::tag_ref(tag),
                    Literal::String(prefix)
                )),
            (
                prop_oneof![Just(Comparison::Regex), Just(Comparison::NotRegex)],
                arb_name(),
                arb_pattern()
            )
                .prop_map(|(op, tag, pattern)| (op, Node::tag_ref(tag), Literal::Regex(pattern))),
            (
                prop_oneof![
                    Just(Comparison::Less),
                    Just(Comparison::LessEqual),
                    Just(Comparison::Greater),
                    Just(Comparison::GreaterEqual),
                ],
                arb_name(),
                arb_number()
            )
                .prop_map(|(op, field, value)| (op, Node::field_ref(field), value)),
            (
                prop_oneof![Just(Comparison::Equal), Just(Comparison::NotEqual)],
                arb_name(),
                prop_oneof![
                    arb_string().prop_map(Literal::String),
                    any::<bool>().prop_map(Literal::Boolean),
                    arb_number(),
                ]
            )
                .prop_map(|(op, field, value)| (op, Node::field_ref(field), value)),
        ]
        .prop_map(|(op, left, right)| Node::comparison(op, left, Node::Literal(right)).unwrap())
    }

    /// Trees accepted by the checked constructors
    fn arb_well_formed() -> impl Strategy<Value = Node> {
        let leaf = prop_oneof![
            4 => arb_well_typed_comparison(),
            1 => any::<bool>().prop_map(Node::literal),
        ];
        leaf.prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Node::and(a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Node::or(a, b)),
                inner.prop_map(Node::paren),
            ]
        })
    }

    fn arb_field() -> impl Strategy<Value = Field> {
        prop_oneof![
            any::<bool>().prop_map(Field::Boolean),
            (-100i64..100).prop_map(Field::Integer),
            (0u64..200).prop_map(Field::Unsigned),
            (-100f64..100.0).prop_map(Field::Float),
            arb_string().prop_map(Field::String),
        ]
    }

    fn arb_row() -> impl Strategy<Value = Row> {
        (
            prop::collection::btree_map(arb_name(), arb_string(), 0..4),
            prop::collection::btree_map(arb_name(), arb_field(), 0..4),
        )
            .prop_map(|(tags, fields)| Row { tags, fields })
    }

    #[test]
    fn test_generation() {
        use proptest::test_runner::{Config, TestRunner};

        let mut runner = TestRunner::new(Config {
            cases: 5,
            max_shrink_iters: 0,
            ..Config::default()
        });

        let result = runner.run(&arb_node(), |node| {
            prop_assert!(node.depth() >= 1);
            Ok(())
        });

        if let Err(e) = result {
            panic!("Generation failed: {:?}", e);
        }
    }

    proptest! {
        #[test]
        fn test_wire_round_trip(node in arb_node()) {
            let predicate = Predicate::new(node);
            let bytes = predicate.encode_to_vec();
            let decoded = Predicate::decode(&bytes);
            prop_assert!(decoded.is_ok(), "decode failed for `{}`: {:?}", predicate, decoded);
            prop_assert_eq!(decoded.ok(), Some(predicate));
        }

        #[test]
        fn test_well_formed_trees_validate(node in arb_well_formed()) {
            let predicate = Predicate::new(node);
            prop_assert!(predicate.validate().is_ok(), "rejected `{}`", predicate);
        }

        #[test]
        fn test_not_regex_negates_regex(tag in arb_name(), pattern in arb_pattern(), row in arb_row()) {
            let build = |op| {
                Predicate::new(
                    Node::comparison(op, Node::tag_ref(tag.clone()), Node::regex(pattern.clone())).unwrap(),
                )
            };
            let matched = build(Comparison::Regex).matches(&row).unwrap();
            let not_matched = build(Comparison::NotRegex).matches(&row).unwrap();

            if row.tags.contains_key(&tag) {
                prop_assert_ne!(matched, not_matched);
            } else {
                prop_assert!(!matched && !not_matched);
            }
        }

        #[test]
        fn test_reduce_agrees_with_full_evaluation(node in arb_well_formed(), row in arb_row()) {
            let predicate = Predicate::new(node);
            let expected = predicate.matches(&row).map_err(|err| err.to_string());
            match predicate.reduce_with_tags(&row, &mut PatternCache::default()) {
                ShortCircuit::Known(b) => prop_assert_eq!(Ok(b), expected),
                ShortCircuit::Unknown(residual) => {
                    // tag comparisons in well-formed trees always settle
                    prop_assert!(residual.root().has_field_refs());
                    let finished = residual.matches(&row).map_err(|err| err.to_string());
                    prop_assert_eq!(finished, expected, "residual `{}`", residual);
                }
            }
        }

        #[test]
        fn test_visit_is_restartable(node in arb_node()) {
            let first: Vec<&Node> = node.visit().collect();
            let second: Vec<&Node> = node.visit().collect();
            prop_assert_eq!(&first, &second);
            prop_assert!(std::ptr::eq(first[0], &node));

            let below: usize = node.children().map(|child| child.visit().count()).sum();
            prop_assert_eq!(first.len(), 1 + below);
        }
    }
}
