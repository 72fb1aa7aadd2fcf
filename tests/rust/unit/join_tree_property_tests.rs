//! Join tree properties: node reuse, cached cardinality flags, render ordering

use std::collections::BTreeSet;

use criteria_planner::expression::{parse_path, parse_predicate, PathReference};
use criteria_planner::join_manager::{ImplicitJoinContext, JoinError, JoinManager, QueryGraph};
use criteria_planner::join_tree::{ClauseType, JoinType};
use test_case::test_case;

use super::order_graph;

fn resolve(graph: &mut QueryGraph, manager: &JoinManager, text: &str) -> PathReference {
    let mut path = parse_path(text).unwrap();
    manager
        .resolve_path(graph, &mut path, ImplicitJoinContext::for_clause(ClauseType::Where))
        .unwrap()
        .unwrap()
}

fn assert_cardinality_consistent(graph: &QueryGraph) {
    for node in graph.tree.nodes() {
        assert_eq!(
            graph.tree.is_cardinality_mandatory(node.id),
            graph.tree.compute_cardinality_mandatory(node.id),
            "stale cardinality flag on {}",
            node.alias
        );
    }
}

#[test_case("o.customer.name"; "to-one association")]
#[test_case("o.customer.region.name"; "to-one chain")]
#[test_case("o.items.product.name"; "collection then to-one")]
#[test_case("o.items[1].price"; "indexed collection")]
fn test_resolving_twice_reuses_nodes(text: &str) {
    let (mut graph, manager) = order_graph();
    let first = resolve(&mut graph, &manager, text);
    let nodes = graph.tree.len();
    let second = resolve(&mut graph, &manager, text);
    assert_eq!(first, second);
    assert_eq!(graph.tree.len(), nodes);
}

#[test_case("o.items[:a].price", "o.items[:b].price", 2; "different indexes")]
#[test_case("o.items[:a].price", "o.items[:a].quantity", 1; "same index")]
#[test_case("o.items[1].price", "o.items[2].price", 2; "different literal indexes")]
fn test_indexed_siblings(first: &str, second: &str, expected: usize) {
    let (mut graph, manager) = order_graph();
    let a = resolve(&mut graph, &manager, first);
    let b = resolve(&mut graph, &manager, second);
    assert_eq!(a.base_node == b.base_node, expected == 1);

    let root = manager.roots()[0];
    let slot = &graph.tree.node(root).slots["items"];
    assert_eq!(slot.nodes.len(), expected);
    for node in &slot.nodes {
        assert!(graph.tree.node(*node).has_on_predicate());
    }
}

#[test]
fn test_cardinality_flags_follow_mutations() {
    let (mut graph, manager) = order_graph();
    resolve(&mut graph, &manager, "o.items.product.name");
    resolve(&mut graph, &manager, "o.customer.region.name");
    assert_cardinality_consistent(&graph);

    let items = resolve(&mut graph, &manager, "o.items.price").base_node;
    assert!(!graph.tree.is_cardinality_mandatory(items));

    // A filtering child makes the whole left-joined chain mandatory
    manager
        .join_on(
            &mut graph,
            "o.items.product",
            "p",
            JoinType::Left,
            parse_predicate("p.name = 'tea'").unwrap(),
        )
        .unwrap();
    assert_cardinality_consistent(&graph);
    assert!(graph.tree.is_cardinality_mandatory(items));

    manager
        .join(&mut graph, "o.shipper", "s", JoinType::Inner, false, true)
        .unwrap();
    assert_cardinality_consistent(&graph);
}

#[test]
fn test_dependencies_render_before_dependents() {
    let (mut graph, manager) = order_graph();
    manager
        .join(&mut graph, "o.shipper", "s", JoinType::Left, false, true)
        .unwrap();
    manager
        .join_on(
            &mut graph,
            "o.invoice",
            "inv",
            JoinType::Left,
            parse_predicate("inv.id = s.id").unwrap(),
        )
        .unwrap();

    let joins = manager
        .build_joins(&graph, &BTreeSet::new(), None, true)
        .unwrap();
    assert_eq!(
        joins,
        " FROM Order o LEFT JOIN o.shipper s LEFT JOIN o.invoice inv ON inv.id = s.id"
    );
}

#[test]
fn test_cycle_through_on_predicates_is_reported() {
    let (mut graph, manager) = order_graph();
    manager
        .join(&mut graph, "o.customer", "c", JoinType::Left, false, true)
        .unwrap();
    manager
        .join_on(
            &mut graph,
            "o.items",
            "i",
            JoinType::Left,
            parse_predicate("i.quantity = c.id").unwrap(),
        )
        .unwrap();
    manager
        .entity_join(
            &mut graph,
            "o",
            "Shipper",
            "s",
            JoinType::Left,
            parse_predicate("s.id = i.id").unwrap(),
        )
        .unwrap();

    let err = manager
        .join_on(
            &mut graph,
            "o.customer",
            "c",
            JoinType::Left,
            parse_predicate("c.id = s.id").unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, JoinError::CyclicJoinDependency { ref chain } if chain.len() >= 3));
    assert!(matches!(
        manager.build_joins(&graph, &BTreeSet::new(), None, true),
        Err(JoinError::CyclicJoinDependency { .. })
    ));
}

#[test]
fn test_alias_prefix_applies_to_every_alias() {
    let (mut graph, manager) = order_graph();
    resolve(&mut graph, &manager, "o.customer.name");
    let joins = manager
        .build_joins(&graph, &BTreeSet::new(), Some("x_"), true)
        .unwrap();
    assert_eq!(joins, " FROM Order x_o JOIN x_o.customer x_customer_1");
}
