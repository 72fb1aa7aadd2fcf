//! Constantified attributes and functional dependency analysis over resolved paths

use criteria_planner::analysis::{
    AnalysisError, ConstantifiedAttributeCollector, ConstantifiedAttributes,
    FunctionalDependencyAnalyzer, NodeKey,
};
use criteria_planner::expression::{parse_expression, parse_predicate, Expression};
use criteria_planner::join_manager::{ImplicitJoinContext, JoinManager, QueryGraph};
use criteria_planner::join_tree::ClauseType;
use test_case::test_case;

use super::order_graph;

struct Resolved {
    graph: QueryGraph,
    manager: JoinManager,
    constantified: ConstantifiedAttributes,
    order_by: Vec<Expression>,
}

fn resolve(filter: Option<&str>, order_by: &[&str]) -> Resolved {
    let (mut graph, manager) = order_graph();
    let constantified = match filter {
        Some(text) => {
            let mut predicate = parse_predicate(text).unwrap();
            manager
                .implicit_join_predicate(&mut graph, &mut predicate, ImplicitJoinContext::for_clause(ClauseType::Where))
                .unwrap();
            ConstantifiedAttributeCollector::new(manager.catalog(), &graph.tree).collect(&predicate)
        }
        None => ConstantifiedAttributes::default(),
    };
    let order_by = order_by
        .iter()
        .map(|text| {
            let mut expr = parse_expression(text).unwrap();
            manager
                .implicit_join(&mut graph, &mut expr, ImplicitJoinContext::for_clause(ClauseType::OrderBy))
                .unwrap();
            expr
        })
        .collect();
    Resolved {
        graph,
        manager,
        constantified,
        order_by,
    }
}

fn forms_unique_tuple(filter: Option<&str>, order_by: &[&str]) -> Result<bool, AnalysisError> {
    let resolved = resolve(filter, order_by);
    let mut analyzer = FunctionalDependencyAnalyzer::new(
        resolved.manager.catalog(),
        &resolved.graph.tree,
        &resolved.constantified,
    );
    let mut unique = false;
    for expr in &resolved.order_by {
        unique = analyzer.analyze_forms_unique_tuple(expr)?;
    }
    Ok(unique)
}

#[test_case(None, &["o.id"], true; "root identifier")]
#[test_case(None, &["o.number"], false; "non identifier")]
#[test_case(None, &["o.items.price"], false; "collection attribute")]
#[test_case(None, &["o.items.id"], false; "collection identifier")]
#[test_case(None, &["o.number", "o.id"], true; "identifier last")]
#[test_case(None, &["o.customer.name", "o.id"], true; "to-one attribute then identifier")]
#[test_case(Some("o.id = :id"), &["o.number"], true; "constantified root")]
#[test_case(Some("o.id = :id"), &["o.customer.region.id"], true; "to-one chain below constantified root")]
#[test_case(Some("o.id = :a OR o.id = :b"), &["o.number"], false; "disjunction does not constantify")]
#[test_case(Some("o.id IN (:a, :b)"), &["o.number"], false; "multi value in")]
#[test_case(Some("NOT (o.id = :id)"), &["o.number"], false; "negated equality")]
#[test_case(Some("o.customer.id = :c"), &["o.customer.name"], false; "constantified association alone")]
fn test_forms_unique_tuple(filter: Option<&str>, order_by: &[&str], expected: bool) {
    assert_eq!(forms_unique_tuple(filter, order_by).unwrap(), expected);
}

#[test]
fn test_association_identifier_filter_constantifies_association() {
    let resolved = resolve(Some("o.customer.id = :c"), &["o.customer.name"]);
    let root = resolved.manager.roots()[0];
    let key = NodeKey::Association(root, "customer".to_string());
    assert!(resolved.constantified.is_definite(&key, "id"));

    let customer = resolved.order_by[0]
        .as_path()
        .and_then(|p| p.reference.clone())
        .map(|r| r.base_node)
        .unwrap();
    assert!(resolved.constantified.is_constantified(
        &resolved.graph.tree,
        resolved.manager.catalog(),
        customer
    ));
}

#[test]
fn test_single_root_is_not_constantified_without_filter() {
    let resolved = resolve(None, &["o.number"]);
    let root = resolved.manager.roots()[0];
    assert_eq!(resolved.manager.roots().len(), 1);
    assert!(!resolved.constantified.is_constantified(
        &resolved.graph.tree,
        resolved.manager.catalog(),
        root
    ));
    assert!(!forms_unique_tuple(None, &["o.number"]).unwrap());

    let pinned = resolve(Some("o.id = :id"), &["o.number"]);
    assert!(pinned.constantified.is_constantified(
        &pinned.graph.tree,
        pinned.manager.catalog(),
        root
    ));
}

#[test]
fn test_ordering_by_association_or_collection_is_rejected() {
    assert!(matches!(
        forms_unique_tuple(None, &["o.customer"]),
        Err(AnalysisError::AssociationOrdering { .. })
    ));
    assert!(matches!(
        forms_unique_tuple(None, &["o.tags"]),
        Err(AnalysisError::PluralAttributeOrdering { .. })
    ));
}

#[test]
fn test_analysis_result_is_cumulative_until_cleared() {
    let resolved = resolve(None, &["o.id", "o.number"]);
    let mut analyzer = FunctionalDependencyAnalyzer::new(
        resolved.manager.catalog(),
        &resolved.graph.tree,
        &resolved.constantified,
    );
    assert!(analyzer.analyze_forms_unique_tuple(&resolved.order_by[0]).unwrap());
    assert!(analyzer.analyze_forms_unique_tuple(&resolved.order_by[1]).unwrap());
    assert!(analyzer.is_result_unique());

    analyzer.clear();
    assert!(!analyzer.analyze_forms_unique_tuple(&resolved.order_by[1]).unwrap());
}
