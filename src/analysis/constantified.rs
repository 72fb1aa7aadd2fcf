//! Constantified attribute collection.
//!
//! An attribute is constantified when the WHERE predicate forces it to a single
//! value for every result row, e.g. `o.id = :id` or `c.region.id IN (1)`. Entries
//! proven on every path through the predicate are definite; entries that survive only
//! because every branch of a disjunction pins them (each possibly to a different
//! value) are kept but marked non-definite.

use std::collections::BTreeMap;

use super::{identifying_paths, node_key, NodeKey};
use crate::expression::{BooleanOperator, ComparisonOperator, Expression, Literal, PathExpression, Predicate};
use crate::join_tree::{JoinNodeId, JoinTree, NodeKind};
use crate::schema_catalog::{AttributeKind, SchemaCatalog};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantifiedAttributes {
    /// Attribute path -> definite flag
    entries: BTreeMap<NodeKey, BTreeMap<String, bool>>,
    /// Nodes pinned as a whole through `KEY(n) = :k` / `INDEX(n) = :i`
    whole: BTreeMap<JoinNodeId, bool>,
}

impl ConstantifiedAttributes {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.whole.is_empty()
    }

    pub fn attributes(&self, key: &NodeKey) -> impl Iterator<Item = &str> {
        self.entries
            .get(key)
            .into_iter()
            .flat_map(|attrs| attrs.keys().map(String::as_str))
    }

    pub fn contains(&self, key: &NodeKey, attribute: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|attrs| attrs.contains_key(attribute))
    }

    /// True when `attribute` of `key` is pinned on every path through the predicate
    pub fn is_definite(&self, key: &NodeKey, attribute: &str) -> bool {
        self.entries
            .get(key)
            .and_then(|attrs| attrs.get(attribute))
            .copied()
            .unwrap_or(false)
    }

    /// Definite pin of a single attribute of the node itself
    pub fn is_constantified_non_optional(&self, node: JoinNodeId, attribute: &str) -> bool {
        self.is_definite(&NodeKey::Node(node), attribute)
    }

    /// True when every identifying attribute of the node is definitely pinned, so the
    /// node matches at most one row per result. Attributes read through the parent's
    /// foreign key (`o.customer.id` for the node `o.customer`) count as well.
    pub fn is_constantified(&self, tree: &JoinTree, catalog: &dyn SchemaCatalog, node: JoinNodeId) -> bool {
        let node = tree.identity(node);
        if self.whole.get(&node).copied().unwrap_or(false) {
            return true;
        }
        let join_node = tree.node(node);
        if let NodeKind::Values { row_count: 1, .. } = join_node.kind {
            return true;
        }

        let via_parent = match (&join_node.kind, join_node.parent, &join_node.parent_slot) {
            (NodeKind::Association { attribute }, Some(parent), Some(slot)) if attribute.kind.is_to_one() => {
                Some(NodeKey::Association(tree.identity(parent), slot.clone()))
            }
            _ => None,
        };
        let own = NodeKey::Node(node);

        let identifying = identifying_paths(catalog, join_node.effective_type());
        !identifying.is_empty()
            && identifying.iter().all(|attr| {
                self.is_definite(&own, attr)
                    || via_parent
                        .as_ref()
                        .is_some_and(|key| self.is_definite(key, attr))
            })
    }

    fn insert(&mut self, key: NodeKey, attribute: String, definite: bool) {
        let slot = self.entries.entry(key).or_default().entry(attribute).or_insert(definite);
        *slot |= definite;
    }

    fn insert_whole(&mut self, node: JoinNodeId, definite: bool) {
        let slot = self.whole.entry(node).or_insert(definite);
        *slot |= definite;
    }

    fn union(&mut self, other: ConstantifiedAttributes) {
        for (key, attrs) in other.entries {
            for (attr, definite) in attrs {
                self.insert(key.clone(), attr, definite);
            }
        }
        for (node, definite) in other.whole {
            self.insert_whole(node, definite);
        }
    }

    /// Entries present in both sides; none of them is definite any more
    fn intersect(self, other: &ConstantifiedAttributes) -> ConstantifiedAttributes {
        let mut result = ConstantifiedAttributes::default();
        for (key, attrs) in self.entries {
            let Some(other_attrs) = other.entries.get(&key) else {
                continue;
            };
            for attr in attrs.into_keys() {
                if other_attrs.contains_key(&attr) {
                    result.insert(key.clone(), attr, false);
                }
            }
        }
        for node in self.whole.into_keys() {
            if other.whole.contains_key(&node) {
                result.insert_whole(node, false);
            }
        }
        result
    }
}

/// Walks a resolved WHERE predicate and collects [`ConstantifiedAttributes`]
pub struct ConstantifiedAttributeCollector<'a> {
    catalog: &'a dyn SchemaCatalog,
    tree: &'a JoinTree,
}

impl<'a> ConstantifiedAttributeCollector<'a> {
    pub fn new(catalog: &'a dyn SchemaCatalog, tree: &'a JoinTree) -> Self {
        ConstantifiedAttributeCollector { catalog, tree }
    }

    pub fn collect(&self, predicate: &Predicate) -> ConstantifiedAttributes {
        let result = self.visit(predicate, false);
        log::debug!(
            "Collected constantified attributes for {} keys",
            result.entries.len() + result.whole.len()
        );
        result
    }

    fn visit(&self, predicate: &Predicate, negated: bool) -> ConstantifiedAttributes {
        let mut result = ConstantifiedAttributes::default();
        match predicate {
            Predicate::Compound(compound) => {
                let negated = negated ^ compound.negated;
                // NOT (a OR b) is NOT a AND NOT b
                let conjunctive = (compound.operator == BooleanOperator::And) != negated;
                if conjunctive {
                    for child in &compound.children {
                        result.union(self.visit(child, negated));
                    }
                } else {
                    let mut branches = compound.children.iter().map(|c| self.visit(c, negated));
                    if let Some(first) = branches.next() {
                        result = branches.fold(first, |acc, branch| acc.intersect(&branch));
                    }
                }
            }
            Predicate::Comparison {
                operator: ComparisonOperator::Eq,
                left,
                right,
                negated: own,
            } if !(negated ^ own) => {
                if is_pinning_constant(right) {
                    self.pin(left, &mut result);
                } else if is_pinning_constant(left) {
                    self.pin(right, &mut result);
                }
            }
            Predicate::In {
                left,
                right,
                negated: own,
            } if !(negated ^ own) => {
                // Only a single-element list pins the value
                if let [single] = right.as_slice() {
                    if is_pinning_constant(single) {
                        self.pin(left, &mut result);
                    } else if is_pinning_constant(left) {
                        self.pin(single, &mut result);
                    }
                }
            }
            _ => {}
        }
        result
    }

    fn pin(&self, expr: &Expression, result: &mut ConstantifiedAttributes) {
        match expr {
            Expression::Path(path) => self.pin_path(path, false, result),
            Expression::ListIndex(path) | Expression::MapKey(path) => self.pin_path(path, true, result),
            _ => {}
        }
    }

    fn pin_path(&self, path: &PathExpression, in_key: bool, result: &mut ConstantifiedAttributes) {
        let Some(reference) = &path.reference else {
            return;
        };
        let node = reference.base_node;
        let Some(field) = &reference.field else {
            if in_key {
                result.insert_whole(self.tree.identity(node), true);
            }
            return;
        };

        let node_type = self.tree.node(node).effective_type();
        let Ok(attr) = self.catalog.resolve_attribute_path(node_type, field) else {
            return;
        };
        if attr.is_plural() {
            if in_key {
                result.insert_whole(self.tree.identity(node), true);
            }
            return;
        }

        let mut pinned = Vec::new();
        match attr.kind {
            AttributeKind::Embedded => {
                for leaf in embedded_leaf_paths(self.catalog, &attr.target) {
                    pinned.push(format!("{}.{}", field, leaf));
                }
            }
            // `o.customer = :c` compares the foreign key
            AttributeKind::ManyToOne | AttributeKind::OneToOne => {
                for id in self.catalog.identifier_paths(&attr.target) {
                    pinned.push(format!("{}.{}", field, id));
                }
            }
            _ => pinned.push(field.clone()),
        }

        for full in pinned {
            self.pin_with_equivalents(node, node_type, &full, result);
        }
    }

    fn pin_with_equivalents(
        &self,
        node: JoinNodeId,
        node_type: &str,
        field: &str,
        result: &mut ConstantifiedAttributes,
    ) {
        let (key, attribute) = node_key(self.catalog, self.tree, node, field);
        result.insert(key, attribute, true);
        for equivalent in self.catalog.column_equivalent_attributes(node_type, field) {
            let (key, attribute) = node_key(self.catalog, self.tree, node, &equivalent);
            result.insert(key, attribute, true);
        }
    }
}

/// Parameters and non-null literals
fn is_pinning_constant(expr: &Expression) -> bool {
    expr.is_constant() && !matches!(expr, Expression::Literal(Literal::Null))
}

fn embedded_leaf_paths(catalog: &dyn SchemaCatalog, embeddable: &str) -> Vec<String> {
    catalog.singular_paths(embeddable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join_manager::{ImplicitJoinContext, JoinManager, QueryGraph};
    use crate::join_tree::ClauseType;
    use crate::schema_catalog::testing::shop_metamodel;
    use crate::config::PlannerConfig;
    use crate::expression::parse_predicate;
    use std::sync::Arc;

    struct Fixture {
        graph: QueryGraph,
        manager: JoinManager,
        root: JoinNodeId,
    }

    fn fixture(entity: &str, alias: &str) -> Fixture {
        let mut graph = QueryGraph::new();
        let mut manager = JoinManager::new(
            &mut graph,
            None,
            Arc::new(shop_metamodel()),
            Arc::new(PlannerConfig::default()),
        );
        let root = manager.add_root(&mut graph, entity, alias).unwrap();
        Fixture { graph, manager, root }
    }

    impl Fixture {
        fn collect(&mut self, text: &str) -> (ConstantifiedAttributes, Predicate) {
            let mut predicate = parse_predicate(text).unwrap();
            self.manager
                .implicit_join_predicate(
                    &mut self.graph,
                    &mut predicate,
                    ImplicitJoinContext::for_clause(ClauseType::Where),
                )
                .unwrap();
            let collector = ConstantifiedAttributeCollector::new(self.manager.catalog(), &self.graph.tree);
            (collector.collect(&predicate), predicate)
        }

        fn constantified(&self, attributes: &ConstantifiedAttributes, node: JoinNodeId) -> bool {
            attributes.is_constantified(&self.graph.tree, self.manager.catalog(), node)
        }
    }

    #[test]
    fn test_equality_pins_id() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.id = :id AND o.total > 10");
        assert!(attrs.is_constantified_non_optional(f.root, "id"));
        assert!(!attrs.contains(&NodeKey::Node(f.root), "total"));
        assert!(f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_constant_on_left_side() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect(":id = o.id");
        assert!(f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_negated_equality_contributes_nothing() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.id <> :id");
        assert!(attrs.is_empty());
        let (attrs, _) = f.collect("NOT (o.id = :id)");
        assert!(attrs.is_empty());
        let (attrs, _) = f.collect("o.id NOT IN (:id)");
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_disjunction_keeps_common_entries_as_non_definite() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.id = :a OR (o.id = :b AND o.number = :n)");
        let key = NodeKey::Node(f.root);
        assert!(attrs.contains(&key, "id"));
        assert!(!attrs.is_definite(&key, "id"));
        assert!(!attrs.contains(&key, "number"));
        assert!(!f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_negated_disjunction_is_conjunction_of_negations() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("NOT (o.id <> :a OR o.number <> :n)");
        assert!(attrs.is_constantified_non_optional(f.root, "id"));
        assert!(attrs.is_constantified_non_optional(f.root, "number"));
    }

    #[test]
    fn test_multi_value_in_does_not_pin() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.id IN (:a, :b)");
        assert!(attrs.is_empty());
        let (attrs, _) = f.collect("o.id IN (:a)");
        assert!(f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_null_literal_does_not_pin() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.id = NULL");
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_foreign_key_pins_association() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.customer.id = :c");
        let association = NodeKey::Association(f.root, "customer".to_string());
        assert!(attrs.is_definite(&association, "id"));
        // customerId shares the customer_id column
        assert!(attrs.is_constantified_non_optional(f.root, "customerId"));

        let mut path = crate::expression::parse_path("o.customer.name").unwrap();
        let reference = f
            .manager
            .resolve_path(&mut f.graph, &mut path, ImplicitJoinContext::for_clause(ClauseType::Select))
            .unwrap()
            .unwrap();
        assert!(f.constantified(&attrs, reference.base_node));
    }

    #[test]
    fn test_column_equivalent_basic_attribute_pins_association() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.customerId = :c");
        let association = NodeKey::Association(f.root, "customer".to_string());
        assert!(attrs.is_definite(&association, "id"));
    }

    #[test]
    fn test_association_comparison_pins_foreign_key() {
        let mut f = fixture("Order", "o");
        let (attrs, _) = f.collect("o.customer = :c");
        let association = NodeKey::Association(f.root, "customer".to_string());
        assert!(attrs.is_definite(&association, "id"));
    }

    #[test]
    fn test_embedded_attribute_expands_to_leaves() {
        let mut f = fixture("OrderLine", "l");
        let (attrs, _) = f.collect("l.id = :id");
        assert!(attrs.is_constantified_non_optional(f.root, "id.orderNumber"));
        assert!(attrs.is_constantified_non_optional(f.root, "id.lineNumber"));
        assert!(f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_partial_composite_id_is_not_constantified() {
        let mut f = fixture("OrderLine", "l");
        let (attrs, _) = f.collect("l.id.orderNumber = :n");
        assert!(!f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_index_pins_collection_node() {
        let mut f = fixture("Order", "o");
        let (attrs, predicate) = f.collect("INDEX(o.items) = 0");
        let mut items = None;
        predicate.for_each_path(&mut |p| items = p.reference.as_ref().map(|r| r.base_node));
        let items = items.unwrap();
        assert!(f.constantified(&attrs, items));
        assert!(!f.constantified(&attrs, f.root));
    }

    #[test]
    fn test_values_root_with_single_row() {
        let mut f = fixture("Order", "o");
        let values = f
            .manager
            .add_values_root(&mut f.graph, "Product", "v", 1)
            .unwrap();
        let attrs = ConstantifiedAttributes::default();
        assert!(f.constantified(&attrs, values));
        assert!(!f.constantified(&attrs, f.root));
    }
}
