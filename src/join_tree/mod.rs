//! The join tree.
//!
//! Join nodes live in an arena ([`JoinTree`]) and refer to each other through
//! [`JoinNodeId`] handles: parent links, relation slots holding children and the
//! dependency sets derived from ON predicates are all handles, so the tree can be
//! mutated freely while analyzers hold read-only views of it.
//!
//! ## Cardinality
//!
//! Whether a join changes the number of result rows is cached per node. Every
//! structural mutation (join type change, ON predicate change, new child) goes through
//! a method here that clears the cache on the node and all its ancestors; the flag is
//! recomputed on the next read.

pub mod alias;

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::expression::{CompoundPredicate, Expression, Predicate};
use crate::join_manager::errors::JoinError;
use crate::schema_catalog::AttributeDescriptor;

pub use alias::{AliasInfo, AliasRegistry, AliasScope, AliasTarget, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinNodeId(usize);

impl JoinNodeId {
    pub fn index(&self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        JoinNodeId(index)
    }
}

impl fmt::Display for JoinNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => " JOIN ",
            JoinType::Left => " LEFT JOIN ",
            JoinType::Right => " RIGHT JOIN ",
        }
    }
}

/// The query clause that caused a join to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClauseType {
    Join,
    Select,
    Where,
    GroupBy,
    Having,
    OrderBy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// `FROM Entity alias`
    Root { entity: String },
    /// `Type(VALUES n) alias`
    Values { type_name: String, row_count: usize },
    /// Subquery root correlated to an outer node: `outerAlias.relation alias`
    Correlated {
        outer: JoinNodeId,
        relation: String,
        attribute: AttributeDescriptor,
    },
    /// Joined through an attribute of the parent
    Association { attribute: AttributeDescriptor },
    /// `JOIN Entity alias ON ...` with no relation to the parent
    EntityJoin { entity: String },
    /// Downcast view of another node
    TreatedView { base: JoinNodeId },
}

#[derive(Debug, Clone)]
pub struct JoinNode {
    pub id: JoinNodeId,
    pub kind: NodeKind,
    pub parent: Option<JoinNodeId>,
    /// Relation name of the slot in the parent this node was reached through
    pub parent_slot: Option<String>,
    pub alias: String,
    /// Absolute path, e.g. `o.items[1]`
    pub path: String,
    /// Managed type name, or the basic type for element collections of basic values
    pub node_type: String,
    pub basic: bool,
    pub join_type: Option<JoinType>,
    pub fetch: bool,
    pub treat_type: Option<String>,
    pub on_predicate: Option<CompoundPredicate>,
    pub dependencies: BTreeSet<JoinNodeId>,
    pub clause_dependencies: BTreeSet<ClauseType>,
    pub slots: BTreeMap<String, JoinTreeNode>,
    pub entity_joins: Vec<JoinNodeId>,
    pub treated_views: Vec<JoinNodeId>,
    pub scope: ScopeId,
    cardinality_mandatory: Cell<Option<bool>>,
}

impl JoinNode {
    /// Type used for attribute lookups below this node
    pub fn effective_type(&self) -> &str {
        self.treat_type.as_deref().unwrap_or(&self.node_type)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The attribute this node was joined through, if any
    pub fn parent_attribute(&self) -> Option<&AttributeDescriptor> {
        match &self.kind {
            NodeKind::Association { attribute } | NodeKind::Correlated { attribute, .. } => {
                Some(attribute)
            }
            _ => None,
        }
    }

    pub fn is_entity_join(&self) -> bool {
        matches!(self.kind, NodeKind::EntityJoin { .. })
    }

    pub fn is_collection(&self) -> bool {
        self.parent_attribute().is_some_and(|a| a.is_plural())
    }

    pub fn has_on_predicate(&self) -> bool {
        self.on_predicate.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Per-relation slot on a join node
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTreeNode {
    pub relation: String,
    pub attribute: AttributeDescriptor,
    pub nodes: Vec<JoinNodeId>,
    pub default_node: Option<JoinNodeId>,
}

/// Parameters for attaching a new node to the arena
#[derive(Debug, Clone)]
pub struct NewNode {
    pub kind: NodeKind,
    pub parent: Option<JoinNodeId>,
    pub parent_slot: Option<String>,
    pub alias: String,
    pub path: String,
    pub node_type: String,
    pub basic: bool,
    pub join_type: Option<JoinType>,
    pub treat_type: Option<String>,
    pub scope: ScopeId,
    pub default_join: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JoinTree {
    nodes: Vec<JoinNode>,
}

impl JoinTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: JoinNodeId) -> &JoinNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: JoinNodeId) -> &mut JoinNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &JoinNode> {
        self.nodes.iter()
    }

    /// Add a node; association nodes are registered in the parent's relation slot
    pub(crate) fn attach(&mut self, new: NewNode) -> JoinNodeId {
        let id = JoinNodeId(self.nodes.len());
        let slot_attribute = match &new.kind {
            NodeKind::Association { attribute } => Some(attribute.clone()),
            _ => None,
        };
        let is_entity_join = matches!(new.kind, NodeKind::EntityJoin { .. });
        let treated_base = match new.kind {
            NodeKind::TreatedView { base } => Some(base),
            _ => None,
        };

        self.nodes.push(JoinNode {
            id,
            kind: new.kind,
            parent: new.parent,
            parent_slot: new.parent_slot.clone(),
            alias: new.alias,
            path: new.path,
            node_type: new.node_type,
            basic: new.basic,
            join_type: new.join_type,
            fetch: false,
            treat_type: new.treat_type,
            on_predicate: None,
            dependencies: BTreeSet::new(),
            clause_dependencies: BTreeSet::new(),
            slots: BTreeMap::new(),
            entity_joins: Vec::new(),
            treated_views: Vec::new(),
            scope: new.scope,
            cardinality_mandatory: Cell::new(None),
        });

        if let Some(base) = treated_base {
            self.nodes[base.0].treated_views.push(id);
            return id;
        }

        if let Some(parent) = new.parent {
            if is_entity_join {
                self.nodes[parent.0].entity_joins.push(id);
            } else if let (Some(relation), Some(attribute)) = (new.parent_slot, slot_attribute) {
                let slot = self.nodes[parent.0]
                    .slots
                    .entry(relation.clone())
                    .or_insert_with(|| JoinTreeNode {
                        relation,
                        attribute,
                        nodes: Vec::new(),
                        default_node: None,
                    });
                slot.nodes.push(id);
                if new.default_join && slot.default_node.is_none() {
                    slot.default_node = Some(id);
                }
            }
            self.invalidate_cardinality(parent);
        }
        id
    }

    /// Replace a VALUES root in place, keeping its alias and scope
    pub(crate) fn rebuild_values_root(&mut self, id: JoinNodeId, row_count: usize) {
        let node = &mut self.nodes[id.0];
        if let NodeKind::Values { row_count: count, .. } = &mut node.kind {
            *count = row_count;
        }
        node.slots.clear();
        node.entity_joins.clear();
        node.treated_views.clear();
        node.dependencies.clear();
        node.on_predicate = None;
        node.cardinality_mandatory.set(None);
    }

    /// The node a treated view stands for; other nodes are their own identity
    pub fn identity(&self, id: JoinNodeId) -> JoinNodeId {
        match self.nodes[id.0].kind {
            NodeKind::TreatedView { base } => self.identity(base),
            _ => id,
        }
    }

    /// Children through relation slots (alphabetical by relation, then by alias),
    /// followed by entity joins
    pub fn children(&self, id: JoinNodeId) -> Vec<JoinNodeId> {
        let node = &self.nodes[id.0];
        let mut result = Vec::new();
        for slot in node.slots.values() {
            let mut siblings = slot.nodes.clone();
            siblings.sort_by(|a, b| self.nodes[a.0].alias.cmp(&self.nodes[b.0].alias));
            result.extend(siblings);
        }
        let mut entity_joins = node.entity_joins.clone();
        entity_joins.sort_by(|a, b| self.nodes[a.0].alias.cmp(&self.nodes[b.0].alias));
        result.extend(entity_joins);
        for view in &node.treated_views {
            result.extend(self.children(*view));
        }
        result
    }

    pub(crate) fn set_join_type(&mut self, id: JoinNodeId, join_type: JoinType) {
        if self.nodes[id.0].join_type != Some(join_type) {
            self.nodes[id.0].join_type = Some(join_type);
            self.invalidate_cardinality(id);
        }
    }

    /// Mark `id` and all its ancestors as fetched
    pub(crate) fn mark_fetch(&mut self, id: JoinNodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &mut self.nodes[node_id.0];
            node.fetch = true;
            current = node.parent;
        }
    }

    // ===== CARDINALITY =====

    /// Cached cardinality-mandatory flag, recomputed if stale
    pub fn is_cardinality_mandatory(&self, id: JoinNodeId) -> bool {
        let node = &self.nodes[id.0];
        if let Some(cached) = node.cardinality_mandatory.get() {
            return cached;
        }
        let computed = self.evaluate_cardinality(id, &|child| self.is_cardinality_mandatory(child));
        node.cardinality_mandatory.set(Some(computed));
        computed
    }

    /// Recompute the flag from scratch, ignoring every cache
    pub fn compute_cardinality_mandatory(&self, id: JoinNodeId) -> bool {
        self.evaluate_cardinality(id, &|child| self.compute_cardinality_mandatory(child))
    }

    fn evaluate_cardinality(&self, id: JoinNodeId, child_mandatory: &dyn Fn(JoinNodeId) -> bool) -> bool {
        let node = &self.nodes[id.0];
        match node.join_type {
            // Roots and treated views are always part of the query
            None => true,
            // Parents of a mandatory child are rendered anyway, so only the join itself counts
            Some(JoinType::Inner) => {
                let optional = match node.parent_attribute() {
                    Some(attr) => attr.optional || attr.is_plural(),
                    None => true,
                };
                optional || node.has_on_predicate()
            }
            Some(JoinType::Left) => {
                (node.has_on_predicate() && !self.is_array_expression_condition(id))
                    || self.children(id).into_iter().any(child_mandatory)
            }
            Some(JoinType::Right) => false,
        }
    }

    /// Clear the cached flag of `id` and of every ancestor
    pub(crate) fn invalidate_cardinality(&self, id: JoinNodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            node.cardinality_mandatory.set(None);
            current = match node.kind {
                NodeKind::TreatedView { base } => Some(base),
                _ => node.parent,
            };
        }
    }

    /// True when the ON predicate is exactly the generated `INDEX(n) = x` / `KEY(n) = x`
    pub fn is_array_expression_condition(&self, id: JoinNodeId) -> bool {
        let Some(on) = &self.nodes[id.0].on_predicate else {
            return false;
        };
        if on.children.len() != 1 {
            return false;
        }
        match &on.children[0] {
            Predicate::Comparison {
                left: Expression::ListIndex(p) | Expression::MapKey(p),
                negated: false,
                ..
            } => p
                .reference
                .as_ref()
                .is_some_and(|r| r.base_node == id && r.field.is_none()),
            _ => false,
        }
    }

    // ===== ON PREDICATES AND DEPENDENCIES =====

    /// Append a conjunct to the node's ON predicate and re-derive its dependencies
    pub(crate) fn add_on_conjunct(&mut self, id: JoinNodeId, predicate: Predicate) -> Result<(), JoinError> {
        let node = &mut self.nodes[id.0];
        match &mut node.on_predicate {
            Some(on) => on.children.push(predicate),
            None => node.on_predicate = Some(CompoundPredicate::and(vec![predicate])),
        }
        self.invalidate_cardinality(id);
        self.register_dependencies(id)
    }

    /// Recompute the dependency set from the ON predicates of the node and of its
    /// treated views. Fails if the new edges close a cycle; the predicate stays
    /// attached in that case.
    pub(crate) fn register_dependencies(&mut self, id: JoinNodeId) -> Result<(), JoinError> {
        let identity = self.identity(id);
        let mut sources = vec![identity];
        sources.extend(self.nodes[identity.0].treated_views.iter().copied());

        let mut dependencies = BTreeSet::new();
        for source in sources {
            if let Some(on) = &self.nodes[source.0].on_predicate {
                for child in &on.children {
                    child.for_each_path(&mut |p| {
                        if let Some(r) = &p.reference {
                            let dep = self.identity(r.base_node);
                            if dep != identity {
                                dependencies.insert(dep);
                            }
                        }
                    });
                }
            }
        }

        if !dependencies.is_empty() {
            log::debug!(
                "Join node {} depends on {:?}",
                self.nodes[identity.0].alias,
                dependencies
                    .iter()
                    .map(|d| self.nodes[d.0].alias.as_str())
                    .collect::<Vec<_>>()
            );
        }
        self.nodes[identity.0].dependencies = dependencies;
        self.check_cycles(identity)
    }

    /// Nodes that must be rendered before `id`: its parent and its dependencies
    fn predecessors(&self, id: JoinNodeId) -> Vec<JoinNodeId> {
        let node = &self.nodes[id.0];
        let mut result: Vec<JoinNodeId> = node.dependencies.iter().copied().collect();
        if let Some(parent) = node.parent {
            let parent = self.identity(parent);
            if !node.dependencies.contains(&parent) {
                result.push(parent);
            }
        }
        result
    }

    /// Depth-first search over parent and dependency edges starting at `id`
    pub(crate) fn check_cycles(&self, id: JoinNodeId) -> Result<(), JoinError> {
        let mut stack = Vec::new();
        let mut done = HashSet::new();
        self.visit_for_cycles(id, &mut stack, &mut done)
    }

    fn visit_for_cycles(
        &self,
        id: JoinNodeId,
        stack: &mut Vec<JoinNodeId>,
        done: &mut HashSet<JoinNodeId>,
    ) -> Result<(), JoinError> {
        if let Some(pos) = stack.iter().position(|n| *n == id) {
            return Err(self.cycle_error(&stack[pos..], id));
        }
        if done.contains(&id) {
            return Ok(());
        }
        stack.push(id);
        for predecessor in self.predecessors(id) {
            self.visit_for_cycles(predecessor, stack, done)?;
        }
        stack.pop();
        done.insert(id);
        Ok(())
    }

    pub(crate) fn cycle_error(&self, chain: &[JoinNodeId], closing: JoinNodeId) -> JoinError {
        let mut aliases: Vec<String> = chain
            .iter()
            .map(|n| self.nodes[n.0].alias.clone())
            .collect();
        aliases.push(self.nodes[closing.0].alias.clone());
        JoinError::CyclicJoinDependency { chain: aliases }
    }

    /// Record that `clause` needs `id`, propagating to its parent chain and its
    /// dependencies
    pub(crate) fn add_clause_dependency(&mut self, id: JoinNodeId, clause: ClauseType) -> Result<(), JoinError> {
        let mut stack = Vec::new();
        let mut done = HashSet::new();
        self.propagate_clause(self.identity(id), clause, &mut stack, &mut done)
    }

    fn propagate_clause(
        &mut self,
        id: JoinNodeId,
        clause: ClauseType,
        stack: &mut Vec<JoinNodeId>,
        done: &mut HashSet<JoinNodeId>,
    ) -> Result<(), JoinError> {
        if let Some(pos) = stack.iter().position(|n| *n == id) {
            return Err(self.cycle_error(&stack[pos..], id));
        }
        if !done.insert(id) {
            return Ok(());
        }
        self.nodes[id.0].clause_dependencies.insert(clause);
        stack.push(id);
        for predecessor in self.predecessors(id) {
            self.propagate_clause(predecessor, clause, stack, done)?;
        }
        stack.pop();
        Ok(())
    }

    /// Every node reachable from `roots` in rendering order, depth first
    pub fn depth_first(&self, roots: &[JoinNodeId]) -> Vec<JoinNodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<JoinNodeId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            result.push(id);
            for child in self.children(id).into_iter().rev() {
                stack.push(child);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::PathExpression;
    use crate::schema_catalog::testing::shop_metamodel;
    use crate::schema_catalog::SchemaCatalog;

    fn tree_with_order() -> (JoinTree, JoinNodeId, ScopeId) {
        let mut registry = AliasRegistry::new();
        let scope = registry.create_scope(None);
        let mut tree = JoinTree::new();
        let root = tree.attach(NewNode {
            kind: NodeKind::Root {
                entity: "Order".to_string(),
            },
            parent: None,
            parent_slot: None,
            alias: "o".to_string(),
            path: "o".to_string(),
            node_type: "Order".to_string(),
            basic: false,
            join_type: None,
            treat_type: None,
            scope,
            default_join: true,
        });
        (tree, root, scope)
    }

    fn attach_child(
        tree: &mut JoinTree,
        parent: JoinNodeId,
        scope: ScopeId,
        relation: &str,
        alias: &str,
        join_type: JoinType,
    ) -> JoinNodeId {
        let model = shop_metamodel();
        let parent_type = tree.node(parent).node_type.clone();
        let attribute = model.attribute(&parent_type, relation).unwrap().clone();
        let target = attribute.target.clone();
        let path = format!("{}.{}", tree.node(parent).path, relation);
        tree.attach(NewNode {
            kind: NodeKind::Association { attribute },
            parent: Some(parent),
            parent_slot: Some(relation.to_string()),
            alias: alias.to_string(),
            path,
            node_type: target,
            basic: false,
            join_type: Some(join_type),
            treat_type: None,
            scope,
            default_join: true,
        })
    }

    fn node_ref(alias: &str, id: JoinNodeId, field: &str) -> Expression {
        let mut path = PathExpression::from_dotted(&format!("{}.{}", alias, field));
        path.reference = Some(crate::expression::PathReference {
            base_node: id,
            field: Some(field.to_string()),
        });
        Expression::Path(path)
    }

    #[test]
    fn test_inner_join_of_required_to_one_is_not_mandatory() {
        let (mut tree, root, scope) = tree_with_order();
        let customer = attach_child(&mut tree, root, scope, "customer", "c", JoinType::Inner);
        assert!(!tree.is_cardinality_mandatory(customer));

        let shipper = attach_child(&mut tree, root, scope, "shipper", "s", JoinType::Inner);
        assert!(tree.is_cardinality_mandatory(shipper));

        // A mandatory child does not make a required inner join mandatory
        let region = attach_child(&mut tree, customer, scope, "region", "r", JoinType::Left);
        tree.add_on_conjunct(
            region,
            Predicate::Comparison {
                operator: crate::expression::ComparisonOperator::Gt,
                left: node_ref("r", region, "id"),
                right: Expression::number(1),
                negated: false,
            },
        )
        .unwrap();
        assert!(tree.is_cardinality_mandatory(region));
        assert!(!tree.is_cardinality_mandatory(customer));
        assert!(!tree.compute_cardinality_mandatory(customer));
    }

    #[test]
    fn test_left_join_becomes_mandatory_through_child() {
        let (mut tree, root, scope) = tree_with_order();
        let items = attach_child(&mut tree, root, scope, "items", "i", JoinType::Left);
        assert!(!tree.is_cardinality_mandatory(items));

        // Cache is filled; changes below the node must invalidate it
        let product = attach_child(&mut tree, items, scope, "product", "p", JoinType::Left);
        assert!(!tree.is_cardinality_mandatory(items));
        tree.set_join_type(product, JoinType::Right);
        assert!(!tree.is_cardinality_mandatory(product));
        assert!(!tree.is_cardinality_mandatory(items));

        tree.set_join_type(product, JoinType::Left);
        tree.add_on_conjunct(
            product,
            Predicate::Comparison {
                operator: crate::expression::ComparisonOperator::Gt,
                left: node_ref("p", product, "id"),
                right: Expression::number(10),
                negated: false,
            },
        )
        .unwrap();
        assert!(tree.is_cardinality_mandatory(product));
        assert!(tree.is_cardinality_mandatory(items));
        assert_eq!(
            tree.is_cardinality_mandatory(items),
            tree.compute_cardinality_mandatory(items)
        );
    }

    #[test]
    fn test_on_predicate_invalidates_cached_flag() {
        let (mut tree, root, scope) = tree_with_order();
        let items = attach_child(&mut tree, root, scope, "items", "i", JoinType::Left);
        assert!(!tree.is_cardinality_mandatory(items));

        tree.add_on_conjunct(
            items,
            Predicate::Comparison {
                operator: crate::expression::ComparisonOperator::Gt,
                left: node_ref("i", items, "price"),
                right: Expression::number(10),
                negated: false,
            },
        )
        .unwrap();
        assert!(tree.is_cardinality_mandatory(items));
        assert!(tree.compute_cardinality_mandatory(items));
    }

    #[test]
    fn test_dependencies_exclude_self_and_detect_cycles() {
        let (mut tree, root, scope) = tree_with_order();
        let items = attach_child(&mut tree, root, scope, "items", "i", JoinType::Left);
        let customer = attach_child(&mut tree, root, scope, "customer", "c", JoinType::Left);

        tree.add_on_conjunct(
            items,
            Predicate::eq(node_ref("i", items, "quantity"), node_ref("c", customer, "id")),
        )
        .unwrap();
        assert_eq!(
            tree.node(items).dependencies.iter().copied().collect::<Vec<_>>(),
            vec![customer]
        );

        let err = tree
            .add_on_conjunct(
                customer,
                Predicate::eq(node_ref("c", customer, "id"), node_ref("i", items, "id")),
            )
            .unwrap_err();
        match err {
            JoinError::CyclicJoinDependency { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert!(chain.contains(&"i".to_string()));
                assert!(chain.contains(&"c".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
        // The offending predicate stays attached
        assert!(tree.node(customer).has_on_predicate());
    }

    #[test]
    fn test_clause_dependency_propagates_to_parent_and_dependencies() {
        let (mut tree, root, scope) = tree_with_order();
        let items = attach_child(&mut tree, root, scope, "items", "i", JoinType::Left);
        let customer = attach_child(&mut tree, root, scope, "customer", "c", JoinType::Inner);
        tree.add_on_conjunct(
            items,
            Predicate::eq(node_ref("i", items, "quantity"), node_ref("c", customer, "id")),
        )
        .unwrap();

        tree.add_clause_dependency(items, ClauseType::OrderBy).unwrap();
        assert!(tree.node(items).clause_dependencies.contains(&ClauseType::OrderBy));
        assert!(tree.node(customer).clause_dependencies.contains(&ClauseType::OrderBy));
        assert!(tree.node(root).clause_dependencies.contains(&ClauseType::OrderBy));
    }

    #[test]
    fn test_children_sorted_by_relation_then_alias() {
        let (mut tree, root, scope) = tree_with_order();
        let items_b = attach_child(&mut tree, root, scope, "items", "b", JoinType::Left);
        let customer = attach_child(&mut tree, root, scope, "customer", "z", JoinType::Inner);
        let items_a = attach_child(&mut tree, root, scope, "items", "a", JoinType::Left);
        assert_eq!(tree.children(root), vec![customer, items_a, items_b]);
        assert_eq!(tree.node(root).slots["items"].default_node, Some(items_b));
        assert_eq!(tree.depth_first(&[root]), vec![root, customer, items_a, items_b]);
    }

    #[test]
    fn test_mark_fetch_marks_ancestors() {
        let (mut tree, root, scope) = tree_with_order();
        let items = attach_child(&mut tree, root, scope, "items", "i", JoinType::Left);
        let product = attach_child(&mut tree, items, scope, "product", "p", JoinType::Inner);
        tree.mark_fetch(product);
        assert!(tree.node(product).fetch);
        assert!(tree.node(items).fetch);
        assert!(tree.node(root).fetch);
    }
}
