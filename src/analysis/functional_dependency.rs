//! Functional-dependency analysis.
//!
//! Decides whether an ordered list of resolved expressions identifies at most one
//! row, and which of those expressions the rest depend on.
//!
//! # Key Components
//!
//! - [`FunctionalDependencyAnalyzer::analyze_forms_unique_tuple`]: feed expressions one
//!   at a time; the answer is cumulative over everything analyzed since the last
//!   [`clear`](FunctionalDependencyAnalyzer::clear)
//! - [`FunctionalDependencyAnalyzer::functional_dependency_root_expressions`]: the
//!   smallest subset of candidates that still determines all of them
//!
//! # Uniqueness of a path
//!
//! A path is unique once every identifying attribute of the node it is keyed on is
//! either ordered by or constantified, and every hop from that node up to its root
//! keeps one row per parent row:
//!
//! - one-to-one: always
//! - many-to-one: only if the parent is a single row
//! - collection: only if the element is pinned by index/key or is a single row
//! - entity join: only if the joined node is a single row
//!
//! A node is a single row when it is constantified, or when it hangs off a single-row
//! node through to-one joins. Other roots of the same query multiply rows unless they
//! are single rows too.

use std::collections::{BTreeSet, HashMap};

use super::errors::AnalysisError;
use super::{identifying_paths, key_type, node_key, ConstantifiedAttributes, EmbeddableSplitter, NodeKey};
use crate::expression::function_registry::{function_kind, FunctionKind};
use crate::expression::{write_expression, Expression, FunctionExpression, PathExpression};
use crate::join_manager::JoinPathStyle;
use crate::join_tree::{JoinNodeId, JoinTree, NodeKind};
use crate::schema_catalog::{AttributeDescriptor, AttributeKind, SchemaCatalog};

/// A candidate expression together with its rendered text
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExpression {
    pub text: String,
    pub expression: Expression,
}

impl ResolvedExpression {
    pub fn new(tree: &JoinTree, expression: Expression) -> Self {
        let mut text = String::new();
        write_expression(&mut text, &expression, &JoinPathStyle::new(tree, None));
        ResolvedExpression { text, expression }
    }
}

#[derive(Debug, Clone)]
struct RootEntry {
    key: Option<NodeKey>,
    indices: Vec<usize>,
    /// All identifying attributes of the key are covered
    formed: bool,
}

pub struct FunctionalDependencyAnalyzer<'a> {
    catalog: &'a dyn SchemaCatalog,
    tree: &'a JoinTree,
    constantified: &'a ConstantifiedAttributes,
    /// Identifying attributes per key not yet ordered by or constantified
    missing: HashMap<NodeKey, BTreeSet<String>>,
    /// Expressions that contributed identifying attributes per key
    forming: HashMap<NodeKey, Vec<usize>>,
    entries: Vec<RootEntry>,
    current: Option<usize>,
    last_key: Option<NodeKey>,
    in_key: bool,
    result_unique: bool,
}

impl<'a> FunctionalDependencyAnalyzer<'a> {
    pub fn new(
        catalog: &'a dyn SchemaCatalog,
        tree: &'a JoinTree,
        constantified: &'a ConstantifiedAttributes,
    ) -> Self {
        FunctionalDependencyAnalyzer {
            catalog,
            tree,
            constantified,
            missing: HashMap::new(),
            forming: HashMap::new(),
            entries: Vec::new(),
            current: None,
            last_key: None,
            in_key: false,
            result_unique: false,
        }
    }

    pub fn clear(&mut self) {
        self.missing.clear();
        self.forming.clear();
        self.entries.clear();
        self.current = None;
        self.last_key = None;
        self.in_key = false;
        self.result_unique = false;
    }

    /// Whether the expressions analyzed so far form a unique tuple
    pub fn is_result_unique(&self) -> bool {
        self.result_unique
    }

    /// Add `expr` to the analyzed tuple and report whether the tuple is now unique
    pub fn analyze_forms_unique_tuple(&mut self, expr: &Expression) -> Result<bool, AnalysisError> {
        self.last_key = None;
        let mut unique = self.visit(expr)?;
        if unique {
            if let Some(key) = self.last_key.clone() {
                unique = self.hops_preserve_uniqueness(&key);
            }
        }
        self.result_unique |= unique;
        Ok(self.result_unique)
    }

    /// The subset of `candidates` that determines all of them, in candidate order.
    /// Embedded identifiers are split into their components first. `None` when there
    /// is nothing to depend on.
    pub fn functional_dependency_root_expressions(
        &mut self,
        candidates: &[ResolvedExpression],
    ) -> Result<Option<Vec<ResolvedExpression>>, AnalysisError> {
        self.clear();
        let splitter = EmbeddableSplitter::new(self.catalog, self.tree);
        let mut expanded = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match splitter.split(&candidate.expression) {
                Some(parts) => {
                    expanded.extend(parts.into_iter().map(|p| ResolvedExpression::new(self.tree, p)))
                }
                None => expanded.push(candidate.clone()),
            }
        }

        for (index, candidate) in expanded.iter().enumerate() {
            self.current = Some(index);
            self.analyze_forms_unique_tuple(&candidate.expression)?;
            if self.last_key.is_none() {
                self.entries.push(RootEntry {
                    key: None,
                    indices: vec![index],
                    formed: false,
                });
            }
        }
        self.current = None;

        if self.entries.is_empty() {
            return Ok(None);
        }
        let mut selected: BTreeSet<usize> = BTreeSet::new();
        if let [single] = self.entries.as_slice() {
            selected.extend(single.indices.iter().copied());
        } else {
            for entry in &self.entries {
                let dependent = entry
                    .key
                    .as_ref()
                    .is_some_and(|key| self.depends_on_formed_ancestor(key));
                if !dependent {
                    selected.extend(entry.indices.iter().copied());
                }
            }
        }
        log::debug!(
            "Functional dependency roots: {} of {} expressions, unique: {}",
            selected.len(),
            expanded.len(),
            self.result_unique
        );
        Ok(Some(selected.into_iter().map(|i| expanded[i].clone()).collect()))
    }

    // ===== EXPRESSIONS =====

    fn visit(&mut self, expr: &Expression) -> Result<bool, AnalysisError> {
        match expr {
            Expression::Path(path) => self.visit_path(path),
            Expression::ListIndex(path) | Expression::MapKey(path) => {
                let previous = self.in_key;
                self.in_key = true;
                let result = self.visit_path(path);
                self.in_key = previous;
                result
            }
            Expression::Function(func) => self.visit_function(func),
            Expression::Parameter(_)
            | Expression::Literal(_)
            | Expression::Arithmetic { .. }
            | Expression::Case(_)
            | Expression::Subquery(_) => Ok(false),
        }
    }

    fn visit_function(&mut self, func: &FunctionExpression) -> Result<bool, AnalysisError> {
        match function_kind(&func.name) {
            FunctionKind::ValuePreservingAggregate => match func.arguments.first() {
                Some(Expression::Path(path)) => self.visit_path(path),
                _ => Ok(false),
            },
            FunctionKind::FirstArgument => match func.arguments.first() {
                Some(first) => self.visit(first),
                None => Ok(false),
            },
            FunctionKind::RowNumbering => Ok(func.filter.is_none()
                && func
                    .window
                    .as_ref()
                    .is_some_and(|w| w.partition_by.is_empty())),
            FunctionKind::Aggregate | FunctionKind::Window | FunctionKind::Scalar => Ok(false),
        }
    }

    fn visit_path(&mut self, path: &PathExpression) -> Result<bool, AnalysisError> {
        let Some(reference) = &path.reference else {
            return Err(AnalysisError::UnresolvedPath {
                path: path.path_text(),
            });
        };
        let base = reference.base_node;
        let node = self.tree.node(base);

        let Some(field) = &reference.field else {
            let key = NodeKey::Node(self.tree.identity(base));
            self.last_key = Some(key.clone());
            if node.basic || self.in_key {
                self.form(key);
                return Ok(true);
            }
            return Err(AnalysisError::AssociationOrdering {
                path: path.path_text(),
            });
        };

        let attr = self.catalog.resolve_attribute_path(node.effective_type(), field)?;
        if attr.is_plural() {
            let key = NodeKey::Node(self.tree.identity(base));
            self.last_key = Some(key.clone());
            if self.in_key {
                self.form(key);
                return Ok(true);
            }
            return Err(AnalysisError::PluralAttributeOrdering {
                path: path.path_text(),
            });
        }
        if attr.kind.is_to_one() {
            return Err(AnalysisError::AssociationOrdering {
                path: path.path_text(),
            });
        }

        let leaves: Vec<String> = if attr.kind == AttributeKind::Embedded {
            self.catalog
                .singular_paths(&attr.target)
                .into_iter()
                .map(|leaf| format!("{}.{}", field, leaf))
                .collect()
        } else {
            vec![field.clone()]
        };
        let (key, _) = node_key(self.catalog, self.tree, base, field);
        let attributes: Vec<String> = leaves
            .iter()
            .map(|leaf| node_key(self.catalog, self.tree, base, leaf).1)
            .collect();
        self.last_key = Some(key.clone());

        let identifying = match key_type(self.catalog, self.tree, &key) {
            Some(type_name) => identifying_paths(self.catalog, &type_name),
            None => Vec::new(),
        };
        if !self.missing.contains_key(&key) {
            let unpinned: BTreeSet<String> = identifying
                .iter()
                .filter(|a| !self.is_pinned(&key, a))
                .cloned()
                .collect();
            self.missing.insert(key.clone(), unpinned);
        }

        let identifies = attributes.iter().any(|a| identifying.contains(a));
        let missing = self.missing.entry(key.clone()).or_default();
        if identifies {
            for attribute in &attributes {
                missing.remove(attribute);
            }
        }
        let complete = missing.is_empty() && !identifying.is_empty();

        if complete {
            if identifies {
                self.push_forming(&key);
            }
            self.form(key);
            Ok(true)
        } else {
            if identifies {
                self.push_forming(&key);
            }
            self.register_dependent(key);
            Ok(false)
        }
    }

    // ===== ROOT EXPRESSIONS =====

    fn push_forming(&mut self, key: &NodeKey) {
        if let Some(index) = self.current {
            self.forming.entry(key.clone()).or_default().push(index);
        }
    }

    /// The key is now unique; its entry keeps only the expressions that made it so
    fn form(&mut self, key: NodeKey) {
        let Some(index) = self.current else {
            return;
        };
        let mut indices = self.forming.get(&key).cloned().unwrap_or_default();
        if indices.is_empty() {
            indices.push(index);
        }
        match self.entries.iter_mut().find(|e| e.key.as_ref() == Some(&key)) {
            Some(entry) if entry.formed => {}
            Some(entry) => {
                entry.indices = indices;
                entry.formed = true;
            }
            None => self.entries.push(RootEntry {
                key: Some(key),
                indices,
                formed: true,
            }),
        }
    }

    fn register_dependent(&mut self, key: NodeKey) {
        let Some(index) = self.current else {
            return;
        };
        match self.entries.iter_mut().find(|e| e.key.as_ref() == Some(&key)) {
            Some(entry) if entry.formed => {}
            Some(entry) => entry.indices.push(index),
            None => self.entries.push(RootEntry {
                key: Some(key),
                indices: vec![index],
                formed: false,
            }),
        }
    }

    fn is_formed(&self, key: &NodeKey) -> bool {
        self.entries
            .iter()
            .any(|e| e.formed && e.key.as_ref() == Some(key))
    }

    /// True when `key` is reached from a unique node through to-one hops only, so its
    /// expressions follow from that node's
    fn depends_on_formed_ancestor(&self, key: &NodeKey) -> bool {
        let mut current = match key {
            NodeKey::Association(node, _) => {
                if self.is_formed(&NodeKey::Node(*node)) {
                    return true;
                }
                *node
            }
            NodeKey::Node(node) => *node,
        };
        loop {
            let node = self.tree.node(current);
            let (NodeKind::Association { attribute }, Some(parent)) = (&node.kind, node.parent) else {
                return false;
            };
            if !attribute.kind.is_to_one() {
                return false;
            }
            let parent = self.tree.identity(parent);
            if self.is_formed(&NodeKey::Node(parent)) {
                return true;
            }
            current = parent;
        }
    }

    // ===== HOPS =====

    fn is_pinned(&self, key: &NodeKey, attribute: &str) -> bool {
        if self.constantified.is_definite(key, attribute) {
            return true;
        }
        let NodeKey::Node(node) = key else {
            return false;
        };
        let node = self.tree.node(*node);
        match (&node.kind, node.parent, &node.parent_slot) {
            (NodeKind::Association { attribute: attr }, Some(parent), Some(slot)) if attr.kind.is_to_one() => {
                self.constantified.is_definite(
                    &NodeKey::Association(self.tree.identity(parent), slot.clone()),
                    attribute,
                )
            }
            _ => false,
        }
    }

    fn is_constantified(&self, node: JoinNodeId) -> bool {
        self.constantified.is_constantified(self.tree, self.catalog, node)
    }

    /// Constantified, or reached from a single-row node through to-one hops only
    fn is_single_row(&self, node: JoinNodeId) -> bool {
        if self.is_constantified(node) {
            return true;
        }
        let join_node = self.tree.node(node);
        match (&join_node.kind, join_node.parent) {
            (NodeKind::Association { attribute }, Some(parent)) if attribute.kind.is_to_one() => {
                self.is_single_row(self.tree.identity(parent))
            }
            _ => false,
        }
    }

    fn hops_preserve_uniqueness(&self, key: &NodeKey) -> bool {
        let mut current = match key {
            NodeKey::Node(node) => *node,
            NodeKey::Association(node, relation) => {
                let node_type = self.tree.node(*node).effective_type();
                match self.catalog.resolve_attribute_path(node_type, relation) {
                    Ok(attr) if self.to_one_hop_preserves(attr, *node) => *node,
                    _ => return false,
                }
            }
        };

        loop {
            let node = self.tree.node(current);
            match &node.kind {
                NodeKind::Root { .. } | NodeKind::Values { .. } => {
                    return self.other_roots_constantified(current);
                }
                NodeKind::Correlated { outer, attribute, .. } => {
                    return self.hop_preserves(current, attribute, *outer);
                }
                NodeKind::TreatedView { base } => current = *base,
                NodeKind::EntityJoin { .. } => {
                    let Some(parent) = node.parent else {
                        return false;
                    };
                    if !self.is_single_row(current) {
                        log::trace!("Entity join {} breaks uniqueness", node.alias);
                        return false;
                    }
                    current = self.tree.identity(parent);
                }
                NodeKind::Association { attribute } => {
                    let Some(parent) = node.parent else {
                        return false;
                    };
                    let parent = self.tree.identity(parent);
                    if !self.hop_preserves(current, attribute, parent) {
                        log::trace!("Join {} breaks uniqueness", node.alias);
                        return false;
                    }
                    current = parent;
                }
            }
        }
    }

    fn hop_preserves(&self, node: JoinNodeId, attribute: &AttributeDescriptor, parent: JoinNodeId) -> bool {
        if attribute.is_plural() {
            self.tree.is_array_expression_condition(node) || self.is_single_row(node)
        } else {
            self.to_one_hop_preserves(attribute, parent)
        }
    }

    fn to_one_hop_preserves(&self, attribute: &AttributeDescriptor, parent: JoinNodeId) -> bool {
        match attribute.kind {
            AttributeKind::OneToOne => true,
            _ => self.is_single_row(parent),
        }
    }

    /// A second root is a cross join
    fn other_roots_constantified(&self, root: JoinNodeId) -> bool {
        let scope = self.tree.node(root).scope;
        self.tree
            .nodes()
            .filter(|n| n.id != root && n.scope == scope)
            .filter(|n| {
                matches!(
                    n.kind,
                    NodeKind::Root { .. } | NodeKind::Values { .. } | NodeKind::Correlated { .. }
                )
            })
            .all(|n| self.is_single_row(n.id))
    }
}
