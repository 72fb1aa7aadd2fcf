//! Join clause rendering.
//!
//! Joins are written depth-first from the roots, relations alphabetically, siblings
//! by alias, entity joins last. A node is written only after its parent and every
//! node its ON predicate depends on; dependencies that sort later are pulled forward.
//! The text is built in a local buffer, so a dependency cycle yields an error and no
//! partial output.

use std::collections::{BTreeSet, HashSet};

use super::errors::JoinError;
use super::JoinManager;
use super::QueryGraph;
use crate::expression::render::write_path_elements;
use crate::expression::{write_predicate, CompoundPredicate, PathExpression, PathStyle, Predicate};
use crate::join_tree::{ClauseType, JoinNodeId, JoinTree, JoinType, NodeKind};

/// Prints resolved paths through the join tree: `alias.field`, with treated views as
/// `TREAT(alias AS Type).field` and an optional prefix on every alias
pub struct JoinPathStyle<'a> {
    tree: &'a JoinTree,
    alias_prefix: Option<&'a str>,
}

impl<'a> JoinPathStyle<'a> {
    pub fn new(tree: &'a JoinTree, alias_prefix: Option<&'a str>) -> Self {
        JoinPathStyle { tree, alias_prefix }
    }

    pub fn write_alias(&self, out: &mut String, id: JoinNodeId) {
        let node = self.tree.node(id);
        if let NodeKind::TreatedView { base } = node.kind {
            out.push_str("TREAT(");
            self.write_alias(out, base);
            out.push_str(" AS ");
            out.push_str(node.treat_type.as_deref().unwrap_or(&node.node_type));
            out.push(')');
            return;
        }
        if let Some(prefix) = self.alias_prefix {
            out.push_str(prefix);
        }
        out.push_str(&node.alias);
    }
}

impl PathStyle for JoinPathStyle<'_> {
    fn write_path(&self, out: &mut String, path: &PathExpression) {
        match &path.reference {
            Some(reference) => {
                self.write_alias(out, reference.base_node);
                if let Some(field) = &reference.field {
                    out.push('.');
                    out.push_str(field);
                }
            }
            None => write_path_elements(out, path, self),
        }
    }
}

impl JoinManager {
    /// Render ` FROM` with every root and the joins below them.
    ///
    /// With a non-empty `exclusions` set, a join whose clause dependencies all lie in
    /// the set is skipped unless it is cardinality-mandatory; parents and ON predicate
    /// dependencies of rendered joins are always rendered.
    pub fn build_joins(
        &self,
        graph: &QueryGraph,
        exclusions: &BTreeSet<ClauseType>,
        alias_prefix: Option<&str>,
        render_fetches: bool,
    ) -> Result<String, JoinError> {
        let tree = &graph.tree;
        let order = tree.depth_first(self.roots());
        let required = required_nodes(tree, &order, exclusions);

        let mut writer = JoinWriter {
            tree,
            style: JoinPathStyle::new(tree, alias_prefix),
            render_fetches,
            rendered: HashSet::new(),
            in_progress: Vec::new(),
            roots_written: 0,
            out: String::new(),
        };
        for id in order {
            if required.contains(&id) {
                writer.emit(id)?;
            }
        }
        Ok(writer.out)
    }

    /// True when a rendered join traverses a collection that is not pinned to one
    /// element by an index or key predicate
    pub fn has_collections(&self, graph: &QueryGraph, exclusions: &BTreeSet<ClauseType>) -> bool {
        let tree = &graph.tree;
        let order = tree.depth_first(self.roots());
        let required = required_nodes(tree, &order, exclusions);
        order.into_iter().any(|id| {
            required.contains(&id)
                && tree.node(id).is_collection()
                && !tree.is_array_expression_condition(id)
        })
    }
}

/// Nodes that survive the exclusion set, closed over parents and dependencies
pub(crate) fn required_nodes(
    tree: &JoinTree,
    order: &[JoinNodeId],
    exclusions: &BTreeSet<ClauseType>,
) -> HashSet<JoinNodeId> {
    let mut pending: Vec<JoinNodeId> = order
        .iter()
        .copied()
        .filter(|id| {
            let node = tree.node(*id);
            node.is_root()
                || exclusions.is_empty()
                || !node.clause_dependencies.is_subset(exclusions)
                || tree.is_cardinality_mandatory(*id)
        })
        .collect();

    let mut required = HashSet::new();
    while let Some(id) = pending.pop() {
        if !required.insert(id) {
            continue;
        }
        let node = tree.node(id);
        if let Some(parent) = node.parent {
            pending.push(tree.identity(parent));
        }
        pending.extend(node.dependencies.iter().copied());
    }
    required
}

struct JoinWriter<'a> {
    tree: &'a JoinTree,
    style: JoinPathStyle<'a>,
    render_fetches: bool,
    rendered: HashSet<JoinNodeId>,
    in_progress: Vec<JoinNodeId>,
    roots_written: usize,
    out: String,
}

impl JoinWriter<'_> {
    fn emit(&mut self, id: JoinNodeId) -> Result<(), JoinError> {
        if self.rendered.contains(&id) {
            return Ok(());
        }
        if let Some(pos) = self.in_progress.iter().position(|n| *n == id) {
            return Err(self.tree.cycle_error(&self.in_progress[pos..], id));
        }
        self.in_progress.push(id);

        let tree = self.tree;
        let node = tree.node(id);
        if let Some(parent) = node.parent {
            self.emit(tree.identity(parent))?;
        }
        for dependency in &node.dependencies {
            self.emit(*dependency)?;
        }

        self.in_progress.pop();
        self.write_node(id);
        self.rendered.insert(id);
        Ok(())
    }

    fn write_node(&mut self, id: JoinNodeId) {
        let tree = self.tree;
        let node = tree.node(id);
        match &node.kind {
            NodeKind::Root { entity } => {
                self.root_separator();
                self.out.push_str(entity);
                self.out.push(' ');
                self.style.write_alias(&mut self.out, id);
            }
            NodeKind::Values {
                type_name,
                row_count,
            } => {
                self.root_separator();
                self.out
                    .push_str(&format!("{}(VALUES {}) ", type_name, row_count));
                self.style.write_alias(&mut self.out, id);
            }
            NodeKind::Correlated {
                outer, relation, ..
            } => {
                self.root_separator();
                self.style.write_alias(&mut self.out, *outer);
                self.out.push('.');
                self.out.push_str(relation);
                self.out.push(' ');
                self.style.write_alias(&mut self.out, id);
            }
            NodeKind::Association { .. } => {
                self.out
                    .push_str(node.join_type.unwrap_or(JoinType::Inner).keyword());
                if self.render_fetches && node.fetch {
                    self.out.push_str("FETCH ");
                }
                let mut target = String::new();
                if let Some(parent) = node.parent {
                    self.style.write_alias(&mut target, parent);
                    target.push('.');
                }
                target.push_str(node.parent_slot.as_deref().unwrap_or_default());
                match &node.treat_type {
                    Some(treat) => self
                        .out
                        .push_str(&format!("TREAT({} AS {})", target, treat)),
                    None => self.out.push_str(&target),
                }
                self.out.push(' ');
                self.style.write_alias(&mut self.out, id);
                self.write_on(id);
            }
            NodeKind::EntityJoin { entity } => {
                self.out
                    .push_str(node.join_type.unwrap_or(JoinType::Inner).keyword());
                self.out.push_str(entity);
                self.out.push(' ');
                self.style.write_alias(&mut self.out, id);
                self.write_on(id);
            }
            // Views are written through their base node
            NodeKind::TreatedView { .. } => {}
        }
    }

    fn root_separator(&mut self) {
        self.out
            .push_str(if self.roots_written == 0 { " FROM " } else { ", " });
        self.roots_written += 1;
    }

    /// ON predicate of the node merged with those of its treated views
    fn write_on(&mut self, id: JoinNodeId) {
        let tree = self.tree;
        let node = tree.node(id);
        let mut conjuncts: Vec<Predicate> = Vec::new();
        for source in std::iter::once(id).chain(node.treated_views.iter().copied()) {
            if let Some(on) = &tree.node(source).on_predicate {
                conjuncts.extend(on.children.iter().cloned());
            }
        }
        if conjuncts.is_empty() {
            return;
        }
        self.out.push_str(" ON ");
        write_predicate(
            &mut self.out,
            &Predicate::Compound(CompoundPredicate::and(conjuncts)),
            &self.style,
        );
    }
}
