//! Join management and path resolution.
//!
//! [`JoinManager`] turns dotted attribute paths into nodes of the shared [`JoinTree`]
//! and keeps the [`AliasRegistry`] in sync with it. One manager exists per query (and
//! per subquery); all of them operate on the same [`QueryGraph`], which is passed in
//! explicitly so that a subquery can create joins below nodes of its enclosing query.
//!
//! # Key Components
//!
//! - [`JoinManager`] - roots, explicit/implicit/entity joins, fetch, path resolution
//! - [`ImplicitJoinContext`] - what the clause being resolved allows and requires
//! - [`render`] - join clause rendering and the tree-aware path printer
//!
//! # Resolution order
//!
//! For every path:
//! 1. the first segment is looked up as an alias (local scope first, then enclosing
//!    scopes); select aliases are substituted or left as references,
//! 2. index qualifiers (`items[:i]`) are resolved before anything else,
//! 3. the whole path is validated against the schema catalog without touching the
//!    tree, so a failing path never leaves partial joins behind,
//! 4. `assoc.id` is satisfied from the foreign key when enabled,
//! 5. remaining segments create or reuse join nodes one relation at a time.

pub mod errors;
pub mod render;

use std::sync::Arc;

use crate::{
    config::PlannerConfig,
    expression::{
        parse_join_path, parse_path, CompoundPredicate, Expression, PathElement, PathExpression,
        PathReference, Predicate, BooleanOperator, Literal,
    },
    join_tree::{
        alias::{conflict, is_valid_alias},
        AliasInfo, AliasRegistry, AliasTarget, ClauseType, JoinNodeId, JoinTree,
        JoinType, NewNode, NodeKind, ScopeId,
    },
    schema_catalog::{
        AttributeDescriptor, AttributeKind, CollectionKind, SchemaCatalog, SchemaCatalogError,
        TypeKind,
    },
};

pub use errors::JoinError;

pub use render::JoinPathStyle;

/// The join arena and alias scopes shared by a query and all of its subqueries
#[derive(Debug, Clone, Default)]
pub struct QueryGraph {
    pub tree: JoinTree,
    pub aliases: AliasRegistry,
}

impl QueryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Flags describing where a path occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImplicitJoinContext {
    /// Clause recorded as dependency on every node the path touches
    pub clause: Option<ClauseType>,
    /// A trailing association or collection must become a join node instead of a
    /// field of its parent (select items, fetches, `KEY`/`INDEX` arguments)
    pub join_required: bool,
    /// Set while resolving the expression behind a select alias
    pub from_select_alias: bool,
    /// Set while resolving paths of a subquery select list
    pub from_subquery: bool,
}

impl ImplicitJoinContext {
    pub fn for_clause(clause: ClauseType) -> Self {
        ImplicitJoinContext {
            clause: Some(clause),
            join_required: clause == ClauseType::Select,
            from_select_alias: false,
            from_subquery: false,
        }
    }
}

/// One validated step of a path below its start node
#[derive(Debug, Clone)]
enum Step {
    Join {
        relation: String,
        attribute: AttributeDescriptor,
        index: Option<Expression>,
    },
    Field(String),
}

enum Start {
    Node { node: JoinNodeId, skip: usize },
    /// Whole reference to a select alias, left for the renderer to print as is
    SelectAlias,
    /// Local select alias whose expression replaces the path
    Substitute(Expression),
}

#[derive(Debug, Clone)]
pub struct JoinManager {
    scope: ScopeId,
    roots: Vec<JoinNodeId>,
    catalog: Arc<dyn SchemaCatalog>,
    config: Arc<PlannerConfig>,
}

impl JoinManager {
    /// Create a manager with a fresh alias scope, nested in `parent_scope` for
    /// subqueries
    pub fn new(
        graph: &mut QueryGraph,
        parent_scope: Option<ScopeId>,
        catalog: Arc<dyn SchemaCatalog>,
        config: Arc<PlannerConfig>,
    ) -> Self {
        let scope = graph.aliases.create_scope(parent_scope);
        JoinManager {
            scope,
            roots: Vec::new(),
            catalog,
            config,
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn roots(&self) -> &[JoinNodeId] {
        &self.roots
    }

    pub fn catalog(&self) -> &dyn SchemaCatalog {
        self.catalog.as_ref()
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Join node registered for `alias`, visible from this query
    pub fn node_for_alias(&self, graph: &QueryGraph, alias: &str) -> Option<JoinNodeId> {
        graph
            .aliases
            .lookup(self.scope, alias)
            .and_then(|info| info.join_node())
    }

    // ===== ROOTS =====

    /// `FROM Entity alias`
    pub fn add_root(
        &mut self,
        graph: &mut QueryGraph,
        entity: &str,
        alias: &str,
    ) -> Result<JoinNodeId, JoinError> {
        let managed = self.require_type(entity)?;
        if managed.kind != TypeKind::Entity {
            return Err(JoinError::InvalidJoin {
                path: alias.to_string(),
                reason: format!("`{}` is not an entity", entity),
            });
        }
        self.ensure_alias_free(graph, self.scope, alias, alias)?;

        let id = graph.tree.attach(NewNode {
            kind: NodeKind::Root {
                entity: entity.to_string(),
            },
            parent: None,
            parent_slot: None,
            alias: alias.to_string(),
            path: alias.to_string(),
            node_type: entity.to_string(),
            basic: false,
            join_type: None,
            treat_type: None,
            scope: self.scope,
            default_join: true,
        });
        self.register_join_alias(graph, self.scope, alias, alias, false, id)?;
        self.roots.push(id);
        log::debug!("Added root {} {}", entity, alias);
        Ok(id)
    }

    /// `Type(VALUES n) alias`. Calling it again for an existing VALUES alias rebuilds
    /// that root with the new row count, dropping every join below it.
    pub fn add_values_root(
        &mut self,
        graph: &mut QueryGraph,
        type_name: &str,
        alias: &str,
        row_count: usize,
    ) -> Result<JoinNodeId, JoinError> {
        let existing = self.roots.iter().copied().find(|r| {
            let node = graph.tree.node(*r);
            node.alias == alias && matches!(node.kind, NodeKind::Values { .. })
        });
        if let Some(id) = existing {
            if graph.tree.node(id).node_type != type_name {
                return Err(JoinError::InvalidJoin {
                    path: alias.to_string(),
                    reason: format!(
                        "VALUES root already declared with type `{}`",
                        graph.tree.node(id).node_type
                    ),
                });
            }
            let descendants: Vec<JoinNodeId> = graph
                .tree
                .depth_first(&[id])
                .into_iter()
                .filter(|n| *n != id)
                .collect();
            for node in descendants {
                let (scope, node_alias) = {
                    let n = graph.tree.node(node);
                    (n.scope, n.alias.clone())
                };
                graph.aliases.unregister(scope, &node_alias);
            }
            graph.tree.rebuild_values_root(id, row_count);
            log::debug!("Rebuilt VALUES root {} with {} rows", alias, row_count);
            return Ok(id);
        }

        let basic = self.catalog.managed_type(type_name).is_none();
        self.ensure_alias_free(graph, self.scope, alias, alias)?;
        let id = graph.tree.attach(NewNode {
            kind: NodeKind::Values {
                type_name: type_name.to_string(),
                row_count,
            },
            parent: None,
            parent_slot: None,
            alias: alias.to_string(),
            path: alias.to_string(),
            node_type: type_name.to_string(),
            basic,
            join_type: None,
            treat_type: None,
            scope: self.scope,
            default_join: true,
        });
        self.register_join_alias(graph, self.scope, alias, alias, false, id)?;
        self.roots.push(id);
        Ok(id)
    }

    /// Subquery root correlated to a node of an enclosing query, e.g. `o.items`
    pub fn add_correlated_root(
        &mut self,
        graph: &mut QueryGraph,
        path: &str,
        alias: &str,
    ) -> Result<JoinNodeId, JoinError> {
        atomically(graph, |graph| self.correlate(graph, path, alias))
    }

    fn correlate(
        &mut self,
        graph: &mut QueryGraph,
        path: &str,
        alias: &str,
    ) -> Result<JoinNodeId, JoinError> {
        let mut parsed = parse_path(path)?;
        let first = parsed.first_name().unwrap_or_default().to_string();
        let outer = match graph.aliases.lookup(self.scope, &first) {
            Some(info) if info.is_select_alias() => {
                return Err(JoinError::ExternalAliasDereference {
                    alias: first,
                    path: path.to_string(),
                })
            }
            Some(info) if graph.aliases.is_external(self.scope, info) => {
                info.join_node().ok_or_else(|| JoinError::UnknownAlias {
                    alias: first.clone(),
                })?
            }
            _ => return Err(JoinError::UnknownAlias { alias: first }),
        };
        if parsed.elements.len() < 2 {
            return Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: "a correlation path needs at least one relation".to_string(),
            });
        }

        let ctx = ImplicitJoinContext {
            clause: None,
            join_required: true,
            from_select_alias: false,
            from_subquery: true,
        };
        self.resolve_index_expressions(graph, &mut parsed, 1, ctx)?;
        let steps = self.plan(graph, outer, &parsed.elements[1..], path, ctx)?;
        let Some((last, prefix)) = steps.split_last() else {
            return Err(JoinError::unresolvable(path, first, "empty correlation path"));
        };
        let Step::Join {
            relation,
            attribute,
            index: None,
        } = last
        else {
            return Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: "correlation must end in an unqualified association".to_string(),
            });
        };
        self.ensure_alias_free(graph, self.scope, alias, path)?;

        let base = self.execute(graph, outer, prefix, ctx)?.base_node;
        let basic = self.catalog.managed_type(&attribute.target).is_none();
        let id = graph.tree.attach(NewNode {
            kind: NodeKind::Correlated {
                outer: base,
                relation: relation.clone(),
                attribute: attribute.clone(),
            },
            parent: None,
            parent_slot: None,
            alias: alias.to_string(),
            path: path.to_string(),
            node_type: attribute.target.clone(),
            basic,
            join_type: None,
            treat_type: None,
            scope: self.scope,
            default_join: false,
        });
        self.register_join_alias(graph, self.scope, alias, path, false, id)?;
        self.roots.push(id);
        log::debug!("Correlated {} as {}", path, alias);
        Ok(id)
    }

    // ===== EXPLICIT JOINS =====

    /// Explicitly join `path` (optionally `TREAT(path AS Type)`) under `alias`.
    ///
    /// A default join reuses the slot's default node; an existing implicit alias is
    /// promoted to `alias` and takes the requested join type. Two different explicit
    /// aliases for the same default join are a conflict.
    pub fn join(
        &self,
        graph: &mut QueryGraph,
        path: &str,
        alias: &str,
        join_type: JoinType,
        fetch: bool,
        default_join: bool,
    ) -> Result<JoinNodeId, JoinError> {
        atomically(graph, |graph| {
            self.join_in(graph, path, alias, join_type, fetch, default_join)
        })
    }

    fn join_in(
        &self,
        graph: &mut QueryGraph,
        path: &str,
        alias: &str,
        join_type: JoinType,
        fetch: bool,
        default_join: bool,
    ) -> Result<JoinNodeId, JoinError> {
        let (mut parsed, treat_type) = parse_join_path(path)?;
        let ctx = ImplicitJoinContext {
            clause: None,
            join_required: true,
            ..Default::default()
        };
        let (start, skip) = match self.locate_start(graph, &parsed, path, ctx)? {
            Start::Node { node, skip } => (node, skip),
            Start::SelectAlias | Start::Substitute(_) => {
                return Err(JoinError::SelectAliasDereference {
                    alias: parsed.first_name().unwrap_or_default().to_string(),
                    path: path.to_string(),
                })
            }
        };
        if graph.tree.node(start).scope != self.scope {
            return Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: "joins through an enclosing query alias need a correlated root"
                    .to_string(),
            });
        }
        self.resolve_index_expressions(graph, &mut parsed, skip, ctx)?;
        let steps = self.plan(graph, start, &parsed.elements[skip..], path, ctx)?;

        let Some((last, prefix)) = steps.split_last() else {
            return Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: "nothing to join".to_string(),
            });
        };
        let Step::Join {
            relation,
            attribute,
            index,
        } = last
        else {
            return Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: "not an association or collection".to_string(),
            });
        };
        if let Some(treat) = &treat_type {
            self.check_treat(&attribute.target, treat, path)?;
        }
        if let Some(existing) = graph.aliases.lookup(self.scope, alias) {
            if existing.is_select_alias() {
                return Err(conflict(existing, alias, path));
            }
        }

        let parent = self.execute(graph, start, prefix, ctx)?.base_node;
        let id = self.explicit_join_node(
            graph,
            parent,
            relation,
            attribute,
            index.as_ref(),
            treat_type,
            alias,
            join_type,
            default_join,
        )?;
        if fetch {
            self.mark_fetch(graph, id, path)?;
        }
        Ok(id)
    }

    /// Explicit join with an additional ON predicate. Paths inside the predicate are
    /// resolved with the Join clause. Any failure but a dependency cycle leaves the
    /// graph untouched; a predicate closing a cycle stays attached and the cycle is
    /// reported.
    pub fn join_on(
        &self,
        graph: &mut QueryGraph,
        path: &str,
        alias: &str,
        join_type: JoinType,
        mut on: Predicate,
    ) -> Result<JoinNodeId, JoinError> {
        atomically(graph, |graph| {
            let id = self.join_in(graph, path, alias, join_type, false, false)?;
            self.join_predicate(graph, &mut on, ImplicitJoinContext::for_clause(ClauseType::Join))?;
            for conjunct in flatten_conjuncts(on) {
                graph.tree.add_on_conjunct(id, conjunct)?;
            }
            Ok(id)
        })
    }

    /// `JOIN Entity alias ON ...` below the node registered for `base_alias`
    pub fn entity_join(
        &self,
        graph: &mut QueryGraph,
        base_alias: &str,
        entity: &str,
        alias: &str,
        join_type: JoinType,
        on: Predicate,
    ) -> Result<JoinNodeId, JoinError> {
        let base = self
            .node_for_alias(graph, base_alias)
            .ok_or_else(|| JoinError::UnknownAlias {
                alias: base_alias.to_string(),
            })?;
        let managed = self.require_type(entity)?;
        if managed.kind != TypeKind::Entity {
            return Err(JoinError::InvalidJoin {
                path: entity.to_string(),
                reason: "entity joins need an entity type".to_string(),
            });
        }
        self.ensure_alias_free(graph, self.scope, alias, alias)?;

        atomically(graph, |graph| {
            self.attach_entity_join(graph, base, base_alias, entity, alias, join_type, on)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn attach_entity_join(
        &self,
        graph: &mut QueryGraph,
        base: JoinNodeId,
        base_alias: &str,
        entity: &str,
        alias: &str,
        join_type: JoinType,
        mut on: Predicate,
    ) -> Result<JoinNodeId, JoinError> {
        let id = graph.tree.attach(NewNode {
            kind: NodeKind::EntityJoin {
                entity: entity.to_string(),
            },
            parent: Some(base),
            parent_slot: None,
            alias: alias.to_string(),
            path: alias.to_string(),
            node_type: entity.to_string(),
            basic: false,
            join_type: Some(join_type),
            treat_type: None,
            scope: self.scope,
            default_join: false,
        });
        self.register_join_alias(graph, self.scope, alias, alias, false, id)?;
        log::debug!("Entity join {} {} below {}", entity, alias, base_alias);

        self.join_predicate(graph, &mut on, ImplicitJoinContext::for_clause(ClauseType::Join))?;
        for conjunct in flatten_conjuncts(on) {
            graph.tree.add_on_conjunct(id, conjunct)?;
        }
        Ok(id)
    }

    /// Register a downcast view `TREAT(alias AS treat_type)` of an existing node
    /// under `view_alias`. The view shares the base node's slot and dependencies.
    pub fn treated_view(
        &self,
        graph: &mut QueryGraph,
        alias: &str,
        treat_type: &str,
        view_alias: &str,
    ) -> Result<JoinNodeId, JoinError> {
        let base = self
            .node_for_alias(graph, alias)
            .ok_or_else(|| JoinError::UnknownAlias {
                alias: alias.to_string(),
            })?;
        let (parent, node_type, base_path, scope) = {
            let node = graph.tree.node(base);
            (node.parent, node.node_type.clone(), node.path.clone(), node.scope)
        };
        let path = format!("TREAT({} AS {})", base_path, treat_type);
        self.check_treat(&node_type, treat_type, &path)?;
        self.ensure_alias_free(graph, scope, view_alias, &path)?;

        let id = graph.tree.attach(NewNode {
            kind: NodeKind::TreatedView { base },
            parent,
            parent_slot: None,
            alias: view_alias.to_string(),
            path: path.clone(),
            node_type,
            basic: false,
            join_type: None,
            treat_type: Some(treat_type.to_string()),
            scope,
            default_join: false,
        });
        self.register_join_alias(graph, scope, view_alias, &path, false, id)?;
        Ok(id)
    }

    /// Join `path` if needed and mark it and its ancestors as fetched
    pub fn fetch(&self, graph: &mut QueryGraph, path: &str) -> Result<JoinNodeId, JoinError> {
        atomically(graph, |graph| self.fetch_in(graph, path))
    }

    fn fetch_in(&self, graph: &mut QueryGraph, path: &str) -> Result<JoinNodeId, JoinError> {
        let mut parsed = parse_path(path)?;
        let reference = self
            .resolve_in(graph, &mut parsed, ImplicitJoinContext::for_clause(ClauseType::Select))?;
        match reference {
            Some(PathReference {
                base_node,
                field: None,
            }) => {
                self.mark_fetch(graph, base_node, path)?;
                Ok(base_node)
            }
            _ => Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: "only associations and collections can be fetched".to_string(),
            }),
        }
    }

    fn mark_fetch(&self, graph: &mut QueryGraph, id: JoinNodeId, path: &str) -> Result<(), JoinError> {
        let mut current = Some(graph.tree.identity(id));
        while let Some(node_id) = current {
            let node = graph.tree.node(node_id);
            if node.is_entity_join() {
                return Err(JoinError::InvalidJoin {
                    path: path.to_string(),
                    reason: format!("entity join `{}` can't be fetched", node.alias),
                });
            }
            current = node.parent.map(|p| graph.tree.identity(p));
        }
        graph.tree.mark_fetch(id);
        graph.tree.add_clause_dependency(id, ClauseType::Select)
    }

    // ===== IMPLICIT JOINS =====

    /// Resolve every path inside `expr`, creating joins as needed. On failure the
    /// graph is left as it was before the call.
    pub fn implicit_join(
        &self,
        graph: &mut QueryGraph,
        expr: &mut Expression,
        ctx: ImplicitJoinContext,
    ) -> Result<(), JoinError> {
        atomically(graph, |graph| self.join_expression(graph, expr, ctx))
    }

    pub fn implicit_join_predicate(
        &self,
        graph: &mut QueryGraph,
        predicate: &mut Predicate,
        ctx: ImplicitJoinContext,
    ) -> Result<(), JoinError> {
        atomically(graph, |graph| self.join_predicate(graph, predicate, ctx))
    }

    /// Resolve `path` to its base join node and residual field, storing the result
    /// on the path. `None` means the path is a whole reference to a select alias.
    pub fn resolve_path(
        &self,
        graph: &mut QueryGraph,
        path: &mut PathExpression,
        ctx: ImplicitJoinContext,
    ) -> Result<Option<PathReference>, JoinError> {
        atomically(graph, |graph| self.resolve_in(graph, path, ctx))
    }

    fn join_expression(
        &self,
        graph: &mut QueryGraph,
        expr: &mut Expression,
        ctx: ImplicitJoinContext,
    ) -> Result<(), JoinError> {
        match expr {
            Expression::Path(path) => {
                self.resolve_in(graph, path, ctx)?;
            }
            Expression::ListIndex(path) | Expression::MapKey(path) => {
                let text = path.path_text();
                let key_ctx = ImplicitJoinContext {
                    join_required: true,
                    ..ctx
                };
                match self.resolve_in(graph, path, key_ctx)? {
                    Some(PathReference {
                        base_node,
                        field: None,
                    }) if graph.tree.node(base_node).is_collection() => {}
                    _ => {
                        return Err(JoinError::InvalidJoin {
                            path: text,
                            reason: "KEY and INDEX need a collection join".to_string(),
                        })
                    }
                }
            }
            Expression::Parameter(_) | Expression::Literal(_) | Expression::Subquery(_) => {}
            Expression::Function(func) => {
                for arg in &mut func.arguments {
                    self.join_expression(graph, arg, ctx)?;
                }
                if let Some(filter) = &mut func.filter {
                    self.join_predicate(graph, filter, ctx)?;
                }
                if let Some(window) = &mut func.window {
                    for expr in &mut window.partition_by {
                        self.join_expression(graph, expr, ctx)?;
                    }
                    for item in &mut window.order_by {
                        self.join_expression(graph, &mut item.expression, ctx)?;
                    }
                }
            }
            Expression::Arithmetic { left, right, .. } => {
                self.join_expression(graph, left, ctx)?;
                self.join_expression(graph, right, ctx)?;
            }
            Expression::Case(case) => {
                for (when, then) in &mut case.when_clauses {
                    self.join_predicate(graph, when, ctx)?;
                    self.join_expression(graph, then, ctx)?;
                }
                if let Some(default) = &mut case.default {
                    self.join_expression(graph, default, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn join_predicate(
        &self,
        graph: &mut QueryGraph,
        predicate: &mut Predicate,
        ctx: ImplicitJoinContext,
    ) -> Result<(), JoinError> {
        match predicate {
            Predicate::Compound(compound) => {
                for child in &mut compound.children {
                    self.join_predicate(graph, child, ctx)?;
                }
            }
            Predicate::Exists { .. } => {}
            // `o.items IS EMPTY` compares the collection itself, no join
            Predicate::IsEmpty { expression, .. } => {
                let leaf_ctx = ImplicitJoinContext {
                    join_required: false,
                    ..ctx
                };
                self.join_expression(graph, expression, leaf_ctx)?;
            }
            other => {
                for expr in other.expressions_mut() {
                    self.join_expression(graph, expr, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_in(
        &self,
        graph: &mut QueryGraph,
        path: &mut PathExpression,
        ctx: ImplicitJoinContext,
    ) -> Result<Option<PathReference>, JoinError> {
        let text = path.path_text();
        let (start, skip) = match self.locate_start(graph, path, &text, ctx)? {
            Start::Node { node, skip } => (node, skip),
            Start::SelectAlias => {
                path.reference = None;
                return Ok(None);
            }
            Start::Substitute(mut expr) => {
                let alias_ctx = ImplicitJoinContext {
                    from_select_alias: true,
                    ..ctx
                };
                self.join_expression(graph, &mut expr, alias_ctx)?;
                let reference = match expr {
                    Expression::Path(resolved) => resolved.reference,
                    _ => None,
                };
                path.reference = reference.clone();
                return Ok(reference);
            }
        };

        self.resolve_index_expressions(graph, path, skip, ctx)?;
        let steps = self.plan(graph, start, &path.elements[skip..], &text, ctx)?;
        let reference = match self.single_valued_id_access(&steps) {
            Some((prefix, field)) => {
                let mut reference = self.execute(graph, start, prefix, ctx)?;
                match self.existing_default(graph, reference.base_node, &field) {
                    Some((node, id_field)) => {
                        if let Some(clause) = ctx.clause {
                            graph.tree.add_clause_dependency(node, clause)?;
                        }
                        PathReference {
                            base_node: node,
                            field: Some(id_field),
                        }
                    }
                    None => {
                        reference.field = Some(field);
                        reference
                    }
                }
            }
            None => self.execute(graph, start, &steps, ctx)?,
        };

        log::trace!(
            "Resolved {} to {}{}",
            text,
            graph.tree.node(reference.base_node).alias,
            reference
                .field
                .as_ref()
                .map(|f| format!(".{}", f))
                .unwrap_or_default()
        );
        path.reference = Some(reference.clone());
        Ok(Some(reference))
    }

    fn locate_start(
        &self,
        graph: &QueryGraph,
        path: &PathExpression,
        text: &str,
        ctx: ImplicitJoinContext,
    ) -> Result<Start, JoinError> {
        let Some(first) = path.elements.first() else {
            return Err(JoinError::unresolvable(text, "", "empty path"));
        };

        if let PathElement::Property(name) = first {
            if let Some(info) = graph.aliases.lookup(self.scope, name) {
                let external = graph.aliases.is_external(self.scope, info);
                match &info.target {
                    AliasTarget::Join(node) => {
                        return Ok(Start::Node {
                            node: *node,
                            skip: 1,
                        })
                    }
                    AliasTarget::Select(_) if external && path.elements.len() > 1 => {
                        return Err(JoinError::ExternalAliasDereference {
                            alias: name.clone(),
                            path: text.to_string(),
                        })
                    }
                    AliasTarget::Select(_) if path.elements.len() > 1 => {
                        return Err(JoinError::SelectAliasDereference {
                            alias: name.clone(),
                            path: text.to_string(),
                        })
                    }
                    AliasTarget::Select(expr) => {
                        let substitute = !external
                            && !ctx.from_select_alias
                            && !ctx.from_subquery
                            && ctx.clause != Some(ClauseType::Select);
                        return Ok(if substitute {
                            Start::Substitute(expr.clone())
                        } else {
                            Start::SelectAlias
                        });
                    }
                }
            }
        }

        match self.roots.as_slice() {
            [root] => Ok(Start::Node {
                node: *root,
                skip: 0,
            }),
            [] => Err(JoinError::unresolvable(
                text,
                first.name(),
                "no root to resolve the path against",
            )),
            _ => Err(JoinError::UnknownAlias {
                alias: first.name().to_string(),
            }),
        }
    }

    fn resolve_index_expressions(
        &self,
        graph: &mut QueryGraph,
        path: &mut PathExpression,
        skip: usize,
        ctx: ImplicitJoinContext,
    ) -> Result<(), JoinError> {
        let index_ctx = ImplicitJoinContext {
            join_required: false,
            ..ctx
        };
        for element in path.elements.iter_mut().skip(skip) {
            if let PathElement::Array { index, .. } = element {
                self.join_expression(graph, index, index_ctx)?;
            }
        }
        Ok(())
    }

    /// Validate `elements` against the catalog, starting at `start`, without touching
    /// the tree. Existing nodes along the way are followed so ambiguous slots are
    /// reported here as well.
    fn plan(
        &self,
        graph: &QueryGraph,
        start: JoinNodeId,
        elements: &[PathElement],
        text: &str,
        ctx: ImplicitJoinContext,
    ) -> Result<Vec<Step>, JoinError> {
        let mut steps = Vec::new();
        let start_node = graph.tree.node(start);
        let mut current_type = start_node.effective_type().to_string();
        let mut basic = start_node.basic;
        let mut existing = Some(start);
        let mut pending: Vec<String> = Vec::new();
        let mut depth = self.depth(&graph.tree, start);

        for (i, element) in elements.iter().enumerate() {
            let last = i + 1 == elements.len();
            let name = element.name();
            if basic {
                return Err(JoinError::unresolvable(
                    text,
                    name,
                    format!("`{}` is a basic value and can't be dereferenced", current_type),
                ));
            }
            let attribute = self
                .catalog
                .polymorphic_attribute(&current_type, name)
                .map_err(|e| match e {
                    SchemaCatalogError::UnknownAttribute { .. } => {
                        JoinError::unresolvable(text, name, e.to_string())
                    }
                    other => JoinError::Catalog(other),
                })?
                .clone();

            pending.push(name.to_string());
            let qualified = pending.join(".");
            let index = match element {
                PathElement::Array { index, .. } => {
                    if !attribute.is_indexed() {
                        return Err(JoinError::unresolvable(
                            text,
                            name,
                            "only lists and maps can be accessed by index or key",
                        ));
                    }
                    Some((**index).clone())
                }
                PathElement::Property(_) => None,
            };

            match attribute.kind {
                AttributeKind::Basic => {
                    if !last {
                        return Err(JoinError::unresolvable(
                            text,
                            name,
                            "basic attributes can't be dereferenced",
                        ));
                    }
                    steps.push(Step::Field(qualified));
                }
                AttributeKind::Embedded => {
                    current_type = attribute.target.clone();
                    if last {
                        steps.push(Step::Field(qualified));
                    }
                }
                _ if last && index.is_none() && !ctx.join_required => {
                    steps.push(Step::Field(qualified));
                }
                _ => {
                    depth += 1;
                    if depth > self.config.max_join_depth as usize {
                        return Err(JoinError::unresolvable(
                            text,
                            name,
                            format!("join depth exceeds {}", self.config.max_join_depth),
                        ));
                    }
                    // The last join of an explicit path is matched by alias later
                    existing = match (existing, &index) {
                        _ if last => None,
                        (Some(node), Some(idx)) => find_indexed(&graph.tree, node, &qualified, idx),
                        (Some(node), None) => lookup_implicit(&graph.tree, node, &qualified)?,
                        (None, _) => None,
                    };
                    basic = self.catalog.managed_type(&attribute.target).is_none();
                    current_type = match existing {
                        Some(node) => graph.tree.node(node).effective_type().to_string(),
                        None => attribute.target.clone(),
                    };
                    pending.clear();
                    steps.push(Step::Join {
                        relation: qualified,
                        attribute,
                        index,
                    });
                }
            }
        }
        Ok(steps)
    }

    /// Apply validated steps, creating or reusing implicit joins
    fn execute(
        &self,
        graph: &mut QueryGraph,
        start: JoinNodeId,
        steps: &[Step],
        ctx: ImplicitJoinContext,
    ) -> Result<PathReference, JoinError> {
        let mut current = start;
        let mut field = None;
        for step in steps {
            match step {
                Step::Join {
                    relation,
                    attribute,
                    index,
                } => {
                    current = self.implicit_join_node(graph, current, relation, attribute, index.as_ref())?;
                }
                Step::Field(name) => field = Some(name.clone()),
            }
        }
        if let Some(clause) = ctx.clause {
            graph.tree.add_clause_dependency(current, clause)?;
        }
        Ok(PathReference {
            base_node: current,
            field,
        })
    }

    /// For paths ending in `assoc.id` where `assoc` is a to-one association and `id`
    /// its target's identifier, the steps to execute and the field to read from the
    /// last node instead of joining `assoc`
    fn single_valued_id_access<'s>(&self, steps: &'s [Step]) -> Option<(&'s [Step], String)> {
        if !self.config.optimize_single_valued_id_access {
            return None;
        }
        let [prefix @ .., Step::Join {
            relation,
            attribute,
            index: None,
        }, Step::Field(id_field)] = steps
        else {
            return None;
        };
        if !attribute.kind.is_to_one() || id_field.contains('.') {
            return None;
        }
        let target_attr = self.catalog.attribute(&attribute.target, id_field)?;
        if !target_attr.is_id {
            return None;
        }
        Some((prefix, format!("{}.{}", relation, id_field)))
    }

    /// Default join node of `relation` below `node`, with the id field to read from it
    fn existing_default(&self, graph: &QueryGraph, node: JoinNodeId, field: &str) -> Option<(JoinNodeId, String)> {
        let (relation, id_field) = field.rsplit_once('.')?;
        let slot = graph.tree.node(node).slots.get(relation)?;
        slot.default_node.map(|d| (d, id_field.to_string()))
    }

    fn implicit_join_node(
        &self,
        graph: &mut QueryGraph,
        parent: JoinNodeId,
        relation: &str,
        attribute: &AttributeDescriptor,
        index: Option<&Expression>,
    ) -> Result<JoinNodeId, JoinError> {
        if let Some(idx) = index {
            if let Some(found) = find_indexed(&graph.tree, parent, relation, idx) {
                return Ok(found);
            }
        } else if let Some(found) = lookup_implicit(&graph.tree, parent, relation)? {
            return Ok(found);
        }
        let join_type = self.model_aware_type(&graph.tree, parent, attribute);
        self.create_node(
            graph,
            parent,
            relation,
            attribute,
            None,
            join_type,
            None,
            index.is_none(),
            index,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn explicit_join_node(
        &self,
        graph: &mut QueryGraph,
        parent: JoinNodeId,
        relation: &str,
        attribute: &AttributeDescriptor,
        index: Option<&Expression>,
        treat_type: Option<String>,
        alias: &str,
        join_type: JoinType,
        default_join: bool,
    ) -> Result<JoinNodeId, JoinError> {
        let tree = &graph.tree;
        let existing = match index {
            Some(idx) => find_indexed(tree, parent, relation, idx),
            None => tree.node(parent).slots.get(relation).and_then(|slot| {
                if default_join && treat_type.is_none() {
                    slot.default_node
                } else {
                    slot.nodes.iter().copied().find(|n| {
                        let node = tree.node(*n);
                        node.alias == alias && node.treat_type == treat_type
                    })
                }
            }),
        };

        match existing {
            Some(id) => {
                self.adopt_alias(graph, id, alias, join_type)?;
                Ok(id)
            }
            None => self.create_node(
                graph,
                parent,
                relation,
                attribute,
                Some(alias),
                join_type,
                treat_type.clone(),
                default_join && treat_type.is_none(),
                index,
            ),
        }
    }

    /// Give an existing node the explicit `alias`. Only implicit aliases can be
    /// replaced.
    fn adopt_alias(
        &self,
        graph: &mut QueryGraph,
        id: JoinNodeId,
        alias: &str,
        join_type: JoinType,
    ) -> Result<(), JoinError> {
        let (current_alias, path, scope) = {
            let node = graph.tree.node(id);
            (node.alias.clone(), node.path.clone(), node.scope)
        };
        if current_alias == alias {
            graph.tree.set_join_type(id, join_type);
            return Ok(());
        }

        let implicit = graph
            .aliases
            .lookup_local(scope, &current_alias)
            .is_some_and(|info| info.implicit);
        if !implicit {
            return Err(JoinError::AliasConflict {
                existing_alias: current_alias,
                existing_path: path.clone(),
                alias: alias.to_string(),
                path,
            });
        }
        self.ensure_alias_free(graph, scope, alias, &path)?;

        graph.aliases.unregister(scope, &current_alias);
        self.register_join_alias(graph, scope, alias, &path, false, id)?;
        graph.tree.node_mut(id).alias = alias.to_string();
        graph.tree.set_join_type(id, join_type);
        log::debug!(
            "Promoted implicit join {} to {} ({:?})",
            current_alias,
            alias,
            join_type
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_node(
        &self,
        graph: &mut QueryGraph,
        parent: JoinNodeId,
        relation: &str,
        attribute: &AttributeDescriptor,
        alias: Option<&str>,
        join_type: JoinType,
        treat_type: Option<String>,
        default_join: bool,
        index: Option<&Expression>,
    ) -> Result<JoinNodeId, JoinError> {
        let (parent_path, scope) = {
            let node = graph.tree.node(parent);
            (node.path.clone(), node.scope)
        };
        let mut path = format!("{}.{}", parent_path, relation);
        if let Some(idx) = index {
            path = format!("{}[{}]", path, idx);
        }

        let implicit = alias.is_none();
        let alias = match alias {
            Some(explicit) => {
                self.ensure_alias_free(graph, scope, explicit, &path)?;
                explicit.to_string()
            }
            None => {
                let separator = &self.config.alias_postfix_separator;
                let mut base = relation.rsplit('.').next().unwrap_or(relation).to_string();
                if let Some(idx) = index {
                    base = format!("{}{}{}", base, separator, index_alias_suffix(idx));
                }
                let generated = graph.aliases.generate_postfixed_alias(scope, &base, separator);
                if !is_valid_alias(&generated) {
                    return Err(JoinError::InvalidAlias { alias: generated });
                }
                generated
            }
        };

        let basic = self.catalog.managed_type(&attribute.target).is_none();
        let id = graph.tree.attach(NewNode {
            kind: NodeKind::Association {
                attribute: attribute.clone(),
            },
            parent: Some(parent),
            parent_slot: Some(relation.to_string()),
            alias: alias.clone(),
            path: path.clone(),
            node_type: attribute.target.clone(),
            basic,
            join_type: Some(join_type),
            treat_type,
            scope,
            default_join,
        });
        self.register_join_alias(graph, scope, &alias, &path, implicit, id)?;
        log::debug!("Created join node {} for {} ({:?})", alias, path, join_type);

        if let Some(idx) = index {
            let key_path = PathExpression::for_node(&alias, id);
            let key = match attribute.collection {
                Some(CollectionKind::Map) => Expression::MapKey(key_path),
                _ => Expression::ListIndex(key_path),
            };
            graph.tree.add_on_conjunct(id, Predicate::eq(key, idx.clone()))?;
        }
        Ok(id)
    }

    /// Inner for non-optional to-one associations below a non-outer node, else left
    fn model_aware_type(&self, tree: &JoinTree, parent: JoinNodeId, attribute: &AttributeDescriptor) -> JoinType {
        let base = tree.node(tree.identity(parent));
        if matches!(base.join_type, Some(JoinType::Left | JoinType::Right)) {
            JoinType::Left
        } else if attribute.kind.is_to_one() && !attribute.optional {
            JoinType::Inner
        } else {
            JoinType::Left
        }
    }

    fn depth(&self, tree: &JoinTree, id: JoinNodeId) -> usize {
        let mut depth = 0;
        let mut current = tree.node(tree.identity(id)).parent;
        while let Some(parent) = current {
            depth += 1;
            current = tree.node(tree.identity(parent)).parent;
        }
        depth
    }

    fn check_treat(&self, type_name: &str, treat_type: &str, path: &str) -> Result<(), JoinError> {
        self.require_type(treat_type)?;
        let is_subtype = type_name == treat_type
            || self
                .catalog
                .subtypes(type_name)
                .iter()
                .any(|t| t.name == treat_type);
        if is_subtype {
            Ok(())
        } else {
            Err(JoinError::InvalidJoin {
                path: path.to_string(),
                reason: format!("`{}` is not a subtype of `{}`", treat_type, type_name),
            })
        }
    }

    fn require_type(&self, name: &str) -> Result<&crate::schema_catalog::ManagedType, JoinError> {
        self.catalog.managed_type(name).ok_or_else(|| {
            JoinError::Catalog(SchemaCatalogError::UnknownType {
                type_name: name.to_string(),
            })
        })
    }

    fn ensure_alias_free(
        &self,
        graph: &QueryGraph,
        scope: ScopeId,
        alias: &str,
        path: &str,
    ) -> Result<(), JoinError> {
        graph.aliases.check_available(scope, alias, path)?;
        match graph.aliases.lookup(scope, alias) {
            Some(existing) => Err(conflict(existing, alias, path)),
            None => Ok(()),
        }
    }

    fn register_join_alias(
        &self,
        graph: &mut QueryGraph,
        scope: ScopeId,
        alias: &str,
        path: &str,
        implicit: bool,
        id: JoinNodeId,
    ) -> Result<(), JoinError> {
        graph.aliases.register(AliasInfo {
            alias: alias.to_string(),
            path: path.to_string(),
            implicit,
            owner: scope,
            target: AliasTarget::Join(id),
        })
    }

    /// Register a select item alias in this query's scope
    pub fn register_select_alias(
        &self,
        graph: &mut QueryGraph,
        alias: &str,
        expression: Expression,
    ) -> Result<(), JoinError> {
        graph.aliases.register(AliasInfo {
            alias: alias.to_string(),
            path: alias.to_string(),
            implicit: false,
            owner: self.scope,
            target: AliasTarget::Select(expression),
        })
    }
}

/// Implicit lookup in a relation slot: the default node, else the only node not
/// pinned by an index predicate
fn lookup_implicit(tree: &JoinTree, node: JoinNodeId, relation: &str) -> Result<Option<JoinNodeId>, JoinError> {
    let parent = tree.node(node);
    let Some(slot) = parent.slots.get(relation) else {
        return Ok(None);
    };
    if let Some(default) = slot.default_node {
        return Ok(Some(default));
    }
    let candidates: Vec<JoinNodeId> = slot
        .nodes
        .iter()
        .copied()
        .filter(|n| !tree.is_array_expression_condition(*n) && tree.node(*n).treat_type.is_none())
        .collect();
    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        _ => Err(JoinError::AmbiguousJoin {
            alias: parent.alias.clone(),
            relation: relation.to_string(),
            candidates: candidates
                .iter()
                .map(|c| tree.node(*c).alias.clone())
                .collect(),
        }),
    }
}

/// Sibling in `relation` whose ON predicate already pins the index to `index`
fn find_indexed(tree: &JoinTree, node: JoinNodeId, relation: &str, index: &Expression) -> Option<JoinNodeId> {
    let slot = tree.node(node).slots.get(relation)?;
    slot.nodes.iter().copied().find(|candidate| {
        tree.node(*candidate)
            .on_predicate
            .as_ref()
            .is_some_and(|on| on.children.iter().any(|c| pins_index(c, *candidate, index)))
    })
}

/// Run `op`, restoring the graph if it fails. A dependency cycle is only found once
/// the closing node is attached and is reported with that node in place.
fn atomically<T>(
    graph: &mut QueryGraph,
    op: impl FnOnce(&mut QueryGraph) -> Result<T, JoinError>,
) -> Result<T, JoinError> {
    let snapshot = graph.clone();
    let result = op(graph);
    if let Err(e) = &result {
        if !matches!(e, JoinError::CyclicJoinDependency { .. }) {
            log::debug!("Discarding joins of failed operation: {}", e);
            *graph = snapshot;
        }
    }
    result
}

pub(crate) fn pins_index(predicate: &Predicate, node: JoinNodeId, index: &Expression) -> bool {
    match predicate {
        Predicate::Comparison {
            operator: crate::expression::ComparisonOperator::Eq,
            left: Expression::ListIndex(p) | Expression::MapKey(p),
            right,
            negated: false,
        } => {
            right == index
                && p.reference
                    .as_ref()
                    .is_some_and(|r| r.base_node == node && r.field.is_none())
        }
        _ => false,
    }
}

fn index_alias_suffix(index: &Expression) -> String {
    let raw = match index {
        Expression::Parameter(name) => name.clone(),
        Expression::Literal(Literal::Numeric(value)) | Expression::Literal(Literal::String(value)) => {
            value.clone()
        }
        Expression::Path(p) => p
            .elements
            .last()
            .map(|e| e.name().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "idx".to_string()
    } else {
        cleaned
    }
}

/// Top-level conjuncts of a predicate; a plain AND is split into its children
pub(crate) fn flatten_conjuncts(predicate: Predicate) -> Vec<Predicate> {
    match predicate {
        Predicate::Compound(CompoundPredicate {
            operator: BooleanOperator::And,
            children,
            negated: false,
        }) => children,
        other => vec![other],
    }
}
