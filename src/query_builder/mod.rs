//! Fluent criteria builder.
//!
//! [`CriteriaBuilder`] owns one [`QueryGraph`] and the [`JoinManager`] of the
//! top-level query. Every method resolves its paths immediately, so joins appear in
//! the tree in call order and errors surface at the call that caused them.
//!
//! # Key Components
//!
//! - [`CriteriaBuilder`] - roots, joins, clauses, pagination and rendering
//! - [`SubqueryBuilder`] - a nested query sharing the outer join arena
//! - [`clauses`] - clause state and text rendering shared by both
//!
//! # Analysis cache
//!
//! Every mutating call bumps a generation counter. The constantified attributes of
//! the WHERE clause and the uniqueness verdicts derived from them are computed on
//! demand and stamped with the generation they were computed for; a stale stamp
//! means recompute.

pub mod clauses;
pub mod errors;
pub mod subquery;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::analysis::{
    ConstantifiedAttributeCollector, ConstantifiedAttributes, FunctionalDependencyAnalyzer,
    ResolvedExpression,
};
use crate::config::PlannerConfig;
use crate::expression::render::write_list;
use crate::expression::{
    parse_expression, parse_predicate, Expression, PathElement, PathExpression, PathReference,
    Predicate, SubqueryExpression,
};
use crate::join_manager::{JoinManager, JoinPathStyle, QueryGraph};
use crate::join_tree::{ClauseType, JoinNodeId, JoinType};
use crate::schema_catalog::SchemaCatalog;

pub use clauses::SelectItem;
pub use errors::BuilderError;
pub use subquery::SubqueryBuilder;

use clauses::Clauses;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub first_result: usize,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
struct AnalysisCache {
    generation: u64,
    constantified: ConstantifiedAttributes,
    order_by_unique: Option<bool>,
    roots_unique: Option<bool>,
}

#[derive(Debug)]
pub struct CriteriaBuilder {
    catalog: Arc<dyn SchemaCatalog>,
    config: Arc<PlannerConfig>,
    graph: QueryGraph,
    manager: JoinManager,
    clauses: Clauses,
    page: Option<Page>,
    generation: u64,
    analysis: RefCell<Option<AnalysisCache>>,
}

impl CriteriaBuilder {
    pub fn new(catalog: Arc<dyn SchemaCatalog>, config: Arc<PlannerConfig>) -> Self {
        let mut graph = QueryGraph::new();
        let manager = JoinManager::new(&mut graph, None, catalog.clone(), config.clone());
        CriteriaBuilder {
            catalog,
            config,
            graph,
            manager,
            clauses: Clauses::default(),
            page: None,
            generation: 0,
            analysis: RefCell::new(None),
        }
    }

    pub fn graph(&self) -> &QueryGraph {
        &self.graph
    }

    pub fn manager(&self) -> &JoinManager {
        &self.manager
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn select_items(&self) -> &[SelectItem] {
        &self.clauses.select
    }

    /// Join node registered for `alias` in this query
    pub fn node(&self, alias: &str) -> Option<JoinNodeId> {
        self.manager.node_for_alias(&self.graph, alias)
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    // ===== ROOTS =====

    pub fn from(&mut self, entity: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager.add_root(&mut self.graph, entity, alias)?;
        Ok(self)
    }

    pub fn from_values(&mut self, type_name: &str, alias: &str, row_count: usize) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager
            .add_values_root(&mut self.graph, type_name, alias, row_count)?;
        Ok(self)
    }

    // ===== JOINS =====

    pub fn join(
        &mut self,
        path: &str,
        alias: &str,
        join_type: JoinType,
        fetch: bool,
        default_join: bool,
    ) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager
            .join(&mut self.graph, path, alias, join_type, fetch, default_join)?;
        Ok(self)
    }

    pub fn inner_join(&mut self, path: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.join(path, alias, JoinType::Inner, false, true)
    }

    pub fn left_join(&mut self, path: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.join(path, alias, JoinType::Left, false, true)
    }

    pub fn right_join(&mut self, path: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.join(path, alias, JoinType::Right, false, true)
    }

    pub fn join_on(
        &mut self,
        path: &str,
        alias: &str,
        join_type: JoinType,
        on: &str,
    ) -> Result<&mut Self, BuilderError> {
        self.touch();
        let on = parse_predicate(on)?;
        self.manager
            .join_on(&mut self.graph, path, alias, join_type, on)?;
        Ok(self)
    }

    pub fn entity_join(
        &mut self,
        base_alias: &str,
        entity: &str,
        alias: &str,
        join_type: JoinType,
        on: &str,
    ) -> Result<&mut Self, BuilderError> {
        self.touch();
        let on = parse_predicate(on)?;
        self.manager
            .entity_join(&mut self.graph, base_alias, entity, alias, join_type, on)?;
        Ok(self)
    }

    /// `TREAT(alias AS treat_type)` registered as `view_alias`
    pub fn treat(&mut self, alias: &str, treat_type: &str, view_alias: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager
            .treated_view(&mut self.graph, alias, treat_type, view_alias)?;
        Ok(self)
    }

    pub fn fetch(&mut self, path: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager.fetch(&mut self.graph, path)?;
        Ok(self)
    }

    // ===== CLAUSES =====

    pub fn select(&mut self, expression: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        let expression = parse_expression(expression)?;
        self.clauses
            .add_select(&self.manager, &mut self.graph, expression, None)?;
        Ok(self)
    }

    pub fn select_as(&mut self, expression: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        let expression = parse_expression(expression)?;
        self.clauses
            .add_select(&self.manager, &mut self.graph, expression, Some(alias))?;
        Ok(self)
    }

    /// Scalar subquery as a select item
    pub fn select_subquery(&mut self, subquery: SubqueryExpression, alias: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.clauses.add_select(
            &self.manager,
            &mut self.graph,
            Expression::Subquery(subquery),
            Some(alias),
        )?;
        Ok(self)
    }

    pub fn where_(&mut self, predicate: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        let predicate = parse_predicate(predicate)?;
        self.clauses.add_where(&self.manager, &mut self.graph, predicate)?;
        Ok(self)
    }

    pub fn where_exists(&mut self, subquery: SubqueryExpression) -> Result<&mut Self, BuilderError> {
        self.add_exists(subquery, false)
    }

    pub fn where_not_exists(&mut self, subquery: SubqueryExpression) -> Result<&mut Self, BuilderError> {
        self.add_exists(subquery, true)
    }

    fn add_exists(&mut self, subquery: SubqueryExpression, negated: bool) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.clauses.add_where(
            &self.manager,
            &mut self.graph,
            Predicate::Exists { subquery, negated },
        )?;
        Ok(self)
    }

    pub fn group_by(&mut self, expression: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.clauses
            .add_group_by(&self.manager, &mut self.graph, expression)?;
        Ok(self)
    }

    pub fn having(&mut self, predicate: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.clauses.add_having(&self.manager, &mut self.graph, predicate)?;
        Ok(self)
    }

    pub fn order_by(&mut self, expression: &str, ascending: bool) -> Result<&mut Self, BuilderError> {
        self.touch();
        let item = Clauses::parse_order_by(expression, ascending)?;
        self.clauses.add_order_by(&self.manager, &mut self.graph, item)?;
        Ok(self)
    }

    /// Order by `expr [ASC|DESC] [NULLS FIRST|LAST]`
    pub fn order_by_item(&mut self, item: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        let item = Clauses::parse_order_by_item(item)?;
        self.clauses.add_order_by(&self.manager, &mut self.graph, item)?;
        Ok(self)
    }

    /// Request a page of results. The ordering is checked when the query is rendered.
    pub fn page(&mut self, first_result: usize, max_results: usize) -> &mut Self {
        self.touch();
        self.page = Some(Page {
            first_result,
            max_results,
        });
        self
    }

    // ===== SUBQUERIES =====

    /// Start a subquery whose root is either an entity name or a correlation path
    /// through an alias of this query, e.g. `o.items`
    pub fn subquery(&mut self, root: &str, alias: &str) -> Result<SubqueryBuilder<'_>, BuilderError> {
        self.touch();
        let mut manager = JoinManager::new(
            &mut self.graph,
            Some(self.manager.scope()),
            self.catalog.clone(),
            self.config.clone(),
        );
        if root.contains('.') {
            manager.add_correlated_root(&mut self.graph, root, alias)?;
        } else {
            manager.add_root(&mut self.graph, root, alias)?;
        }
        Ok(SubqueryBuilder::new(
            &mut self.graph,
            &mut self.generation,
            manager,
            self.config.clone(),
        ))
    }

    // ===== ANALYSIS =====

    fn with_analysis<T>(&self, f: impl FnOnce(&mut AnalysisCache) -> T) -> T {
        let mut slot = self.analysis.borrow_mut();
        if slot.as_ref().is_some_and(|c| c.generation != self.generation) {
            *slot = None;
        }
        let cache = slot.get_or_insert_with(|| {
            log::debug!("Recomputing analysis for generation {}", self.generation);
            let constantified = match self.clauses.filter() {
                Some(filter) => {
                    ConstantifiedAttributeCollector::new(self.catalog.as_ref(), &self.graph.tree)
                        .collect(&filter)
                }
                None => ConstantifiedAttributes::default(),
            };
            AnalysisCache {
                generation: self.generation,
                constantified,
                order_by_unique: None,
                roots_unique: None,
            }
        });
        f(cache)
    }

    /// Attributes pinned to a single value by the WHERE clause
    pub fn constantified_attributes(&self) -> ConstantifiedAttributes {
        self.with_analysis(|cache| cache.constantified.clone())
    }

    /// Whether the order-by items, taken together, identify at most one row
    pub fn is_order_by_unique(&self) -> Result<bool, BuilderError> {
        let order_by: Vec<Expression> = self
            .clauses
            .order_by
            .iter()
            .map(|item| self.clauses.dealias(&item.expression))
            .collect();
        self.with_analysis(|cache| -> Result<bool, BuilderError> {
            if let Some(unique) = cache.order_by_unique {
                return Ok(unique);
            }
            let unique = self.analyze_unique(&cache.constantified, &order_by)?;
            cache.order_by_unique = Some(unique);
            Ok(unique)
        })
    }

    fn roots_unique(&self) -> Result<bool, BuilderError> {
        let identifiers = self.root_identifiers();
        self.with_analysis(|cache| -> Result<bool, BuilderError> {
            if let Some(unique) = cache.roots_unique {
                return Ok(unique);
            }
            let unique = self.analyze_unique(&cache.constantified, &identifiers)?;
            cache.roots_unique = Some(unique);
            Ok(unique)
        })
    }

    fn analyze_unique(
        &self,
        constantified: &ConstantifiedAttributes,
        expressions: &[Expression],
    ) -> Result<bool, BuilderError> {
        let mut analyzer =
            FunctionalDependencyAnalyzer::new(self.catalog.as_ref(), &self.graph.tree, constantified);
        let mut unique = false;
        for expression in expressions {
            unique = analyzer.analyze_forms_unique_tuple(expression)?;
        }
        Ok(unique)
    }

    /// The order-by expressions the rest of the ordering depends on
    pub fn functional_dependency_root_expressions(&self) -> Result<Option<Vec<ResolvedExpression>>, BuilderError> {
        let candidates: Vec<ResolvedExpression> = self
            .clauses
            .order_by
            .iter()
            .map(|item| ResolvedExpression::new(&self.graph.tree, self.clauses.dealias(&item.expression)))
            .collect();
        self.with_analysis(|cache| -> Result<Option<Vec<ResolvedExpression>>, BuilderError> {
            let mut analyzer = FunctionalDependencyAnalyzer::new(
                self.catalog.as_ref(),
                &self.graph.tree,
                &cache.constantified,
            );
            Ok(analyzer.functional_dependency_root_expressions(&candidates)?)
        })
    }

    /// Identifier paths of every root, resolved
    fn root_identifiers(&self) -> Vec<Expression> {
        let mut identifiers = Vec::new();
        for root in self.manager.roots() {
            let node = self.graph.tree.node(*root);
            let ids = self.catalog.identifier_paths(node.effective_type());
            if ids.is_empty() {
                identifiers.push(Expression::Path(PathExpression::for_node(&node.alias, *root)));
                continue;
            }
            for id in ids {
                let mut elements = vec![PathElement::Property(node.alias.clone())];
                elements.extend(id.split('.').map(|p| PathElement::Property(p.to_string())));
                identifiers.push(Expression::Path(PathExpression {
                    elements,
                    reference: Some(PathReference {
                        base_node: *root,
                        field: Some(id),
                    }),
                }));
            }
        }
        identifiers
    }

    fn validate_pagination(&self) -> Result<(), BuilderError> {
        if self.clauses.order_by.is_empty() {
            return Err(BuilderError::MissingOrderBy);
        }
        if !self.is_order_by_unique()? {
            return Err(BuilderError::NonUniquePaginationKey);
        }
        Ok(())
    }

    // ===== RENDERING =====

    /// `SELECT … FROM … [WHERE …] [GROUP BY …] [HAVING …] [ORDER BY …]`, followed by
    /// `LIMIT`/`OFFSET` for a paged query
    pub fn query_string(&self) -> Result<String, BuilderError> {
        if self.page.is_some() {
            self.validate_pagination()?;
        }
        let mut out = self.clauses.render(
            &self.manager,
            &self.graph,
            &self.config,
            self.config.render_fetch_joins,
        )?;
        self.write_page(&mut out);
        Ok(out)
    }

    /// Count of the distinct root rows. Joins needed only by the select list or the
    /// ordering are left out; `COUNT(*)` is used when the remaining joins cannot
    /// duplicate root rows.
    pub fn count_query_string(&self) -> Result<String, BuilderError> {
        if self.manager.roots().is_empty() {
            return Err(BuilderError::MissingRoot);
        }
        if !self.clauses.group_by.is_empty() || !self.clauses.having.is_empty() {
            return Err(BuilderError::GroupedCount);
        }
        let exclusions: BTreeSet<ClauseType> = [ClauseType::Select, ClauseType::OrderBy].into();
        let joins = self.manager.build_joins(&self.graph, &exclusions, None, false)?;
        let plain = self.roots_unique()? && !self.manager.has_collections(&self.graph, &exclusions);

        let style = JoinPathStyle::new(&self.graph.tree, None);
        let mut out = String::from("SELECT ");
        if plain {
            out.push_str("COUNT(*)");
        } else {
            out.push_str("COUNT(DISTINCT ");
            write_list(&mut out, &self.root_identifiers(), &style);
            out.push(')');
        }
        out.push_str(&joins);
        self.clauses.write_filters(&mut out, &style);
        Ok(out)
    }

    /// Query for the ids of one page: selects the functional dependency roots of the
    /// ordering and leaves out joins needed only by the select list
    pub fn id_query_string(&self) -> Result<String, BuilderError> {
        self.validate_pagination()?;
        let roots = self.functional_dependency_root_expressions()?.unwrap_or_default();
        let exclusions: BTreeSet<ClauseType> = [ClauseType::Select].into();
        let joins = self.manager.build_joins(&self.graph, &exclusions, None, false)?;

        let style = JoinPathStyle::new(&self.graph.tree, None);
        let mut out = String::from("SELECT ");
        if self.manager.has_collections(&self.graph, &exclusions) {
            out.push_str("DISTINCT ");
        }
        out.push_str(
            &roots
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        out.push_str(&joins);
        self.clauses.write_filters(&mut out, &style);
        self.clauses.write_order_by(&mut out, &style);
        self.write_page(&mut out);
        Ok(out)
    }

    fn write_page(&self, out: &mut String) {
        if let Some(page) = self.page {
            out.push_str(&format!(" LIMIT {} OFFSET {}", page.max_results, page.first_result));
        }
    }
}
