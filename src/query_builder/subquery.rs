//! Subquery builder.
//!
//! A subquery gets its own [`JoinManager`] and alias scope, nested in the scope of
//! the query that opened it, and shares that query's join arena. Aliases of the
//! enclosing query are visible but cannot be joined through; correlation goes
//! through a correlated root instead.

use std::sync::Arc;

use super::clauses::Clauses;
use super::errors::BuilderError;
use crate::config::PlannerConfig;
use crate::expression::{parse_expression, parse_predicate, SubqueryExpression};
use crate::join_manager::{JoinManager, QueryGraph};
use crate::join_tree::JoinType;

#[derive(Debug)]
pub struct SubqueryBuilder<'a> {
    graph: &'a mut QueryGraph,
    generation: &'a mut u64,
    manager: JoinManager,
    clauses: Clauses,
    config: Arc<PlannerConfig>,
}

impl<'a> SubqueryBuilder<'a> {
    pub(crate) fn new(
        graph: &'a mut QueryGraph,
        generation: &'a mut u64,
        manager: JoinManager,
        config: Arc<PlannerConfig>,
    ) -> Self {
        SubqueryBuilder {
            graph,
            generation,
            manager,
            clauses: Clauses::for_subquery(),
            config,
        }
    }

    pub fn manager(&self) -> &JoinManager {
        &self.manager
    }

    fn touch(&mut self) {
        *self.generation += 1;
    }

    /// Additional uncorrelated root
    pub fn from(&mut self, entity: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager.add_root(self.graph, entity, alias)?;
        Ok(self)
    }

    /// Additional root correlated to the enclosing query, e.g. `o.notes`
    pub fn from_correlated(&mut self, path: &str, alias: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager.add_correlated_root(self.graph, path, alias)?;
        Ok(self)
    }

    pub fn join(&mut self, path: &str, alias: &str, join_type: JoinType) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.manager
            .join(self.graph, path, alias, join_type, false, true)?;
        Ok(self)
    }

    pub fn select(&mut self, expression: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        let expression = parse_expression(expression)?;
        self.clauses
            .add_select(&self.manager, self.graph, expression, None)?;
        Ok(self)
    }

    pub fn where_(&mut self, predicate: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        let predicate = parse_predicate(predicate)?;
        self.clauses.add_where(&self.manager, self.graph, predicate)?;
        Ok(self)
    }

    pub fn group_by(&mut self, expression: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.clauses.add_group_by(&self.manager, self.graph, expression)?;
        Ok(self)
    }

    pub fn having(&mut self, predicate: &str) -> Result<&mut Self, BuilderError> {
        self.touch();
        self.clauses.add_having(&self.manager, self.graph, predicate)?;
        Ok(self)
    }

    /// True when `alias` belongs to an enclosing query
    pub fn is_external_alias(&self, alias: &str) -> bool {
        self.graph
            .aliases
            .lookup(self.manager.scope(), alias)
            .is_some_and(|info| self.graph.aliases.is_external(self.manager.scope(), info))
    }

    /// Render the subquery. Fetch joins are never rendered inside a subquery.
    pub fn end(self) -> Result<SubqueryExpression, BuilderError> {
        let text = self
            .clauses
            .render(&self.manager, self.graph, &self.config, false)?;
        log::debug!("Rendered subquery: {}", text);
        Ok(SubqueryExpression { text })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PlannerConfig;
    use crate::join_manager::JoinError;
    use crate::query_builder::{BuilderError, CriteriaBuilder};
    use crate::schema_catalog::testing::shop_metamodel;
    use std::sync::Arc;

    fn builder() -> CriteriaBuilder {
        let mut cb = CriteriaBuilder::new(Arc::new(shop_metamodel()), Arc::new(PlannerConfig::default()));
        cb.from("Order", "o").unwrap();
        cb
    }

    #[test]
    fn test_uncorrelated_subquery() {
        let mut cb = builder();
        let mut sub = cb.subquery("Customer", "c").unwrap();
        sub.select("c.id").unwrap().where_("c.name = :name").unwrap();
        assert!(sub.is_external_alias("o"));
        assert!(!sub.is_external_alias("c"));
        let subquery = sub.end().unwrap();
        assert_eq!(subquery.text, "SELECT c.id FROM Customer c WHERE c.name = :name");
    }

    #[test]
    fn test_subquery_joins_are_local() {
        let mut cb = builder();
        let mut sub = cb.subquery("o.items", "i").unwrap();
        sub.select("i.product.name").unwrap();
        let subquery = sub.end().unwrap();
        assert_eq!(
            subquery.text,
            "SELECT product_1.name FROM o.items i JOIN i.product product_1"
        );
    }

    #[test]
    fn test_subquery_cannot_join_through_outer_alias() {
        let mut cb = builder();
        let mut sub = cb.subquery("Customer", "c").unwrap();
        let err = sub.join("o.items", "x", crate::join_tree::JoinType::Inner).unwrap_err();
        assert!(matches!(err, BuilderError::Join(JoinError::InvalidJoin { .. })));
    }

    #[test]
    fn test_subquery_bumps_outer_generation() {
        let mut cb = builder();
        let before = cb.generation();
        let mut sub = cb.subquery("Customer", "c").unwrap();
        sub.where_("c.id = 1").unwrap();
        sub.end().unwrap();
        assert_eq!(cb.generation(), before + 2);
    }
}
