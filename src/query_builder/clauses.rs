//! Clause state shared by the top-level builder and subquery builders.
//!
//! Every expression is resolved against the join tree when it is added, so the
//! rendered text always reflects the node aliases at render time.

use std::collections::BTreeSet;

use super::errors::BuilderError;
use crate::config::PlannerConfig;
use crate::expression::render::{write_list, write_order_by_items};
use crate::expression::{
    parse_expression, parse_order_by_item, parse_predicate, write_expression, write_predicate,
    CompoundPredicate, Expression, OrderByItem, PathElement, Predicate,
};
use crate::join_manager::{flatten_conjuncts, ImplicitJoinContext, JoinManager, JoinPathStyle, QueryGraph};
use crate::join_tree::ClauseType;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expression: Expression,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Clauses {
    pub select: Vec<SelectItem>,
    pub filters: Vec<Predicate>,
    pub group_by: Vec<Expression>,
    pub having: Vec<Predicate>,
    pub order_by: Vec<OrderByItem>,
    pub in_subquery: bool,
}

impl Clauses {
    pub fn for_subquery() -> Self {
        Clauses {
            in_subquery: true,
            ..Default::default()
        }
    }

    fn context(&self, clause: ClauseType) -> ImplicitJoinContext {
        ImplicitJoinContext {
            from_subquery: self.in_subquery,
            ..ImplicitJoinContext::for_clause(clause)
        }
    }

    // ===== ADDING =====

    pub fn add_select(
        &mut self,
        manager: &JoinManager,
        graph: &mut QueryGraph,
        mut expression: Expression,
        alias: Option<&str>,
    ) -> Result<(), BuilderError> {
        let snapshot = alias.map(|_| graph.clone());
        manager.implicit_join(graph, &mut expression, self.context(ClauseType::Select))?;
        if let (Some(alias), Some(snapshot)) = (alias, snapshot) {
            if let Err(e) = manager.register_select_alias(graph, alias, expression.clone()) {
                *graph = snapshot;
                return Err(e.into());
            }
        }
        self.select.push(SelectItem {
            expression,
            alias: alias.map(str::to_string),
        });
        Ok(())
    }

    pub fn add_where(
        &mut self,
        manager: &JoinManager,
        graph: &mut QueryGraph,
        mut predicate: Predicate,
    ) -> Result<(), BuilderError> {
        manager.implicit_join_predicate(graph, &mut predicate, self.context(ClauseType::Where))?;
        self.filters.extend(flatten_conjuncts(predicate));
        Ok(())
    }

    pub fn add_group_by(&mut self, manager: &JoinManager, graph: &mut QueryGraph, text: &str) -> Result<(), BuilderError> {
        let mut expression = parse_expression(text)?;
        manager.implicit_join(graph, &mut expression, self.context(ClauseType::GroupBy))?;
        self.group_by.push(expression);
        Ok(())
    }

    pub fn add_having(&mut self, manager: &JoinManager, graph: &mut QueryGraph, text: &str) -> Result<(), BuilderError> {
        let mut predicate = parse_predicate(text)?;
        manager.implicit_join_predicate(graph, &mut predicate, self.context(ClauseType::Having))?;
        self.having.extend(flatten_conjuncts(predicate));
        Ok(())
    }

    pub fn add_order_by(
        &mut self,
        manager: &JoinManager,
        graph: &mut QueryGraph,
        mut item: OrderByItem,
    ) -> Result<(), BuilderError> {
        manager.implicit_join(graph, &mut item.expression, self.context(ClauseType::OrderBy))?;
        self.order_by.push(item);
        Ok(())
    }

    pub fn parse_order_by(text: &str, ascending: bool) -> Result<OrderByItem, BuilderError> {
        Ok(OrderByItem {
            expression: parse_expression(text)?,
            ascending,
            nulls_first: None,
        })
    }

    pub fn parse_order_by_item(text: &str) -> Result<OrderByItem, BuilderError> {
        Ok(parse_order_by_item(text)?)
    }

    // ===== DERIVED =====

    /// The WHERE clause as one predicate
    pub fn filter(&self) -> Option<Predicate> {
        match self.filters.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            all => Some(Predicate::Compound(CompoundPredicate::and(all.to_vec()))),
        }
    }

    /// `expr` with a whole reference to a select alias replaced by the aliased
    /// expression
    pub fn dealias(&self, expression: &Expression) -> Expression {
        if let Expression::Path(path) = expression {
            if let (None, [PathElement::Property(name)]) = (&path.reference, path.elements.as_slice()) {
                if let Some(item) = self
                    .select
                    .iter()
                    .find(|s| s.alias.as_deref() == Some(name.as_str()))
                {
                    return item.expression.clone();
                }
            }
        }
        expression.clone()
    }

    pub fn is_aggregated(&self) -> bool {
        !self.group_by.is_empty()
            || !self.having.is_empty()
            || self.select.iter().any(|s| s.expression.contains_aggregate())
    }

    /// Explicit group-by items, followed by the non-aggregate select and order-by
    /// expressions when the query aggregates and implicit grouping is enabled
    pub fn effective_group_by(&self, config: &PlannerConfig) -> Vec<Expression> {
        let mut items = self.group_by.clone();
        if !config.implicit_group_by_from_select || !self.is_aggregated() {
            return items;
        }
        let implicit = self
            .select
            .iter()
            .map(|s| &s.expression)
            .chain(self.order_by.iter().map(|o| &o.expression));
        for expression in implicit {
            if is_groupable(expression) && !items.contains(expression) {
                items.push(expression.clone());
            }
        }
        items
    }

    // ===== RENDERING =====

    pub fn render(
        &self,
        manager: &JoinManager,
        graph: &QueryGraph,
        config: &PlannerConfig,
        render_fetches: bool,
    ) -> Result<String, BuilderError> {
        if manager.roots().is_empty() {
            return Err(BuilderError::MissingRoot);
        }
        let style = JoinPathStyle::new(&graph.tree, None);
        let mut out = String::from("SELECT ");
        self.write_select(&mut out, manager, &style);
        out.push_str(&manager.build_joins(graph, &BTreeSet::new(), None, render_fetches)?);
        self.write_filters(&mut out, &style);
        self.write_grouping(&mut out, config, &style);
        self.write_order_by(&mut out, &style);
        Ok(out)
    }

    pub fn write_select(&self, out: &mut String, manager: &JoinManager, style: &JoinPathStyle<'_>) {
        if self.select.is_empty() {
            for (i, root) in manager.roots().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                style.write_alias(out, *root);
            }
            return;
        }
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_expression(out, &item.expression, style);
            if let Some(alias) = &item.alias {
                out.push_str(" AS ");
                out.push_str(alias);
            }
        }
    }

    pub fn write_filters(&self, out: &mut String, style: &JoinPathStyle<'_>) {
        if let Some(filter) = self.filter() {
            out.push_str(" WHERE ");
            write_predicate(out, &filter, style);
        }
    }

    pub fn write_grouping(&self, out: &mut String, config: &PlannerConfig, style: &JoinPathStyle<'_>) {
        let group_by = self.effective_group_by(config);
        if !group_by.is_empty() {
            out.push_str(" GROUP BY ");
            write_list(out, &group_by, style);
        }
        match self.having.as_slice() {
            [] => {}
            [single] => {
                out.push_str(" HAVING ");
                write_predicate(out, single, style);
            }
            all => {
                out.push_str(" HAVING ");
                write_predicate(out, &Predicate::Compound(CompoundPredicate::and(all.to_vec())), style);
            }
        }
    }

    pub fn write_order_by(&self, out: &mut String, style: &JoinPathStyle<'_>) {
        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            write_order_by_items(out, &self.order_by, style);
        }
    }
}

fn is_groupable(expression: &Expression) -> bool {
    match expression {
        Expression::Path(path) => path.reference.is_some(),
        Expression::Parameter(_) | Expression::Literal(_) | Expression::Subquery(_) => false,
        Expression::Function(func) if func.window.is_some() => false,
        other => {
            let mut has_path = false;
            other.for_each_path(&mut |_| has_path = true);
            has_path && !other.contains_aggregate()
        }
    }
}
