use crate::expression::{Expression, PathElement, PathExpression, PathReference};
use crate::join_tree::JoinTree;
use crate::schema_catalog::{AttributeKind, SchemaCatalog};

/// Expands resolved paths to embedded attributes into one path per leaf attribute,
/// e.g. `l.id` into `l.id.lineNumber` and `l.id.orderNumber`
pub struct EmbeddableSplitter<'a> {
    catalog: &'a dyn SchemaCatalog,
    tree: &'a JoinTree,
}

impl<'a> EmbeddableSplitter<'a> {
    pub fn new(catalog: &'a dyn SchemaCatalog, tree: &'a JoinTree) -> Self {
        EmbeddableSplitter { catalog, tree }
    }

    /// Component paths of `expr`, or `None` when it is not a path to an embedded
    /// attribute
    pub fn split(&self, expr: &Expression) -> Option<Vec<Expression>> {
        let Expression::Path(path) = expr else {
            return None;
        };
        let reference = path.reference.as_ref()?;
        let field = reference.field.as_ref()?;
        let node_type = self.tree.node(reference.base_node).effective_type();
        let attr = self.catalog.resolve_attribute_path(node_type, field).ok()?;
        if attr.kind != AttributeKind::Embedded {
            return None;
        }

        let leaves = self.catalog.singular_paths(&attr.target);
        if leaves.is_empty() {
            return None;
        }
        Some(
            leaves
                .into_iter()
                .map(|leaf| {
                    let mut elements = path.elements.clone();
                    elements.extend(leaf.split('.').map(|p| PathElement::Property(p.to_string())));
                    Expression::Path(PathExpression {
                        elements,
                        reference: Some(PathReference {
                            base_node: reference.base_node,
                            field: Some(format!("{}.{}", field, leaf)),
                        }),
                    })
                })
                .collect(),
        )
    }

    /// Splits every embedded path in `exprs`, keeping the others as they are
    pub fn split_all(&self, exprs: &[Expression]) -> Vec<Expression> {
        let mut result = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.split(expr) {
                Some(parts) => result.extend(parts),
                None => result.push(expr.clone()),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::join_manager::{ImplicitJoinContext, JoinManager, QueryGraph};
    use crate::join_tree::ClauseType;
    use crate::schema_catalog::testing::shop_metamodel;
    use std::sync::Arc;

    fn resolved(entity: &str, alias: &str, texts: &[&str]) -> (QueryGraph, JoinManager, Vec<Expression>) {
        let mut graph = QueryGraph::new();
        let mut manager = JoinManager::new(
            &mut graph,
            None,
            Arc::new(shop_metamodel()),
            Arc::new(PlannerConfig::default()),
        );
        manager.add_root(&mut graph, entity, alias).unwrap();
        let mut exprs = Vec::new();
        for text in texts {
            let mut expr = Expression::path(text);
            manager
                .implicit_join(&mut graph, &mut expr, ImplicitJoinContext::for_clause(ClauseType::OrderBy))
                .unwrap();
            exprs.push(expr);
        }
        (graph, manager, exprs)
    }

    #[test]
    fn test_embedded_id_is_split_into_components() {
        let (graph, manager, exprs) = resolved("OrderLine", "l", &["l.id", "l.quantity"]);
        let splitter = EmbeddableSplitter::new(manager.catalog(), &graph.tree);
        let split: Vec<String> = splitter
            .split_all(&exprs)
            .iter()
            .map(|e| e.to_string())
            .collect();
        assert_eq!(split, vec!["l.id.lineNumber", "l.id.orderNumber", "l.quantity"]);
    }

    #[test]
    fn test_non_embedded_paths_are_not_split() {
        let (graph, manager, exprs) = resolved("Order", "o", &["o.id", "o.customer.name"]);
        let splitter = EmbeddableSplitter::new(manager.catalog(), &graph.tree);
        assert!(splitter.split(&exprs[0]).is_none());
        assert!(splitter.split(&exprs[1]).is_none());
        assert!(splitter.split(&Expression::number(1)).is_none());
    }

    #[test]
    fn test_embeddable_with_association_keeps_foreign_key_leaf() {
        let (graph, manager, exprs) = resolved("Order", "o", &["o.shippingAddress"]);
        let splitter = EmbeddableSplitter::new(manager.catalog(), &graph.tree);
        let fields: Vec<Option<String>> = splitter
            .split(&exprs[0])
            .unwrap()
            .into_iter()
            .map(|e| e.as_path().and_then(|p| p.reference.clone()).and_then(|r| r.field))
            .collect();
        assert_eq!(
            fields,
            vec![
                Some("shippingAddress.city".to_string()),
                Some("shippingAddress.country".to_string()),
                Some("shippingAddress.street".to_string()),
            ]
        );
    }
}
