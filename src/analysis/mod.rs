//! Uniqueness analysis over resolved expressions.
//!
//! - [`constantified`] collects attributes pinned to a single value by the WHERE
//!   predicate.
//! - [`functional_dependency`] decides whether a list of expressions identifies at
//!   most one row, and which root expressions that verdict depends on.
//! - [`embeddable_splitting`] expands paths to embedded identifiers into their
//!   components.
//!
//! Everything here only reads the join tree; results are keyed by [`NodeKey`].

pub mod constantified;
pub mod embeddable_splitting;
pub mod errors;
pub mod functional_dependency;

pub use constantified::{ConstantifiedAttributeCollector, ConstantifiedAttributes};
pub use embeddable_splitting::EmbeddableSplitter;
pub use errors::AnalysisError;
pub use functional_dependency::{FunctionalDependencyAnalyzer, ResolvedExpression};

use crate::join_tree::{JoinNodeId, JoinTree};
use crate::schema_catalog::SchemaCatalog;

/// What a set of constantified or identifying attributes belongs to: a join node, or
/// a to-one association of a node read through its foreign key (`o.customer.id`
/// without a join)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Node(JoinNodeId),
    Association(JoinNodeId, String),
}

impl NodeKey {
    pub fn node(&self) -> JoinNodeId {
        match self {
            NodeKey::Node(id) | NodeKey::Association(id, _) => *id,
        }
    }
}

/// Split a resolved field into the key it belongs to and the attribute path below
/// that key. A field passing through a to-one association (`customer.id`) belongs to
/// the association.
pub(crate) fn node_key(
    catalog: &dyn SchemaCatalog,
    tree: &JoinTree,
    node: JoinNodeId,
    field: &str,
) -> (NodeKey, String) {
    let identity = tree.identity(node);
    let node_type = tree.node(node).effective_type();
    let segments: Vec<&str> = field.split('.').collect();
    for i in 1..segments.len() {
        let prefix = segments[..i].join(".");
        if let Ok(attr) = catalog.resolve_attribute_path(node_type, &prefix) {
            if attr.kind.is_to_one() {
                return (
                    NodeKey::Association(identity, prefix),
                    segments[i..].join("."),
                );
            }
        }
    }
    (NodeKey::Node(identity), field.to_string())
}

/// Managed type whose identifying attributes apply to `key`
pub(crate) fn key_type(catalog: &dyn SchemaCatalog, tree: &JoinTree, key: &NodeKey) -> Option<String> {
    match key {
        NodeKey::Node(id) => Some(tree.node(*id).effective_type().to_string()),
        NodeKey::Association(id, relation) => catalog
            .resolve_attribute_path(tree.node(*id).effective_type(), relation)
            .ok()
            .map(|attr| attr.target.clone()),
    }
}

/// Identifier attribute paths of `type_name`, or all singular attribute paths for
/// types without an identifier
pub(crate) fn identifying_paths(catalog: &dyn SchemaCatalog, type_name: &str) -> Vec<String> {
    let ids = catalog.identifier_paths(type_name);
    if ids.is_empty() {
        catalog.singular_paths(type_name)
    } else {
        ids
    }
}
