//! Errors raised while resolving paths and building the join tree.
//!
//! All of them are raised synchronously by the call that caused them, and the call
//! leaves the join tree and alias scopes as they were. The exception is a dependency
//! cycle: it can only be seen after the offending ON predicate is attached, which is
//! left in place.

use thiserror::Error;

use crate::expression::ExpressionParseError;
use crate::schema_catalog::SchemaCatalogError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JoinError {
    #[error("Unresolvable path segment `{segment}` in `{path}`: {reason}")]
    UnresolvablePath {
        path: String,
        segment: String,
        reason: String,
    },

    #[error("Alias conflict [{existing_alias}={existing_path}, {alias}={path}]")]
    AliasConflict {
        existing_alias: String,
        existing_path: String,
        alias: String,
        path: String,
    },

    #[error("Alias `{alias}` is already used by the select item `{expression}`")]
    SelectAliasConflict { alias: String, expression: String },

    #[error("Can't dereference select alias `{alias}` of an enclosing query in `{path}`")]
    ExternalAliasDereference { alias: String, path: String },

    #[error("Can't dereference select alias `{alias}` in `{path}`")]
    SelectAliasDereference { alias: String, path: String },

    #[error("Cyclic join dependency between nodes: {}", chain.join(" -> "))]
    CyclicJoinDependency { chain: Vec<String> },

    #[error("Ambiguous join of `{relation}` below `{alias}`, candidates: {}", candidates.join(", "))]
    AmbiguousJoin {
        alias: String,
        relation: String,
        candidates: Vec<String>,
    },

    #[error("Unknown alias `{alias}`")]
    UnknownAlias { alias: String },

    #[error("Invalid alias `{alias}`")]
    InvalidAlias { alias: String },

    #[error("Invalid join of `{path}`: {reason}")]
    InvalidJoin { path: String, reason: String },

    #[error(transparent)]
    Catalog(#[from] SchemaCatalogError),

    #[error(transparent)]
    Parse(#[from] ExpressionParseError),
}

impl JoinError {
    pub(crate) fn unresolvable(
        path: impl Into<String>,
        segment: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        JoinError::UnresolvablePath {
            path: path.into(),
            segment: segment.into(),
            reason: reason.into(),
        }
    }
}
