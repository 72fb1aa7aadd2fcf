use thiserror::Error;

use crate::schema_catalog::SchemaCatalogError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Ordering by association '{path}' does not make sense! Please order by its id instead!")]
    AssociationOrdering { path: String },

    #[error("Ordering by plural attribute '{path}' does not make sense! Please order by its id instead!")]
    PluralAttributeOrdering { path: String },

    #[error("Path `{path}` must be resolved before it can be analyzed")]
    UnresolvedPath { path: String },

    #[error(transparent)]
    Catalog(#[from] SchemaCatalogError),
}
