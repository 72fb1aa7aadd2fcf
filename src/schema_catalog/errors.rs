//! Errors raised while loading or querying the schema catalog.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaCatalogError {
    #[error("No managed type found for `{type_name}`")]
    UnknownType { type_name: String },
    #[error("Attribute `{attribute}` not found on type `{type_name}`")]
    UnknownAttribute { type_name: String, attribute: String },
    #[error(
        "Attribute `{attribute}` resolves inconsistently across subtypes of `{type_name}`: {candidates}"
    )]
    AmbiguousAttribute {
        type_name: String,
        attribute: String,
        candidates: String,
    },
    #[error("Duplicate type definition `{type_name}`")]
    DuplicateType { type_name: String },
    #[error("Invalid identifier for `{type_name}`: {message}")]
    InvalidIdentifier { type_name: String, message: String },
    #[error("Failed to read schema file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse schema: {error}")]
    ConfigParseError { error: String },
    #[error("Invalid schema: {message}")]
    InvalidConfig { message: String },
}

impl SchemaCatalogError {
    /// Create an UnknownAttribute error with context information
    ///
    /// # Example
    /// ```ignore
    /// SchemaCatalogError::attribute_error_with_context(
    ///     "Order",
    ///     "custmer",
    ///     "While resolving path o.custmer.name"
    /// )
    /// ```
    pub fn attribute_error_with_context(
        type_name: impl Into<String>,
        attribute: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        SchemaCatalogError::UnknownAttribute {
            type_name: type_name.into(),
            attribute: format!("{}\n  Context: {}", attribute.into(), context.into()),
        }
    }
}
