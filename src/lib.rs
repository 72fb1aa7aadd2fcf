//! Criteria Planner - join resolution and uniqueness analysis for criteria queries
//!
//! This crate turns criteria-style query descriptions into JPQL-like query text:
//! - Alias scopes and an arena-backed join tree per query graph
//! - Explicit, implicit, entity and correlated joins resolved against a schema
//! - Constantified-attribute collection over the WHERE predicate
//! - Functional-dependency analysis for pagination and count queries
//! - A fluent builder that renders main, count and id queries

pub mod analysis;
pub mod config;
pub mod expression;
pub mod join_manager;
pub mod join_tree;
pub mod query_builder;
pub mod schema_catalog;

pub use query_builder::{BuilderError, CriteriaBuilder};
