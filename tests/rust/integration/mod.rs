//! Integration tests - criteria builder scenarios from schema file to rendered query
//!
//! These tests load the YAML schema fixture and exercise the builder end to end.

mod count_and_id_query_tests;
mod order_pagination_tests;
mod schema_loading_tests;
mod subquery_tests;

use std::sync::Arc;

use criteria_planner::config::PlannerConfig;
use criteria_planner::schema_catalog::EntityMetamodel;
use criteria_planner::CriteriaBuilder;

pub const SHOP_SCHEMA: &str = "tests/fixtures/shop_schema.yaml";

pub fn shop_builder() -> CriteriaBuilder {
    shop_builder_with(PlannerConfig::default())
}

pub fn shop_builder_with(config: PlannerConfig) -> CriteriaBuilder {
    let catalog = EntityMetamodel::from_yaml_file(SHOP_SCHEMA).expect("shop schema must load");
    CriteriaBuilder::new(Arc::new(catalog), Arc::new(config))
}
