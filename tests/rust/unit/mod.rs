//! Unit tests - join tree and uniqueness properties checked through the public API
//!
//! These tests only need the shop schema fixture, no external services.

mod join_tree_property_tests;
mod uniqueness_property_tests;

use std::sync::Arc;

use criteria_planner::config::PlannerConfig;
use criteria_planner::join_manager::{JoinManager, QueryGraph};
use criteria_planner::schema_catalog::EntityMetamodel;

pub const SHOP_SCHEMA: &str = "tests/fixtures/shop_schema.yaml";

/// A query graph with `Order o` as its only root
pub fn order_graph() -> (QueryGraph, JoinManager) {
    let catalog = EntityMetamodel::from_yaml_file(SHOP_SCHEMA).expect("shop schema must load");
    let mut graph = QueryGraph::new();
    let mut manager = JoinManager::new(
        &mut graph,
        None,
        Arc::new(catalog),
        Arc::new(PlannerConfig::default()),
    );
    manager
        .add_root(&mut graph, "Order", "o")
        .expect("Order is an entity");
    (graph, manager)
}
