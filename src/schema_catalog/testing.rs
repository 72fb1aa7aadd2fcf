//! Shared schema fixture for unit tests.

use super::EntityMetamodel;

pub const SHOP_SCHEMA: &str = include_str!("../../tests/fixtures/shop_schema.yaml");

pub fn shop_metamodel() -> EntityMetamodel {
    EntityMetamodel::from_yaml_str(SHOP_SCHEMA).expect("shop fixture must load")
}
