//! Schema fixture loading and the model-dependent builder features: inheritance,
//! treat, entity joins, VALUES roots

use std::io::Write;

use criteria_planner::join_manager::JoinError;
use criteria_planner::join_tree::JoinType;
use criteria_planner::schema_catalog::{EntityMetamodel, SchemaCatalog, SchemaCatalogError};
use criteria_planner::BuilderError;

use super::{shop_builder, SHOP_SCHEMA};

#[test]
fn test_fixture_loads_with_flattened_identifiers() {
    let model = EntityMetamodel::from_yaml_file(SHOP_SCHEMA).unwrap();
    assert!(model.type_names().any(|t| t == "Order"));
    assert_eq!(model.identifier_paths("Order"), vec!["id"]);
    assert_eq!(
        model.identifier_paths("OrderLine"),
        vec!["id.lineNumber", "id.orderNumber"]
    );
    assert_eq!(model.subtypes("Document").len(), 3);
}

#[test]
fn test_invalid_schema_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "entities:\n  - name: Cart\n    attributes:\n      - name: code").unwrap();
    assert!(matches!(
        EntityMetamodel::from_yaml_file(file.path()),
        Err(SchemaCatalogError::InvalidIdentifier { .. })
    ));
}

#[test]
fn test_unknown_root_entity() {
    let mut cb = shop_builder();
    let err = cb.from("Invoicee", "i").unwrap_err();
    assert_eq!(
        err,
        BuilderError::Join(JoinError::Catalog(SchemaCatalogError::UnknownType {
            type_name: "Invoicee".to_string()
        }))
    );
}

#[test]
fn test_subtype_attribute_resolves_when_unambiguous() {
    let mut cb = shop_builder();
    cb.from("Document", "d").unwrap().where_("d.pages > 3").unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT d FROM Document d WHERE d.pages > 3"
    );
}

#[test]
fn test_subtype_attribute_with_conflicting_targets_is_rejected() {
    let mut cb = shop_builder();
    cb.from("Document", "d").unwrap();
    let err = cb.where_("d.signer.name = :n").unwrap_err();
    assert!(matches!(err, BuilderError::Join(_)));
    assert!(err.to_string().contains("signer"), "{}", err);
}

#[test]
fn test_treat_join_and_treated_view() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .join("TREAT(o.customer AS VipCustomer)", "v", JoinType::Inner, false, true)
        .unwrap()
        .select("v.level")
        .unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT v.level FROM Order o JOIN TREAT(o.customer AS VipCustomer) v"
    );

    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .inner_join("o.customer", "c")
        .unwrap()
        .treat("c", "VipCustomer", "vc")
        .unwrap()
        .select("vc.level")
        .unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT TREAT(c AS VipCustomer).level FROM Order o JOIN o.customer c"
    );
}

#[test]
fn test_entity_join() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .entity_join("o", "Shipper", "s", JoinType::Left, "s.id = o.customerId")
        .unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o LEFT JOIN Shipper s ON s.id = o.customerId"
    );
}

#[test]
fn test_single_row_values_root_is_unique() {
    let mut cb = shop_builder();
    cb.from_values("Product", "v", 1)
        .unwrap()
        .order_by("v.name", true)
        .unwrap()
        .page(0, 1);
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT v FROM Product(VALUES 1) v ORDER BY v.name ASC LIMIT 1 OFFSET 0"
    );
}
