//! Order scenario: join kinds chosen from the model and pagination key validation

use criteria_planner::join_manager::JoinError;
use criteria_planner::join_tree::JoinType;
use criteria_planner::BuilderError;

use super::shop_builder;

#[test]
fn test_join_kinds_follow_the_model() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .where_("o.customer.name = :name")
        .unwrap()
        .order_by("o.items.price", true)
        .unwrap();

    let customer = cb.node("customer_1").unwrap();
    let items = cb.node("items_1").unwrap();
    assert_eq!(cb.graph().tree.node(customer).join_type, Some(JoinType::Inner));
    assert_eq!(cb.graph().tree.node(items).join_type, Some(JoinType::Left));
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o JOIN o.customer customer_1 LEFT JOIN o.items items_1 \
         WHERE customer_1.name = :name ORDER BY items_1.price ASC"
    );
}

#[test]
fn test_paging_by_root_identifier_passes() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .select("o.id")
        .unwrap()
        .order_by("o.id", true)
        .unwrap()
        .page(0, 25);
    assert!(cb.is_order_by_unique().unwrap());
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o.id FROM Order o ORDER BY o.id ASC LIMIT 25 OFFSET 0"
    );
}

#[test]
fn test_paging_by_collection_attribute_fails() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .select("o.id")
        .unwrap()
        .order_by("o.items.price", true)
        .unwrap()
        .page(0, 25);
    assert!(!cb.is_order_by_unique().unwrap());
    assert_eq!(cb.query_string().unwrap_err(), BuilderError::NonUniquePaginationKey);
    assert_eq!(cb.id_query_string().unwrap_err(), BuilderError::NonUniquePaginationKey);
}

#[test]
fn test_constantified_root_makes_any_ordering_unique() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .where_("o.id = :id")
        .unwrap()
        .order_by("o.number", false)
        .unwrap()
        .page(0, 1);
    assert!(cb.query_string().is_ok());
}

#[test]
fn test_later_filter_invalidates_uniqueness_verdict() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap().order_by("o.number", true).unwrap();
    assert!(!cb.is_order_by_unique().unwrap());

    cb.where_("o.id = :id").unwrap();
    assert!(cb.is_order_by_unique().unwrap());
}

#[test]
fn test_nulls_ordering_is_rendered() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .order_by_item("o.number DESC NULLS LAST")
        .unwrap()
        .order_by_item("o.id")
        .unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o ORDER BY o.number DESC NULLS LAST, o.id ASC"
    );
}

#[test]
fn test_unknown_attribute_is_reported() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let err = cb.where_("o.customer.nickname = :n").unwrap_err();
    assert!(matches!(
        err,
        BuilderError::Join(JoinError::UnresolvablePath { ref segment, .. }) if segment == "nickname"
    ));
    // Nothing was joined for the failing path
    assert_eq!(cb.graph().tree.len(), 1);
}

#[test]
fn test_alias_conflict_is_reported() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap().inner_join("o.customer", "c").unwrap();
    let query = cb.query_string().unwrap();
    let err = cb.left_join("o.items", "c").unwrap_err();
    assert_eq!(err.to_string(), "Alias conflict [c=o.customer, c=o.items]");
    assert_eq!(cb.graph().tree.len(), 2);
    assert_eq!(cb.query_string().unwrap(), query);
}

#[test]
fn test_failed_filter_keeps_joins_of_earlier_conjuncts_out() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let err = cb
        .where_("o.shipper.name = :s AND o.customer.nickname = :n")
        .unwrap_err();
    assert!(matches!(err, BuilderError::Join(JoinError::UnresolvablePath { .. })));
    assert_eq!(cb.graph().tree.len(), 1);
    assert_eq!(cb.query_string().unwrap(), "SELECT o FROM Order o");
}

#[test]
fn test_failed_join_condition_leaves_no_join() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let err = cb
        .join_on("o.shipper", "s", JoinType::Left, "s.nope = 1")
        .unwrap_err();
    assert!(matches!(
        err,
        BuilderError::Join(JoinError::UnresolvablePath { ref segment, .. }) if segment == "nope"
    ));
    let err = cb
        .entity_join("o", "Shipper", "x", JoinType::Left, "x.nope = o.id")
        .unwrap_err();
    assert!(matches!(err, BuilderError::Join(JoinError::UnresolvablePath { .. })));
    assert_eq!(cb.graph().tree.len(), 1);
    assert!(cb.node("s").is_none());
    assert!(cb.node("x").is_none());
    assert_eq!(cb.query_string().unwrap(), "SELECT o FROM Order o");
}
