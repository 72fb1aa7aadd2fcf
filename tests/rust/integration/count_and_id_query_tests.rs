//! Count and id queries derived from one builder

use criteria_planner::config::PlannerConfig;
use criteria_planner::BuilderError;

use super::{shop_builder, shop_builder_with};

#[test]
fn test_count_uses_plain_count_without_collections() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .select("o.shipper.name")
        .unwrap()
        .select("o.items.price")
        .unwrap()
        .where_("o.total > :min")
        .unwrap()
        .order_by("o.number", true)
        .unwrap();
    assert_eq!(
        cb.count_query_string().unwrap(),
        "SELECT COUNT(*) FROM Order o WHERE o.total > :min"
    );
}

#[test]
fn test_count_is_distinct_when_filtering_through_collection() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .where_("o.items.product.name = :product")
        .unwrap();
    assert_eq!(
        cb.count_query_string().unwrap(),
        "SELECT COUNT(DISTINCT o.id) FROM Order o LEFT JOIN o.items items_1 \
         LEFT JOIN items_1.product product_1 WHERE product_1.name = :product"
    );
}

#[test]
fn test_count_keeps_filtering_joins() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap().inner_join("o.shipper", "s").unwrap();
    // An inner join of an optional association removes rows, so it stays
    assert_eq!(
        cb.count_query_string().unwrap(),
        "SELECT COUNT(*) FROM Order o JOIN o.shipper s"
    );
}

#[test]
fn test_count_drops_unused_explicit_outer_join() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap().left_join("o.shipper", "s").unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o LEFT JOIN o.shipper s"
    );
    // Neither filtering nor multiplying root rows, so the count leaves it out
    assert_eq!(cb.count_query_string().unwrap(), "SELECT COUNT(*) FROM Order o");
}

#[test]
fn test_count_of_composite_identifier() {
    let mut cb = shop_builder();
    cb.from("OrderLine", "l")
        .unwrap()
        .where_("l.order.items.quantity > 1")
        .unwrap();
    let count = cb.count_query_string().unwrap();
    assert!(
        count.starts_with("SELECT COUNT(DISTINCT l.id.lineNumber, l.id.orderNumber) FROM OrderLine l"),
        "{}",
        count
    );
}

#[test]
fn test_count_rejects_grouped_queries() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .select("o.customer.name")
        .unwrap()
        .select("COUNT(o.id)")
        .unwrap()
        .group_by("o.customer.name")
        .unwrap();
    assert_eq!(cb.count_query_string().unwrap_err(), BuilderError::GroupedCount);
}

#[test]
fn test_id_query_selects_only_dependency_roots() {
    let mut cb = shop_builder();
    cb.from("Order", "o")
        .unwrap()
        .select("o.items.price")
        .unwrap()
        .order_by("o.customer.name", true)
        .unwrap()
        .order_by("o.id", true)
        .unwrap()
        .page(10, 5);
    assert_eq!(
        cb.id_query_string().unwrap(),
        "SELECT o.id FROM Order o JOIN o.customer customer_1 \
         ORDER BY customer_1.name ASC, o.id ASC LIMIT 5 OFFSET 10"
    );
}

#[test]
fn test_id_query_requires_ordering() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap().page(0, 10);
    assert_eq!(cb.id_query_string().unwrap_err(), BuilderError::MissingOrderBy);
}

#[test]
fn test_fetch_joins_are_rendered_per_config() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap().fetch("o.items").unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o LEFT JOIN FETCH o.items items_1"
    );
    // Never in a count query
    assert_eq!(
        cb.count_query_string().unwrap(),
        "SELECT COUNT(*) FROM Order o"
    );

    let mut plain = shop_builder_with(PlannerConfig {
        render_fetch_joins: false,
        ..PlannerConfig::default()
    });
    plain.from("Order", "o").unwrap().fetch("o.items").unwrap();
    assert_eq!(
        plain.query_string().unwrap(),
        "SELECT o FROM Order o LEFT JOIN o.items items_1"
    );
}
