//! Subqueries sharing the join arena of their enclosing query

use super::shop_builder;

#[test]
fn test_correlated_not_exists() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let subquery = {
        let mut sub = cb.subquery("o.notes", "n").unwrap();
        sub.select("n.id").unwrap().where_("n.text LIKE :pattern").unwrap();
        sub.end().unwrap()
    };
    cb.where_not_exists(subquery).unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o WHERE NOT EXISTS (SELECT n.id FROM o.notes n WHERE n.text LIKE :pattern)"
    );
}

#[test]
fn test_scalar_subquery_in_select() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let subquery = {
        let mut sub = cb.subquery("o.items", "i").unwrap();
        sub.select("COUNT(i.id)").unwrap();
        sub.end().unwrap()
    };
    cb.select_subquery(subquery, "itemCount").unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT (SELECT COUNT(i.id) FROM o.items i) AS itemCount FROM Order o"
    );
}

#[test]
fn test_uncorrelated_subquery_reads_outer_alias() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let subquery = {
        let mut sub = cb.subquery("Customer", "c").unwrap();
        sub.select("c.id").unwrap().where_("c.id = o.customerId").unwrap();
        assert!(sub.is_external_alias("o"));
        sub.end().unwrap()
    };
    cb.where_exists(subquery).unwrap();
    assert_eq!(
        cb.query_string().unwrap(),
        "SELECT o FROM Order o WHERE EXISTS (SELECT c.id FROM Customer c WHERE c.id = o.customerId)"
    );
}

#[test]
fn test_subquery_joins_stay_out_of_outer_query() {
    let mut cb = shop_builder();
    cb.from("Order", "o").unwrap();
    let subquery = {
        let mut sub = cb.subquery("o.items", "i").unwrap();
        sub.select("i.id").unwrap().where_("i.product.name = :p").unwrap();
        sub.end().unwrap()
    };
    assert_eq!(
        subquery.text,
        "SELECT i.id FROM o.items i JOIN i.product product_1 WHERE product_1.name = :p"
    );
    cb.where_exists(subquery).unwrap();
    assert!(cb.query_string().unwrap().starts_with("SELECT o FROM Order o WHERE EXISTS"));
    assert_eq!(
        cb.count_query_string().unwrap(),
        "SELECT COUNT(*) FROM Order o WHERE EXISTS \
         (SELECT i.id FROM o.items i JOIN i.product product_1 WHERE product_1.name = :p)"
    );
}
