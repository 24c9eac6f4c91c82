//! Query builder execution: filters on JSONB paths, ordering, pagination,
//! and the cursor-style `after`.

mod common;

use serde::{Deserialize, Serialize};
use whisker::{Collection, Direction, Document, Error};

#[derive(Debug, Clone, Serialize, Deserialize, Document)]
struct Product {
    id: String,
    version: i64,
    name: String,
    #[document(index)]
    category: String,
    price: i64,
}

fn product(id: &str, name: &str, category: &str, price: i64) -> Product {
    Product {
        id: id.into(),
        version: 0,
        name: name.into(),
        category: category.into(),
        price,
    }
}

async fn seeded(store: &whisker::Store) -> Collection<Product> {
    let products = Collection::<Product>::new(store, &common::unique_name("products"));
    let mut docs = vec![
        product("p1", "anvil", "tools", 50),
        product("p2", "hammer", "tools", 15),
        product("p3", "apple", "food", 2),
        product("p4", "banana", "food", 1),
    ];
    products.insert_many(&mut docs).await.unwrap();
    products
}

#[tokio::test]
async fn filter_on_json_field() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    let tools = products
        .filter("category", "=", "tools")
        .order_by("name", Direction::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].name, "anvil");
    assert_eq!(tools[1].name, "hammer");
}

#[tokio::test]
async fn filter_on_reserved_column() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    let by_id = products.filter("id", "=", "p3").execute().await.unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].name, "apple");
    assert_eq!(by_id[0].version, 1);
}

#[tokio::test]
async fn order_limit_offset() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    let page = products
        .query()
        .order_by("name", Direction::Asc)
        .limit(2)
        .offset(1)
        .execute()
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].name, "apple");
    assert_eq!(page[1].name, "banana");
}

#[tokio::test]
async fn after_cursor_pagination() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    let first = products
        .query()
        .order_by("name", Direction::Asc)
        .limit(2)
        .execute()
        .await
        .unwrap();
    assert_eq!(first[1].name, "apple");

    let next = products
        .query()
        .order_by("name", Direction::Asc)
        .after(first[1].name.clone())
        .limit(2)
        .execute()
        .await
        .unwrap();
    assert_eq!(next[0].name, "banana");
    assert_eq!(next[1].name, "hammer");
}

#[tokio::test]
async fn after_without_order_by_fails() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    let err = products.query().after("x").execute().await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn invalid_field_fails_before_io() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    let err = products
        .filter("name; DROP TABLE x", "=", "oops")
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

    let err = products.filter("name", "LIKE", "%a%").execute().await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn count_and_exists_with_conditions() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    assert_eq!(
        products.filter("category", "=", "food").count().await.unwrap(),
        2
    );
    assert!(products.filter("category", "=", "food").exists().await.unwrap());
    assert!(!products
        .filter("category", "=", "furniture")
        .exists()
        .await
        .unwrap());
}

#[tokio::test]
async fn numeric_comparison_via_raw_json_path() {
    let Some(store) = common::connect().await else {
        return;
    };
    let products = seeded(&store).await;

    // Caller opts into a raw JSONB expression for a typed comparison.
    let cheap = products
        .filter("(data->>'price')::bigint", "<", 10i64)
        .order_by("name", Direction::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(cheap.len(), 2);
    assert_eq!(cheap[0].name, "apple");
}
