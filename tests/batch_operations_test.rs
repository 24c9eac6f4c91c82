//! Batch document operations: single-statement writes, partial success,
//! and per-id error reporting.

mod common;

use serde::{Deserialize, Serialize};
use whisker::{Collection, Document, Error, Store, StoreOptions};

#[derive(Debug, Clone, Serialize, Deserialize, Document)]
struct Item {
    id: String,
    version: i64,
    label: String,
}

fn item(id: &str, label: &str) -> Item {
    Item {
        id: id.into(),
        version: 0,
        label: label.into(),
    }
}

#[tokio::test]
async fn insert_many_then_load_many() {
    let Some(store) = common::connect().await else {
        return;
    };
    let items = Collection::<Item>::new(&store, &common::unique_name("items"));

    let mut docs = vec![item("a", "one"), item("b", "two"), item("c", "three")];
    items.insert_many(&mut docs).await.unwrap();
    assert!(docs.iter().all(|d| d.version == 1));

    let (loaded, missing) = items.load_many(&["a", "b", "c"]).await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(missing.is_none());
}

#[tokio::test]
async fn load_many_reports_missing_ids_alongside_found() {
    let Some(store) = common::connect().await else {
        return;
    };
    let items = Collection::<Item>::new(&store, &common::unique_name("items"));

    let mut docs = vec![item("a", "one"), item("b", "two")];
    items.insert_many(&mut docs).await.unwrap();

    let (loaded, missing) = items.load_many(&["a", "ghost", "b", "phantom"]).await.unwrap();
    assert_eq!(loaded.len(), 2);

    let batch = missing.expect("missing ids reported");
    assert_eq!(batch.op, "load");
    assert_eq!(batch.total, 4);
    assert_eq!(batch.errors.len(), 2);
    assert!(batch.errors["ghost"].is_not_found());
    assert!(batch.errors["phantom"].is_not_found());
}

#[tokio::test]
async fn insert_many_duplicate_rolls_back_and_reports_all_ids() {
    let Some(store) = common::connect().await else {
        return;
    };
    let items = Collection::<Item>::new(&store, &common::unique_name("items"));

    items.insert(&mut item("b", "existing")).await.unwrap();

    let mut docs = vec![item("a", "one"), item("b", "dup")];
    let err = items.insert_many(&mut docs).await.unwrap_err();
    let Error::Batch(batch) = err else {
        panic!("expected batch error, got {err}");
    };
    assert_eq!(batch.op, "insert");
    assert_eq!(batch.errors.len(), 2);

    // The whole statement rolled back: "a" was not inserted.
    assert!(!items.exists("a").await.unwrap());
}

#[tokio::test]
async fn update_many_applies_and_reports_version_conflicts() {
    let Some(store) = common::connect().await else {
        return;
    };
    let items = Collection::<Item>::new(&store, &common::unique_name("items"));

    let mut docs = vec![item("a", "one"), item("b", "two")];
    items.insert_many(&mut docs).await.unwrap();

    // Stale copy of "b" loses the race against this update.
    let mut stale_b = items.load("b").await.unwrap();
    let mut fresh_b = items.load("b").await.unwrap();
    fresh_b.label = "two prime".into();
    items.update(&mut fresh_b).await.unwrap();

    docs[0].label = "one updated".into();
    stale_b.label = "stale write".into();
    let mut batch_docs = vec![docs[0].clone(), stale_b];
    let outcome = items.update_many(&mut batch_docs).await.unwrap();

    let batch = outcome.expect("stale update reported");
    assert_eq!(batch.op, "update");
    assert_eq!(batch.errors.len(), 1);
    assert!(matches!(batch.errors["b"], Error::VersionConflict(_)));

    // "a" was updated and its version bumped in place.
    assert_eq!(batch_docs[0].version, 2);
    let a = items.load("a").await.unwrap();
    assert_eq!(a.label, "one updated");
    assert_eq!(a.version, 2);

    // "b" kept the fresh write.
    let b = items.load("b").await.unwrap();
    assert_eq!(b.label, "two prime");
}

#[tokio::test]
async fn delete_many_deletes_present_and_reports_absent() {
    let Some(store) = common::connect().await else {
        return;
    };
    let items = Collection::<Item>::new(&store, &common::unique_name("items"));

    let mut docs = vec![item("a", "one"), item("b", "two")];
    items.insert_many(&mut docs).await.unwrap();

    let outcome = items.delete_many(&["a", "ghost", "b"]).await.unwrap();
    let batch = outcome.expect("absent id reported");
    assert_eq!(batch.op, "delete");
    assert_eq!(batch.errors.len(), 1);
    assert!(batch.errors["ghost"].is_not_found());

    assert_eq!(items.count().await.unwrap(), 0);
}

#[tokio::test]
async fn batch_limit_applies_to_every_operation() {
    let Ok(url) = std::env::var("WHISKER_TEST_DATABASE_URL") else {
        eprintln!("skipping: WHISKER_TEST_DATABASE_URL not set");
        return;
    };
    let store = Store::connect_with(&url, StoreOptions::new().max_batch_size(2))
        .await
        .unwrap();
    let items = Collection::<Item>::new(&store, &common::unique_name("items"));

    let mut docs = vec![item("a", "1"), item("b", "2"), item("c", "3")];
    let err = items.insert_many(&mut docs).await.unwrap_err();
    assert!(matches!(err, Error::BatchTooLarge { size: 3, max: 2, .. }));

    // Nothing was written.
    assert_eq!(items.count().await.unwrap(), 0);
}
