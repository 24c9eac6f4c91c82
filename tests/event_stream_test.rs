//! Event stream invariants: contiguous versions, optimistic appends, and
//! the global ordering.

mod common;

use serde_json::json;
use whisker::{Error, EventStore, NewEvent};

#[tokio::test]
async fn append_and_read_stream() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);
    let stream = common::unique_name("order");

    events
        .append(
            &stream,
            0,
            &[
                NewEvent::new("OrderCreated", json!({"item": "widget"})),
                NewEvent::new("OrderPaid", json!({"amount": 100})),
            ],
        )
        .await
        .unwrap();

    let read = events.read_stream(&stream, 0).await.unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].version, 1);
    assert_eq!(read[0].event_type, "OrderCreated");
    assert_eq!(read[0].data, json!({"item": "widget"}));
    assert_eq!(read[1].version, 2);
    assert_eq!(read[1].event_type, "OrderPaid");
    assert!(read[0].global_position < read[1].global_position);
}

#[tokio::test]
async fn append_to_existing_stream_with_zero_fails() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);
    let stream = common::unique_name("order");

    events
        .append(&stream, 0, &[NewEvent::new("OrderCreated", json!({}))])
        .await
        .unwrap();

    let err = events
        .append(&stream, 0, &[NewEvent::new("OrderCreated", json!({}))])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamExists { .. }), "{err}");
}

#[tokio::test]
async fn append_with_wrong_expected_version_fails() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);
    let stream = common::unique_name("order");

    events
        .append(&stream, 0, &[NewEvent::new("OrderCreated", json!({}))])
        .await
        .unwrap();

    let err = events
        .append(&stream, 5, &[NewEvent::new("OrderPaid", json!({}))])
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict(), "{err}");
}

#[tokio::test]
async fn versions_stay_contiguous_across_appends() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);
    let stream = common::unique_name("order");

    events
        .append(
            &stream,
            0,
            &[
                NewEvent::new("E", json!({"n": 1})),
                NewEvent::new("E", json!({"n": 2})),
            ],
        )
        .await
        .unwrap();
    events
        .append(&stream, 2, &[NewEvent::new("E", json!({"n": 3}))])
        .await
        .unwrap();

    let read = events.read_stream(&stream, 0).await.unwrap();
    let versions: Vec<i32> = read.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    let tail = events.read_stream(&stream, 3).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].data, json!({"n": 3}));
}

#[tokio::test]
async fn empty_append_is_invalid() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);

    let err = events
        .append(&common::unique_name("order"), 0, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn missing_stream_reads_empty() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);

    let read = events
        .read_stream(&common::unique_name("ghost"), 0)
        .await
        .unwrap();
    assert!(read.is_empty());
}

#[tokio::test]
async fn read_all_is_globally_ordered_past_a_cursor() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);
    let s1 = common::unique_name("order");
    let s2 = common::unique_name("order");

    events
        .append(&s1, 0, &[NewEvent::new("E", json!({"s": 1}))])
        .await
        .unwrap();
    events
        .append(&s2, 0, &[NewEvent::new("E", json!({"s": 2}))])
        .await
        .unwrap();
    events
        .append(&s1, 1, &[NewEvent::new("E", json!({"s": 1, "n": 2}))])
        .await
        .unwrap();

    // Walk the whole log in pages; our three events must appear in
    // commit order, strictly increasing in global position.
    let mut cursor = 0;
    let mut ours = Vec::new();
    loop {
        let page = events.read_all(cursor, 500).await.unwrap();
        if page.is_empty() {
            break;
        }
        for event in &page {
            assert!(event.global_position > cursor);
            cursor = event.global_position;
            if event.stream_id == s1 || event.stream_id == s2 {
                ours.push((event.stream_id.clone(), event.version));
            }
        }
    }
    assert_eq!(
        ours,
        vec![(s1.clone(), 1), (s2.clone(), 1), (s1.clone(), 2)]
    );
}

#[tokio::test]
async fn metadata_round_trips() {
    let Some(store) = common::connect().await else {
        return;
    };
    let events = EventStore::new(&store);
    let stream = common::unique_name("order");

    events
        .append(
            &stream,
            0,
            &[
                NewEvent::new("E", json!({})).with_metadata(json!({"actor": "u1"})),
                NewEvent::new("E2", json!({})),
            ],
        )
        .await
        .unwrap();

    let read = events.read_stream(&stream, 0).await.unwrap();
    assert_eq!(read[0].metadata, Some(json!({"actor": "u1"})));
    assert_eq!(read[1].metadata, None);
}
