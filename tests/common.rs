#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use whisker::Store;

/// Connects to the test database named by `WHISKER_TEST_DATABASE_URL`, or
/// returns `None` (and the test passes vacuously) when the variable is
/// unset. Integration tests share one database, so every test uses
/// [`unique_name`] for collections, streams, and subscribers.
pub async fn connect() -> Option<Store> {
    let Ok(url) = std::env::var("WHISKER_TEST_DATABASE_URL") else {
        eprintln!("skipping: WHISKER_TEST_DATABASE_URL not set");
        return None;
    };
    Some(
        Store::connect(&url)
            .await
            .expect("connect to test database"),
    )
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A collection/stream/subscriber name unique across test runs against a
/// shared database. Stays within the collection-name grammar.
pub fn unique_name(prefix: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch");
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{prefix}_{}_{}_{n}",
        std::process::id(),
        now.as_millis() % 100_000_000
    )
}

/// Polls `f` until it returns `Some`, panicking after `timeout`.
pub async fn eventually<T, F, Fut>(timeout: Duration, interval: Duration, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = std::time::Instant::now();
    loop {
        if let Some(value) = f().await {
            return value;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(interval).await;
    }
}
