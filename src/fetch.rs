use crate::error::AggregationError;
use crate::object_store::{ObjectStore, StoreError};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

/// Fetch the bodies of `keys` with at most `concurrency` gets in flight.
///
/// Output order matches `keys` regardless of completion order. The first
/// failure aborts the whole batch: the underlying stream is dropped, which
/// cancels queued and in-flight fetches, and no partial result is returned.
pub async fn fetch_all(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
    concurrency: usize,
) -> Result<Vec<Vec<u8>>, AggregationError> {
    let concurrency = concurrency.max(1);

    debug!(
        count = keys.len(),
        concurrency = concurrency,
        "Fetching source objects"
    );

    stream::iter(keys.iter().cloned().map(|key| async move {
        store.get(bucket, &key).await.map_err(|err| match err {
            StoreError::NotFound => AggregationError::ObjectNotFound { key: key.clone() },
            other => AggregationError::Store {
                op: "get",
                key: key.clone(),
                source: other,
            },
        })
    }))
    .buffered(concurrency)
    .try_collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryStore;
    use std::time::Duration;

    fn seeded_store(n: usize) -> (InMemoryStore, Vec<String>) {
        let store = InMemoryStore::new().with_get_delay(Duration::from_millis(10));
        let keys: Vec<String> = (0..n)
            .map(|i| format!("realtime/2020-01-01/{i}.ndjson"))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            store.insert("bucket", key, format!("body-{i}"));
        }
        (store, keys)
    }

    #[tokio::test]
    async fn test_output_order_matches_input_order() {
        let (store, mut keys) = seeded_store(6);
        // Request in an order different from listing order.
        keys.reverse();

        let bodies = fetch_all(&store, "bucket", &keys, 3).await.unwrap();

        let expected: Vec<Vec<u8>> = (0..6).rev().map(|i| format!("body-{i}").into_bytes()).collect();
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let (store, keys) = seeded_store(8);

        fetch_all(&store, "bucket", &keys, 2).await.unwrap();

        assert!(store.max_in_flight_gets() <= 2);
        assert!(store.max_in_flight_gets() >= 1);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_batch() {
        let (store, keys) = seeded_store(5);
        store.fail_gets_for(&keys[1]);

        let err = fetch_all(&store, "bucket", &keys, 2).await.unwrap_err();
        assert!(matches!(err, AggregationError::Store { op: "get", .. }));
    }

    #[tokio::test]
    async fn test_vanished_object_is_not_found() {
        let (store, mut keys) = seeded_store(2);
        keys.push("realtime/2020-01-01/ghost.ndjson".to_string());

        let err = fetch_all(&store, "bucket", &keys, 4).await.unwrap_err();
        assert!(matches!(err, AggregationError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let (store, keys) = seeded_store(2);
        let bodies = fetch_all(&store, "bucket", &keys, 0).await.unwrap();
        assert_eq!(bodies.len(), 2);
    }
}
