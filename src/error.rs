use crate::object_store::StoreError;
use thiserror::Error;

/// Fatal errors for one aggregation invocation.
///
/// Per-line parse failures are not represented here; they are collected into
/// the invocation summary and never abort the batch.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The triggering key does not match the `{category}/{day}/{filename}`
    /// layout. Redelivery cannot fix this.
    #[error("malformed trigger key {key:?}: expected {{category}}/{{day}}/{{filename}}")]
    MalformedKey { key: String },

    /// An object returned by the listing disappeared before it could be
    /// fetched. Treated as fatal rather than skipped, since it may indicate
    /// a listing consistency anomaly.
    #[error("listed object {key:?} no longer exists")]
    ObjectNotFound { key: String },

    /// A list/get/put call failed after local retries were exhausted, or
    /// failed with a non-transient storage error.
    #[error("storage {op} failed for {key:?}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl AggregationError {
    /// Whether redelivering the triggering event could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AggregationError::MalformedKey { .. } => false,
            AggregationError::ObjectNotFound { .. } => true,
            AggregationError::Store { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_key_is_not_retryable() {
        let err = AggregationError::MalformedKey {
            key: "orphan.ndjson".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_error_is_retryable() {
        let err = AggregationError::Store {
            op: "put",
            key: "daily/2020-01-01.csv".to_string(),
            source: StoreError::Transient("connection reset".to_string()),
        };
        assert!(err.is_retryable());
    }
}
