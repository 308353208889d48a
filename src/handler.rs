use crate::aggregator::{AggregateOptions, Aggregator, InvocationSummary};
use crate::error::AggregationError;
use crate::object_store::ObjectStore;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// One "object created" notification, reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub bucket: String,
    pub key: String,
}

/// Entry point invoked once per storage event, independent of the transport
/// that delivered it.
///
/// Owns the single constructed object store instance and threads it into the
/// aggregator; there is no ambient or global client state.
pub struct TriggerHandler {
    aggregator: Aggregator,
}

impl TriggerHandler {
    pub fn new(store: Arc<dyn ObjectStore>, options: AggregateOptions) -> Self {
        Self {
            aggregator: Aggregator::new(store, options),
        }
    }

    /// Aggregate the day named by the event's key.
    ///
    /// On success the summary carries the row count and any per-line failure
    /// count; a fatal error is the transport's signal to apply its own
    /// redelivery policy.
    #[instrument(skip(self, event), fields(bucket = %event.bucket, key = %event.key))]
    pub async fn handle(&self, event: &SourceEvent) -> Result<InvocationSummary, AggregationError> {
        info!("Received object-created event");

        match self.aggregator.aggregate_day(&event.bucket, &event.key).await {
            Ok(summary) => {
                metrics::counter!("dailycsv.invocations.completed").increment(1);
                Ok(summary)
            }
            Err(err) => {
                error!(
                    error = %err,
                    retryable = err.is_retryable(),
                    "Aggregation invocation failed"
                );
                metrics::counter!("dailycsv.invocations.failed").increment(1);
                Err(err)
            }
        }
    }
}
