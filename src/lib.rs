//! Daily CSV Aggregation Service
//!
//! Consumes "object created" notifications for NDJSON measurement files
//! landing in object storage, and rewrites the day's CSV aggregate on every
//! notification: list all sibling files under the day prefix, fetch them
//! with bounded concurrency, convert each record to a fixed-schema CSV row,
//! and replace `daily/{day}.csv` in a single write.
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic                  S3 Bucket
//! ┌───────────────┐           ┌─────────────────────┐
//! │ object-created│           │ realtime/           │
//! │ notifications │──────────▶│   {day}/*.ndjson    │
//! └───────────────┘           └─────────────────────┘
//!        │                              │ list + fetch (bounded)
//!        ▼                              ▼
//! ┌───────────────┐           ┌─────────────────────┐
//! │ Trigger       │──────────▶│ Aggregator          │
//! │ Handler       │           │  split / parse /    │
//! └───────────────┘           │  encode / join      │
//!                             └─────────────────────┘
//!                                        │ single overwrite
//!                                        ▼
//!                             ┌─────────────────────┐
//!                             │ daily/{day}.csv     │
//!                             └─────────────────────┘
//! ```
//!
//! Each invocation is stateless: the full day is recomputed and the
//! aggregate object replaced last-writer-wins, so re-triggering for the same
//! day is idempotent. Per-line parse failures are isolated and reported;
//! they never abort the rest of the batch.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod kafka_consumer;
pub mod object_store;
pub mod row_codec;

pub use aggregator::{AggregateOptions, Aggregator, InvocationSummary, LineFailure};
pub use config::Config;
pub use error::AggregationError;
pub use fetch::fetch_all;
pub use handler::{SourceEvent, TriggerHandler};
pub use kafka_consumer::{EventKafkaConsumer, NotificationEnvelope};
pub use object_store::{InMemoryStore, ObjectStore, RetryPolicy, S3ObjectStore, StoreError};
pub use row_codec::{encode_row, MeasurementRecord, CSV_COLUMNS};
