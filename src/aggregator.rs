use crate::error::AggregationError;
use crate::fetch::fetch_all;
use crate::object_store::ObjectStore;
use crate::row_codec::{encode_row, MeasurementRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Tunables for one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Maximum concurrent source-object fetches.
    pub fetch_concurrency: usize,
    /// First path segment of the output key, `{output_prefix}/{day}.csv`.
    pub output_prefix: String,
    /// Content type of the written aggregate object.
    pub content_type: String,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: 4,
            output_prefix: "daily".to_string(),
            content_type: "text/csv".to_string(),
        }
    }
}

/// One NDJSON line that could not be converted to a row.
#[derive(Debug, Clone)]
pub struct LineFailure {
    /// Source object the line came from.
    pub key: String,
    /// Zero-based line index within that object.
    pub line_index: usize,
    /// The raw line, kept verbatim for manual reprocessing.
    pub raw: String,
    pub message: String,
}

/// Outcome of one successful aggregation invocation.
#[derive(Debug, Clone)]
pub struct InvocationSummary {
    pub day: String,
    pub output_key: String,
    /// Number of source objects found under the day prefix.
    pub source_objects: usize,
    pub rows_written: usize,
    pub line_failures: Vec<LineFailure>,
}

/// Derive `(day, prefix)` from a triggering key.
///
/// Keys look like `{category}/{day}/{filename}`; the prefix is every segment
/// except the filename, the day is the second segment.
pub fn split_trigger_key(key: &str) -> Result<(String, String), AggregationError> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AggregationError::MalformedKey {
            key: key.to_string(),
        });
    }

    let day = segments[1].to_string();
    let prefix = segments[..segments.len() - 1].join("/");
    Ok((day, prefix))
}

/// Recomputes and rewrites one day's CSV aggregate from every sibling source
/// object under the triggering key's day prefix.
///
/// Holds no state across invocations; each run lists, fetches, and rewrites
/// the full day so that re-triggering is idempotent.
pub struct Aggregator {
    store: Arc<dyn ObjectStore>,
    options: AggregateOptions,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ObjectStore>, options: AggregateOptions) -> Self {
        Self { store, options }
    }

    /// Run the full pipeline for the day containing `trigger_key`.
    ///
    /// Fatal errors (malformed key, listing/fetch/write failure) abort the
    /// run before any output is written; per-line parse failures are
    /// collected into the summary and never abort the batch.
    #[instrument(skip(self, bucket, trigger_key), fields(bucket = %bucket, trigger_key = %trigger_key))]
    pub async fn aggregate_day(
        &self,
        bucket: &str,
        trigger_key: &str,
    ) -> Result<InvocationSummary, AggregationError> {
        let started = Instant::now();
        let (day, prefix) = split_trigger_key(trigger_key)?;

        let keys = self
            .store
            .list(bucket, &prefix)
            .await
            .map_err(|source| AggregationError::Store {
                op: "list",
                key: prefix.clone(),
                source,
            })?;

        debug!(day = %day, prefix = %prefix, sources = keys.len(), "Listed day sources");

        let bodies = fetch_all(self.store.as_ref(), bucket, &keys, self.options.fetch_concurrency)
            .await?;

        let mut rows = Vec::new();
        let mut line_failures = Vec::new();

        for (key, body) in keys.iter().zip(&bodies) {
            let text = String::from_utf8_lossy(body);
            for (line_index, line) in text.split('\n').enumerate() {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if line.is_empty() {
                    continue;
                }

                match MeasurementRecord::from_ndjson_line(line) {
                    Ok(record) => rows.push(encode_row(&record)),
                    Err(err) => {
                        warn!(
                            source_key = %key,
                            line_index = line_index,
                            raw_line = %line,
                            error = %err,
                            "Skipping unparseable line"
                        );
                        line_failures.push(LineFailure {
                            key: key.clone(),
                            line_index,
                            raw: line.to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        // An empty day still writes an empty aggregate so re-runs stay
        // idempotent and observable.
        let aggregate = rows.join("\n");
        let output_key = format!("{}/{}.csv", self.options.output_prefix, day);

        self.store
            .put(
                bucket,
                &output_key,
                aggregate.into_bytes(),
                &self.options.content_type,
            )
            .await
            .map_err(|source| AggregationError::Store {
                op: "put",
                key: output_key.clone(),
                source,
            })?;

        metrics::counter!("dailycsv.rows.written").increment(rows.len() as u64);
        metrics::counter!("dailycsv.lines.failed").increment(line_failures.len() as u64);
        metrics::histogram!("dailycsv.aggregate.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            day = %day,
            output_key = %output_key,
            sources = keys.len(),
            rows = rows.len(),
            failed_lines = line_failures.len(),
            "Day aggregate written"
        );

        Ok(InvocationSummary {
            day,
            output_key,
            source_objects: keys.len(),
            rows_written: rows.len(),
            line_failures,
        })
    }
}
