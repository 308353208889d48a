//! End-to-end pipeline tests over the in-memory object store.

use daily_csv_service::{
    AggregateOptions, AggregationError, InMemoryStore, SourceEvent, TriggerHandler,
};
use std::sync::Arc;
use std::time::Duration;

const BUCKET: &str = "openaq-data";

fn handler_for(store: Arc<InMemoryStore>, fetch_concurrency: usize) -> TriggerHandler {
    TriggerHandler::new(
        store,
        AggregateOptions {
            fetch_concurrency,
            ..AggregateOptions::default()
        },
    )
}

fn event(key: &str) -> SourceEvent {
    SourceEvent {
        bucket: BUCKET.to_string(),
        key: key.to_string(),
    }
}

fn output_text(store: &InMemoryStore, day: &str) -> String {
    let body = store
        .object(BUCKET, &format!("daily/{day}.csv"))
        .expect("aggregate object should exist");
    String::from_utf8(body).unwrap()
}

const VALID_LINE: &str = r#"{"location":"A","value":1,"unit":"ppm","parameter":"pm25","country":"US","city":"X","sourceName":"S","date":{"utc":"2020-01-01T00:00:00.000Z","local":"2020-01-01T00:00:00-05:00"},"sourceType":"government","mobile":false}"#;

const EXPECTED_ROW: &str = r#""A","1","ppm","pm25","US","X","S","2020-01-01T00:00:00.000Z","2020-01-01T00:00:00-05:00","government","false","","","","""#;

#[tokio::test]
async fn malformed_line_is_reported_not_included() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        BUCKET,
        "realtime/2020-01-01/1.ndjson",
        format!("{VALID_LINE}\n{{bad json\n"),
    );

    let handler = handler_for(store.clone(), 4);
    let summary = handler
        .handle(&event("realtime/2020-01-01/1.ndjson"))
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.line_failures.len(), 1);
    assert_eq!(summary.line_failures[0].line_index, 1);
    assert_eq!(summary.line_failures[0].raw, "{bad json");
    assert_eq!(summary.line_failures[0].key, "realtime/2020-01-01/1.ndjson");

    assert_eq!(output_text(&store, "2020-01-01"), EXPECTED_ROW);
}

#[tokio::test]
async fn every_valid_line_appears_exactly_once() {
    let store = Arc::new(InMemoryStore::new());
    let mut expected_locations = Vec::new();
    for file in 0..3 {
        let mut body = String::new();
        for line in 0..4 {
            let location = format!("loc-{file}-{line}");
            body.push_str(&format!(
                "{{\"location\":\"{location}\",\"value\":{line},\"date\":{{\"utc\":\"2020-01-01T00:00:00Z\"}}}}\n"
            ));
            expected_locations.push(location);
        }
        store.insert(BUCKET, &format!("realtime/2020-01-01/{file}.ndjson"), body);
    }

    let handler = handler_for(store.clone(), 2);
    let summary = handler
        .handle(&event("realtime/2020-01-01/0.ndjson"))
        .await
        .unwrap();

    assert_eq!(summary.source_objects, 3);
    assert_eq!(summary.rows_written, 12);
    assert!(summary.line_failures.is_empty());

    let output = output_text(&store, "2020-01-01");
    let rows: Vec<&str> = output.split('\n').collect();
    assert_eq!(rows.len(), 12);

    // Listing order, then line order within each file.
    for (row, location) in rows.iter().zip(&expected_locations) {
        assert!(
            row.starts_with(&format!("\"{location}\",")),
            "row {row:?} should belong to {location}"
        );
    }
}

#[tokio::test]
async fn malformed_lines_do_not_affect_other_files() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        BUCKET,
        "realtime/2020-01-01/bad.ndjson",
        "{broken\n{also broken\n",
    );
    store.insert(
        BUCKET,
        "realtime/2020-01-01/good.ndjson",
        format!("{VALID_LINE}\n{VALID_LINE}\n"),
    );

    let handler = handler_for(store.clone(), 4);
    let summary = handler
        .handle(&event("realtime/2020-01-01/bad.ndjson"))
        .await
        .unwrap();

    // The good file still contributes every one of its valid lines.
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.line_failures.len(), 2);
    assert!(summary
        .line_failures
        .iter()
        .all(|f| f.key == "realtime/2020-01-01/bad.ndjson"));
}

#[tokio::test]
async fn rerun_produces_identical_bytes() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        BUCKET,
        "realtime/2020-01-01/1.ndjson",
        format!("{VALID_LINE}\n"),
    );
    store.insert(
        BUCKET,
        "realtime/2020-01-01/2.ndjson",
        format!("{VALID_LINE}\n{VALID_LINE}\n"),
    );

    let handler = handler_for(store.clone(), 4);
    let trigger = event("realtime/2020-01-01/2.ndjson");

    handler.handle(&trigger).await.unwrap();
    let first = output_text(&store, "2020-01-01");

    handler.handle(&trigger).await.unwrap();
    let second = output_text(&store, "2020-01-01");

    assert_eq!(first, second);
    assert!(!first.ends_with('\n'));
}

#[tokio::test]
async fn rerun_picks_up_new_sibling_files() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        BUCKET,
        "realtime/2020-01-01/1.ndjson",
        format!("{VALID_LINE}\n"),
    );

    let handler = handler_for(store.clone(), 4);
    handler
        .handle(&event("realtime/2020-01-01/1.ndjson"))
        .await
        .unwrap();
    assert_eq!(output_text(&store, "2020-01-01"), EXPECTED_ROW);

    store.insert(
        BUCKET,
        "realtime/2020-01-01/2.ndjson",
        format!("{VALID_LINE}\n"),
    );
    let summary = handler
        .handle(&event("realtime/2020-01-01/2.ndjson"))
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 2);
    assert_eq!(
        output_text(&store, "2020-01-01"),
        format!("{EXPECTED_ROW}\n{EXPECTED_ROW}")
    );
}

#[tokio::test]
async fn empty_day_writes_empty_aggregate() {
    let store = Arc::new(InMemoryStore::new());

    let handler = handler_for(store.clone(), 4);
    let summary = handler
        .handle(&event("realtime/2020-02-02/never-landed.ndjson"))
        .await
        .unwrap();

    assert_eq!(summary.source_objects, 0);
    assert_eq!(summary.rows_written, 0);
    assert_eq!(output_text(&store, "2020-02-02"), "");
}

#[tokio::test]
async fn fetches_stay_within_concurrency_limit() {
    let store = Arc::new(InMemoryStore::new().with_get_delay(Duration::from_millis(10)));
    for i in 0..8 {
        store.insert(
            BUCKET,
            &format!("realtime/2020-01-01/{i}.ndjson"),
            format!("{VALID_LINE}\n"),
        );
    }

    let handler = handler_for(store.clone(), 2);
    let summary = handler
        .handle(&event("realtime/2020-01-01/0.ndjson"))
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 8);
    assert!(store.max_in_flight_gets() <= 2);
}

#[tokio::test]
async fn fetch_failure_leaves_no_partial_aggregate() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        BUCKET,
        "realtime/2020-01-01/1.ndjson",
        format!("{VALID_LINE}\n"),
    );
    store.insert(
        BUCKET,
        "realtime/2020-01-01/2.ndjson",
        format!("{VALID_LINE}\n"),
    );
    store.fail_gets_for("realtime/2020-01-01/2.ndjson");

    let handler = handler_for(store.clone(), 4);
    let err = handler
        .handle(&event("realtime/2020-01-01/1.ndjson"))
        .await
        .unwrap_err();

    assert!(matches!(err, AggregationError::Store { op: "get", .. }));
    assert!(store.object(BUCKET, "daily/2020-01-01.csv").is_none());
}

#[tokio::test]
async fn malformed_key_is_rejected_without_output() {
    let store = Arc::new(InMemoryStore::new());

    let handler = handler_for(store.clone(), 4);
    let err = handler.handle(&event("orphan.ndjson")).await.unwrap_err();

    assert!(matches!(err, AggregationError::MalformedKey { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn crlf_and_blank_lines_are_structural() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        BUCKET,
        "realtime/2020-01-01/1.ndjson",
        format!("{VALID_LINE}\r\n\r\n{VALID_LINE}\n\n"),
    );

    let handler = handler_for(store.clone(), 4);
    let summary = handler
        .handle(&event("realtime/2020-01-01/1.ndjson"))
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 2);
    assert!(summary.line_failures.is_empty());
}
