//! Pipeline runs against a recording store

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

use equity_pipeline::database::GatewayError;
use equity_pipeline::enrichers::Enricher;
use equity_pipeline::models::{Enrichment, FieldName};
use equity_pipeline::pipeline::{CancelToken, EnrichmentPipeline, PipelineOptions, FLUSH_SOURCE};
use equity_pipeline::retry::RetryPolicy;

use crate::common::{logging, test_data, FailingEnricher, RecordingStore, StubEnricher};

fn options(save_frequency: usize, concurrency: usize) -> PipelineOptions {
    PipelineOptions {
        save_frequency,
        concurrency,
    }
}

fn pipeline(store: &Arc<RecordingStore>, enrichers: Vec<Arc<dyn Enricher>>, options: PipelineOptions) -> EnrichmentPipeline {
    EnrichmentPipeline::new(store.clone(), enrichers, options)
}

#[test(tokio::test)]
async fn test_two_companies_flush_once() {
    logging::log_test_step("Two companies with save frequency 2 produce a single flush");

    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL", "MSFT"])));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with("x", 1)));

    let summary = pipeline(&store, vec![stub.clone()], options(2, 1))
        .run(None, None)
        .await
        .unwrap();
    logging::log_test_data("Summary", &summary);

    assert_eq!(summary.total_companies, 2);
    assert_eq!(summary.processed_companies, 2);
    assert_eq!(summary.enriched_companies, 2);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.flushes, 1);
    assert!(!summary.cancelled);
    assert_eq!(stub.call_count(), 2);

    let flushes = store.flushed();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].len(), 2);
    for update in &flushes[0] {
        assert_eq!(update.fields.get(&FieldName::from("x")), Some(&json!(1)));
        let columns: Vec<String> = update.columns().into_iter().map(|(name, _)| name).collect();
        assert!(columns.contains(&"last_enriched".to_string()));
    }
    let tickers: HashSet<String> = flushes[0].iter().map(|u| u.ticker.clone()).collect();
    assert_eq!(tickers, HashSet::from(["AAPL".to_string(), "MSFT".to_string()]));
    assert!(store.logged().is_empty());
}

#[test(tokio::test)]
async fn test_leftover_rows_are_flushed_at_end() {
    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL", "MSFT", "IBM"])));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with(FieldName::GicsSector, "Technology")));

    let summary = pipeline(&store, vec![stub], options(2, 1))
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.flushes, 2);
    let sizes: Vec<usize> = store.flushed().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 1]);
}

#[test(tokio::test)]
async fn test_limit_restricts_the_company_set() {
    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL", "MSFT", "IBM"])));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with("x", 1)));

    let summary = pipeline(&store, vec![stub.clone()], options(5, 1))
        .run(Some(1), None)
        .await
        .unwrap();

    assert_eq!(summary.total_companies, 1);
    assert_eq!(stub.call_count(), 1);
    assert!(store.written_columns("IBM").is_empty());
}

#[test(tokio::test)]
async fn test_failing_enricher_does_not_block_others() {
    logging::log_test_step("A failing enricher is retried, then skipped");

    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL", "MSFT"])));
    let failing = Arc::new(FailingEnricher::new("broken", RetryPolicy::new(1, Duration::from_millis(5))));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with(FieldName::Figi, "BBG000B9XRY4")));

    let summary = pipeline(&store, vec![failing.clone(), stub], options(5, 2))
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.processed_companies, 2);
    assert_eq!(summary.failed_companies, 0);
    assert_eq!(summary.enricher_failures, 2);
    assert_eq!(summary.rows_written, 2);
    // one retry per company
    assert_eq!(failing.call_count(), 4);
    assert!(store
        .written_columns("AAPL")
        .iter()
        .any(|(name, value)| name == "figi" && value == &json!("BBG000B9XRY4")));
}

#[test(tokio::test)]
async fn test_company_with_no_fields_is_not_written() {
    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL"])));
    let empty = Arc::new(StubEnricher::new("empty", Enrichment::new()));

    let summary = pipeline(&store, vec![empty], options(1, 1))
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.processed_companies, 1);
    assert_eq!(summary.enriched_companies, 0);
    assert_eq!(store.flush_count(), 0);
}

#[test(tokio::test)]
async fn test_later_enricher_wins_on_conflict() {
    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL"])));
    let slow_first = Arc::new(
        StubEnricher::new("first", Enrichment::new().with(FieldName::GicsSector, "first")).delayed(Duration::from_millis(50)),
    );
    let fast_second = Arc::new(StubEnricher::new("second", Enrichment::new().with(FieldName::GicsSector, "second")));

    pipeline(&store, vec![slow_first, fast_second], options(1, 1))
        .run(None, None)
        .await
        .unwrap();

    let flushes = store.flushed();
    assert_eq!(flushes[0][0].fields.get(&FieldName::GicsSector), Some(&json!("second")));
}

#[test(tokio::test(start_paused = true))]
async fn test_concurrent_run_writes_every_company_once() {
    let tickers = ["AAPL", "MSFT", "IBM", "ORCL", "SAP", "NVDA"];
    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&tickers)));
    let slow = Arc::new(StubEnricher::new("slow", Enrichment::new().with("x", 1)).delayed(Duration::from_secs(2)));

    let summary = pipeline(&store, vec![slow], options(4, 3))
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.processed_companies, 6);
    assert_eq!(summary.rows_written, 6);
    assert_eq!(summary.flushes, 2);

    let written: Vec<String> = store.flushed().into_iter().flatten().map(|u| u.ticker).collect();
    let unique: HashSet<&String> = written.iter().collect();
    assert_eq!(written.len(), 6);
    assert_eq!(unique.len(), 6);
}

#[test(tokio::test)]
async fn test_unwritable_row_is_dead_lettered() {
    logging::log_test_step("A row the store rejects is logged with source flush");

    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL", "MSFT"])).rejecting("MSFT"));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with("x", 1)));

    let summary = pipeline(&store, vec![stub], options(2, 1))
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.processed_companies, 2);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.rows_dead_lettered, 1);

    let logs = store.logged();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].ticker, "MSFT");
    assert_eq!(logs[0].source, FLUSH_SOURCE);
    assert!(logs[0].error.contains("Unknown column"));
}

#[test(tokio::test)]
async fn test_missing_log_table_does_not_abort() {
    let store = Arc::new(
        RecordingStore::with_companies(test_data::companies(&["AAPL"]))
            .rejecting("AAPL")
            .without_log_table(),
    );
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with("x", 1)));

    let summary = pipeline(&store, vec![stub], options(1, 1))
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.rows_dead_lettered, 1);
    assert!(store.logged().is_empty());
}

#[test(tokio::test)]
async fn test_fetch_failure_is_fatal() {
    let store = Arc::new(RecordingStore::unreachable("connection refused"));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with("x", 1)));

    let result = pipeline(&store, vec![stub.clone()], options(5, 1)).run(None, None).await;

    assert_matches!(result, Err(GatewayError::Unreachable(ref message)) if message == "connection refused");
    assert_eq!(stub.call_count(), 0);
    assert_eq!(store.flush_count(), 0);
}

#[test(tokio::test)]
async fn test_cancelled_before_start_processes_nothing() {
    let store = Arc::new(RecordingStore::with_companies(test_data::companies(&["AAPL", "MSFT"])));
    let stub = Arc::new(StubEnricher::new("stub", Enrichment::new().with("x", 1)));
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = pipeline(&store, vec![stub.clone()], options(5, 1))
        .run(None, Some(cancel))
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.processed_companies, 0);
    assert_eq!(stub.call_count(), 0);
    assert_eq!(store.flush_count(), 0);
}

#[test(tokio::test)]
async fn test_empty_company_set() {
    let store = Arc::new(RecordingStore::with_companies(Vec::new()));
    let summary = pipeline(&store, Vec::new(), PipelineOptions::default())
        .run(None, None)
        .await
        .unwrap();

    assert_eq!(summary.total_companies, 0);
    assert_eq!(summary.flushes, 0);
}
