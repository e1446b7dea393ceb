//! Full runs: CSV import, provider calls on a mock server, SQLite persistence

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use std::sync::Arc;
use test_log::test;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use equity_pipeline::api::{SecEdgarClient, YahooFinanceClient};
use equity_pipeline::database::{CompanyStore, SqliteCompanyStore};
use equity_pipeline::enrichers::{Enricher, MarketDataEnricher, SecFilingsEnricher};
use equity_pipeline::import::import_companies;
use equity_pipeline::models::{Enrichment, FieldName};
use equity_pipeline::pipeline::{EnrichmentPipeline, PipelineOptions};
use equity_pipeline::retry::RetryPolicy;

use crate::common::{logging, test_data, StubEnricher};

const COMPANIES_CSV: &str = "Ticker,Security,Name\n\
                             AAPL US Equity,Apple Inc,Apple Inc.\n\
                             MSFT US Equity,Microsoft Corp,\n";

async fn imported_store() -> (tempfile::TempDir, String, SqliteCompanyStore) {
    let (dir, path) = test_data::temp_database();
    let store = SqliteCompanyStore::connect(&path).await.unwrap();
    let csv = test_data::write_csv(&dir, COMPANIES_CSV);
    assert_eq!(import_companies(&store, &csv).await.unwrap(), 2);
    (dir, path, store)
}

async fn mount_yahoo(server: &MockServer, symbol: &str, market_cap: f64) {
    Mock::given(method("GET"))
        .and(path(format!("/v10/finance/quoteSummary/{}", symbol)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quoteSummary": {
                "result": [{
                    "price": { "marketCap": { "raw": market_cap } },
                    "summaryProfile": { "sector": "Technology", "industry": "Software", "country": "United States" },
                    "defaultKeyStatistics": { "enterpriseValue": { "raw": market_cap * 1.01 } }
                }],
                "error": null
            }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v8/finance/chart/{}", symbol)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": [{
                    "indicators": { "quote": [{ "close": [100.0, 200.0], "volume": [10.0, 30.0] }] }
                }],
                "error": null
            }
        })))
        .mount(server)
        .await;
}

#[test(tokio::test)]
async fn test_market_data_lands_in_company_table() {
    logging::log_test_step("Import CSV, enrich from Yahoo, persist to SQLite");

    let (_dir, _path, store) = imported_store().await;
    let server = MockServer::start().await;
    mount_yahoo(&server, "AAPL", 3.0e12).await;
    mount_yahoo(&server, "MSFT", 2.5e12).await;

    let enricher: Arc<dyn Enricher> = Arc::new(MarketDataEnricher::new(
        Arc::new(YahooFinanceClient::with_base_url(&server.uri()).unwrap()),
        RetryPolicy::none(),
    ));
    let pipeline = EnrichmentPipeline::new(
        Arc::new(store.clone()),
        vec![enricher],
        PipelineOptions {
            save_frequency: 2,
            concurrency: 2,
        },
    );

    let summary = pipeline.run(None, None).await.unwrap();
    assert_eq!(summary.processed_companies, 2);
    assert_eq!(summary.rows_written, 2);

    let companies = store.fetch_companies(None).await.unwrap();
    let apple = &companies[0];
    assert_eq!(apple.ticker(), Some("AAPL US Equity"));
    assert_eq!(apple.name.as_deref(), Some("Apple Inc."));
    assert_eq!(apple.fields["market_cap"], json!(3.0e12));
    assert_eq!(apple.fields["gics_sector"], json!("Technology"));
    // mean volume 20 times mean close 150
    assert_eq!(apple.fields["avg_daily_value_traded_3m"], json!(3000.0));
    assert!(apple.fields.contains_key("last_enriched"));

    let microsoft = &companies[1];
    assert_eq!(microsoft.name.as_deref(), Some("Microsoft Corp"));
    assert_eq!(microsoft.fields["market_cap"], json!(2.5e12));
}

#[test(tokio::test)]
async fn test_unknown_column_is_logged_until_added() {
    logging::log_test_step("Rows with an unknown column end up in enrichment_logs");

    let (_dir, db_path, store) = imported_store().await;
    let stub = Arc::new(StubEnricher::new(
        "terminal",
        Enrichment::new().with("bics_level_1", "Technology"),
    ));
    let pipeline = EnrichmentPipeline::new(
        Arc::new(store.clone()),
        vec![stub],
        PipelineOptions {
            save_frequency: 5,
            concurrency: 1,
        },
    );

    let first = pipeline.run(None, None).await.unwrap();
    assert_eq!(first.rows_written, 0);
    assert_eq!(first.rows_dead_lettered, 2);

    let reader = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}", db_path))
        .await
        .unwrap();
    let logged = sqlx::query("SELECT ticker, error, enricher FROM enrichment_logs ORDER BY id")
        .fetch_all(&reader)
        .await
        .unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].get::<String, _>("enricher"), "flush");
    assert!(logged[0].get::<String, _>("error").contains("bics_level_1"));

    store.add_extension_column("bics_level_1", "TEXT").await.unwrap();
    let second = pipeline.run(None, None).await.unwrap();
    assert_eq!(second.rows_written, 2);
    assert_eq!(second.rows_dead_lettered, 0);

    let companies = store.fetch_companies(Some(1)).await.unwrap();
    assert_eq!(companies[0].fields["bics_level_1"], json!("Technology"));
}

#[test(tokio::test)]
async fn test_filings_are_archived_alongside_summary() {
    let (_dir, db_path, store) = imported_store().await;
    let server = MockServer::start().await;
    let recent = (Utc::now().date_naive() - Duration::days(10)).to_string();

    Mock::given(method("GET"))
        .and(path("/files/company_tickers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "0": { "cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc." }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/submissions/CIK0000320193.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cik": "320193",
            "name": "Apple Inc.",
            "filings": {
                "recent": {
                    "accessionNumber": ["0000320193-24-000123", "0000320193-24-000124"],
                    "filingDate": [recent, recent],
                    "form": ["8-K", "DEF 14A"],
                    "primaryDocument": ["aapl-8k.htm", "proxy.htm"]
                }
            }
        })))
        .mount(&server)
        .await;

    let sec = Arc::new(SecEdgarClient::with_base_urls("Test Co test@example.com", &server.uri(), &server.uri()).unwrap());
    let archive = Arc::new(store.clone());
    let enricher: Arc<dyn Enricher> = Arc::new(SecFilingsEnricher::new(sec, archive, 730, RetryPolicy::none()));
    let pipeline = EnrichmentPipeline::new(Arc::new(store.clone()), vec![enricher], PipelineOptions::default());

    let summary = pipeline.run(None, None).await.unwrap();
    // MSFT is not in the ticker file and yields nothing
    assert_eq!(summary.processed_companies, 2);
    assert_eq!(summary.enriched_companies, 1);

    let apple = store.fetch_companies(Some(1)).await.unwrap().remove(0);
    assert_eq!(apple.fields["sec_cik"], json!("320193"));
    assert_eq!(apple.fields["sec_filings_count"], json!(2));
    assert!(apple.fields["sec_latest_proxy"].as_str().unwrap().ends_with("/proxy.htm"));
    assert_eq!(apple.fields["sec_filings_summary"]["8-K"]["count"], json!(1));

    let reader = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}", db_path))
        .await
        .unwrap();
    let archived: Vec<(String, String)> =
        sqlx::query_as("SELECT ticker, form_type FROM company_filings ORDER BY accession_number")
            .fetch_all(&reader)
            .await
            .unwrap();
    assert_eq!(
        archived,
        vec![
            ("AAPL US Equity".to_string(), "8-K".to_string()),
            ("AAPL US Equity".to_string(), "DEF 14A".to_string()),
        ]
    );
}

#[test(tokio::test)]
async fn test_padded_ticker_is_written_back_to_its_own_row() {
    logging::log_test_step("A stored ticker with trailing space keeps its identity");

    let (_dir, db_path) = test_data::temp_database();
    let store = SqliteCompanyStore::connect(&db_path).await.unwrap();
    store
        .upsert_companies(&[test_data::terminal_company("AAPL ", "Apple")])
        .await
        .unwrap();

    let stub = Arc::new(StubEnricher::new(
        "sector",
        Enrichment::new().with(FieldName::GicsSector, "Technology"),
    ));
    let pipeline = EnrichmentPipeline::new(Arc::new(store.clone()), vec![stub], PipelineOptions::default());

    let summary = pipeline.run(None, None).await.unwrap();
    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.rows_dead_lettered, 0);

    let companies = store.fetch_companies(None).await.unwrap();
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].ticker(), Some("AAPL "));
    assert_eq!(companies[0].fields["gics_sector"], json!("Technology"));
}
