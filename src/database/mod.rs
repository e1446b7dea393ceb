//! Datastore gateway: the company table, the enrichment error log and
//! the filing archive.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{Company, CompanyUpdate, EnrichmentLogEntry, FieldValue};

pub mod sqlite;

pub use sqlite::SqliteCompanyStore;

pub const COMPANIES_TABLE: &str = "companies";
pub const ENRICHMENT_LOGS_TABLE: &str = "enrichment_logs";
pub const COMPANY_FILINGS_TABLE: &str = "company_filings";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Datastore unreachable: {0}")]
    Unreachable(String),
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Unknown column '{column}' in table {table}")]
    UnknownColumn { table: String, column: String },
    #[error("Invalid column definition: {0}")]
    InvalidColumn(String),
    #[error("Table {0} does not exist")]
    TableMissing(String),
    #[error("No company row with ticker '{0}'")]
    RowMissing(String),
}

/// Result of an error-log append that did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogWrite {
    Written,
    /// The log table is absent; the entry was not recorded
    TableMissing,
}

/// Per-row results of a batch update
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub written: usize,
    pub skipped: usize,
    pub failed: Vec<(String, GatewayError)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One filing kept in the archive table
#[derive(Debug, Clone, PartialEq)]
pub struct FilingRecord {
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub accession_number: String,
    pub filing_url: String,
    pub document_url: Option<String>,
    pub metadata: Value,
}

/// Persisted company table plus its append-only error log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompanyStore: Send + Sync {
    /// All companies, or the first `limit`, in storage order
    async fn fetch_companies(&self, limit: Option<usize>) -> Result<Vec<Company>, GatewayError>;

    /// Write the given columns onto the row keyed by `ticker`.
    ///
    /// Fails with `RowMissing` when no row has exactly that ticker.
    async fn update_company(&self, ticker: &str, columns: &[(String, FieldValue)]) -> Result<(), GatewayError>;

    /// Apply every update independently.
    ///
    /// Updates without a ticker are skipped. A failing row is recorded in
    /// the outcome and does not stop the rows after it.
    async fn batch_update_companies(&self, updates: &[CompanyUpdate]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for update in updates {
            let ticker = update.ticker.as_str();
            if ticker.trim().is_empty() {
                debug!("Skipping update without ticker");
                outcome.skipped += 1;
                continue;
            }

            match self.update_company(ticker, &update.columns()).await {
                Ok(()) => outcome.written += 1,
                Err(e) => {
                    error!("Failed to update company {}: {}", ticker, e);
                    outcome.failed.push((ticker.to_string(), e));
                }
            }
        }

        outcome
    }

    /// Append to the error log; a missing log table is not an error
    async fn append_enrichment_log(&self, entry: &EnrichmentLogEntry) -> Result<LogWrite, GatewayError>;
}

/// Detail store for regulatory filings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FilingArchive: Send + Sync {
    /// Upsert filings for `ticker`, returning how many were stored
    async fn archive_filings(&self, ticker: &str, filings: &[FilingRecord]) -> Result<usize, GatewayError>;
}
