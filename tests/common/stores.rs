//! In-memory `CompanyStore` that records every write

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use equity_pipeline::database::{BatchOutcome, CompanyStore, GatewayError, LogWrite};
use equity_pipeline::models::{Company, CompanyUpdate, EnrichmentLogEntry, FieldValue};

pub type Columns = Vec<(String, FieldValue)>;

#[derive(Default)]
pub struct RecordingStore {
    companies: Vec<Company>,
    fetch_error: Option<String>,
    /// Updates to this ticker fail as if a column were unknown
    rejected_ticker: Option<String>,
    log_table_missing: bool,
    pub fetches: AtomicUsize,
    pub flushes: Mutex<Vec<Vec<CompanyUpdate>>>,
    pub updates: Mutex<Vec<(String, Columns)>>,
    pub logs: Mutex<Vec<EnrichmentLogEntry>>,
}

impl RecordingStore {
    pub fn with_companies(companies: Vec<Company>) -> Self {
        Self {
            companies,
            ..Self::default()
        }
    }

    /// Store whose initial fetch fails
    pub fn unreachable(message: &str) -> Self {
        Self {
            fetch_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn rejecting(mut self, ticker: &str) -> Self {
        self.rejected_ticker = Some(ticker.to_string());
        self
    }

    pub fn without_log_table(mut self) -> Self {
        self.log_table_missing = true;
        self
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().unwrap().len()
    }

    pub fn flushed(&self) -> Vec<Vec<CompanyUpdate>> {
        self.flushes.lock().unwrap().clone()
    }

    pub fn logged(&self) -> Vec<EnrichmentLogEntry> {
        self.logs.lock().unwrap().clone()
    }

    /// Columns written for `ticker`, merged across updates
    pub fn written_columns(&self, ticker: &str) -> Columns {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == ticker)
            .flat_map(|(_, columns)| columns.clone())
            .collect()
    }
}

#[async_trait]
impl CompanyStore for RecordingStore {
    async fn fetch_companies(&self, limit: Option<usize>) -> Result<Vec<Company>, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fetch_error {
            return Err(GatewayError::Unreachable(message.clone()));
        }
        let limit = limit.unwrap_or(self.companies.len());
        Ok(self.companies.iter().take(limit).cloned().collect())
    }

    async fn update_company(&self, ticker: &str, columns: &[(String, FieldValue)]) -> Result<(), GatewayError> {
        if self.rejected_ticker.as_deref() == Some(ticker) {
            return Err(GatewayError::UnknownColumn {
                table: "companies".to_string(),
                column: columns.first().map(|(name, _)| name.clone()).unwrap_or_default(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((ticker.to_string(), columns.to_vec()));
        Ok(())
    }

    async fn batch_update_companies(&self, updates: &[CompanyUpdate]) -> BatchOutcome {
        self.flushes.lock().unwrap().push(updates.to_vec());

        let mut outcome = BatchOutcome::default();
        for update in updates {
            match self.update_company(&update.ticker, &update.columns()).await {
                Ok(()) => outcome.written += 1,
                Err(e) => outcome.failed.push((update.ticker.clone(), e)),
            }
        }
        outcome
    }

    async fn append_enrichment_log(&self, entry: &EnrichmentLogEntry) -> Result<LogWrite, GatewayError> {
        if self.log_table_missing {
            return Ok(LogWrite::TableMissing);
        }
        self.logs.lock().unwrap().push(entry.clone());
        Ok(LogWrite::Written)
    }
}
