//! Enrichment orchestrator.
//!
//! Fetches the company set, runs every enabled enricher against each
//! company, merges their fields in declared order and writes the merged
//! rows in batches. Failures are contained at the narrowest boundary that
//! still allows progress: an enricher failure is a warning, a company
//! failure is an error-log entry, and only the initial fetch aborts a run.

use futures::future::{self, join_all};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::database::{CompanyStore, GatewayError, LogWrite};
use crate::enrichers::Enricher;
use crate::models::{Company, CompanyUpdate, Config, Enrichment, EnrichmentLogEntry, RunSummary};

pub mod buffer;
pub mod cancel;

pub use buffer::ResultsBuffer;
pub use cancel::CancelToken;

/// Error-log source for failures of a whole company
pub const PIPELINE_SOURCE: &str = "pipeline";
/// Error-log source for rows that could not be written during a flush
pub const FLUSH_SOURCE: &str = "flush";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Flush threshold for the results buffer
    pub save_frequency: usize,
    /// Companies enriched at the same time
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            save_frequency: 5,
            concurrency: 1,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            save_frequency: config.save_frequency,
            concurrency: config.concurrency,
        }
    }
}

#[derive(Debug, Default)]
struct FlushStats {
    flushes: usize,
    rows_written: usize,
    rows_dead_lettered: usize,
}

/// Buffer and flush counters, guarded together so a flush-and-clear is
/// atomic with respect to concurrent appends
struct BufferState {
    buffer: ResultsBuffer,
    stats: FlushStats,
}

struct RunContext {
    store: Arc<dyn CompanyStore>,
    enrichers: Arc<Vec<Arc<dyn Enricher>>>,
    state: Mutex<BufferState>,
    total: usize,
}

#[derive(Debug, Default)]
struct CompanyOutcome {
    enriched: bool,
    enricher_failures: usize,
}

pub struct EnrichmentPipeline {
    store: Arc<dyn CompanyStore>,
    enrichers: Arc<Vec<Arc<dyn Enricher>>>,
    options: PipelineOptions,
}

impl EnrichmentPipeline {
    pub fn new(store: Arc<dyn CompanyStore>, enrichers: Vec<Arc<dyn Enricher>>, options: PipelineOptions) -> Self {
        Self {
            store,
            enrichers: Arc::new(enrichers),
            options,
        }
    }

    pub fn enricher_names(&self) -> Vec<String> {
        self.enrichers.iter().map(|e| e.name().to_string()).collect()
    }

    /// Enrich up to `limit` companies.
    ///
    /// Only a failure to fetch the company set is returned as an error;
    /// everything after that is contained, logged and counted in the summary.
    pub async fn run(&self, limit: Option<usize>, cancel: Option<CancelToken>) -> Result<RunSummary, GatewayError> {
        let start = Instant::now();
        info!(
            "🚀 Starting enrichment pipeline with {} enrichers: {}",
            self.enrichers.len(),
            self.enricher_names().join(", ")
        );

        let companies = self.store.fetch_companies(limit).await?;
        let total = companies.len();
        info!("Fetched {} companies to enrich", total);

        let cancel = cancel.unwrap_or_default();
        let context = Arc::new(RunContext {
            store: self.store.clone(),
            enrichers: self.enrichers.clone(),
            state: Mutex::new(BufferState {
                buffer: ResultsBuffer::new(self.options.save_frequency),
                stats: FlushStats::default(),
            }),
            total,
        });

        let mut summary = RunSummary {
            total_companies: total,
            ..RunSummary::default()
        };

        let tasks = stream::iter(companies.into_iter().enumerate())
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|(index, company)| {
                let context = context.clone();
                let ticker = company.display_ticker().to_string();
                async move {
                    let joined = tokio::spawn(process_company(context, company, index + 1)).await;
                    (ticker, joined)
                }
            })
            .buffer_unordered(self.options.concurrency.max(1));
        futures::pin_mut!(tasks);

        while let Some((ticker, joined)) = tasks.next().await {
            match joined {
                Ok(outcome) => {
                    summary.processed_companies += 1;
                    summary.enricher_failures += outcome.enricher_failures;
                    if outcome.enriched {
                        summary.enriched_companies += 1;
                    }
                }
                Err(e) => {
                    summary.failed_companies += 1;
                    error!("❌ Failed to process company {}: {}", ticker, e);
                    let entry = EnrichmentLogEntry::new(&ticker, format!("company processing failed: {}", e), PIPELINE_SOURCE);
                    append_log(context.store.as_ref(), &entry).await;
                }
            }
        }

        if cancel.is_cancelled() {
            warn!("🛑 Run cancelled, flushing completed work");
            summary.cancelled = true;
        }

        {
            let mut state = context.state.lock().await;
            let remaining = state.buffer.drain();
            flush(context.store.as_ref(), remaining, &mut state.stats).await;

            summary.flushes = state.stats.flushes;
            summary.rows_written = state.stats.rows_written;
            summary.rows_dead_lettered = state.stats.rows_dead_lettered;
        }

        summary.duration = start.elapsed();
        info!(
            "Pipeline completed: {}/{} companies in {:.2}s",
            summary.processed_companies,
            summary.total_companies,
            summary.duration.as_secs_f64()
        );
        if summary.rows_dead_lettered > 0 {
            warn!("{} enriched rows could not be saved, see the enrichment log", summary.rows_dead_lettered);
        }

        Ok(summary)
    }
}

/// Run every enricher for one company and buffer the merged result
async fn process_company(context: Arc<RunContext>, company: Company, position: usize) -> CompanyOutcome {
    let ticker = company.display_ticker().to_string();
    info!("Processing {} ({}/{})", ticker, position, context.total);

    let results = join_all(context.enrichers.iter().map(|enricher| enricher.enrich(&company))).await;

    let mut outcome = CompanyOutcome::default();
    let mut merged = Enrichment::new();
    // join_all keeps input order, so later enrichers win regardless of completion order
    for (enricher, result) in context.enrichers.iter().zip(results) {
        match result {
            Ok(fields) => {
                debug!("{} returned {} fields for {}", enricher.name(), fields.len(), ticker);
                merged.merge(fields);
            }
            Err(e) => {
                outcome.enricher_failures += 1;
                warn!("⚠️ Enricher {} failed for {}: {}", enricher.name(), ticker, e);
            }
        }
    }

    if merged.is_empty() {
        debug!("No enrichment data for {}", ticker);
        return outcome;
    }
    let Some(identity) = company.ticker() else {
        warn!("Dropping {} enriched fields for a company without ticker", merged.len());
        return outcome;
    };

    outcome.enriched = true;
    let update = CompanyUpdate::new(identity, merged);

    let mut state = context.state.lock().await;
    if let Some(batch) = state.buffer.push(update) {
        flush(context.store.as_ref(), batch, &mut state.stats).await;
    }

    outcome
}

/// Write a batch; rows that fail are recorded in the error log instead
async fn flush(store: &dyn CompanyStore, batch: Vec<CompanyUpdate>, stats: &mut FlushStats) {
    if batch.is_empty() {
        return;
    }

    info!("💾 Flushing {} enriched companies", batch.len());
    let outcome = store.batch_update_companies(&batch).await;
    stats.flushes += 1;
    stats.rows_written += outcome.written;

    for (ticker, e) in outcome.failed {
        stats.rows_dead_lettered += 1;
        let entry = EnrichmentLogEntry::new(&ticker, format!("failed to save enrichment: {}", e), FLUSH_SOURCE);
        append_log(store, &entry).await;
    }
}

async fn append_log(store: &dyn CompanyStore, entry: &EnrichmentLogEntry) {
    match store.append_enrichment_log(entry).await {
        Ok(LogWrite::Written) => debug!("Logged {} failure for {}", entry.source, entry.ticker),
        Ok(LogWrite::TableMissing) => {
            warn!("Enrichment log table missing, could not record error for {}", entry.ticker)
        }
        Err(e) => error!("Failed to log enrichment error for {}: {}", entry.ticker, e),
    }
}
