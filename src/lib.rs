pub mod api;
pub mod database;
pub mod enrichers;
pub mod import;
pub mod models;
pub mod pipeline;
pub mod retry;

pub use database::{CompanyStore, GatewayError, SqliteCompanyStore};
pub use enrichers::{build_enrichers, Enricher, EnricherKind};
pub use models::{Company, Config, Enrichment, RunSummary};
pub use pipeline::{CancelToken, EnrichmentPipeline, PipelineOptions};
