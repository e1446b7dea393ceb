//! Pluggable enrichers, one per external data provider.
//!
//! An enricher receives one company and returns the fields it could
//! find. Companies without a ticker are skipped before any provider is
//! contacted, and the provider call itself runs under the enricher's
//! retry policy.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, GeminiClient, OpenFigiClient, SecEdgarClient, YahooFinanceClient};
use crate::database::FilingArchive;
use crate::models::{Company, Config, ConfigError, Enrichment};
use crate::retry::{retry_with_backoff, RetryPolicy};

pub mod classification;
pub mod identifiers;
pub mod llm_research;
pub mod market_data;
pub mod sec_filings;

pub use classification::ClassificationEnricher;
pub use identifiers::IdentifierEnricher;
pub use llm_research::LlmResearchEnricher;
pub use market_data::MarketDataEnricher;
pub use sec_filings::SecFilingsEnricher;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Provider(#[from] ApiError),
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

/// One unit that augments a company record from one provider
#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Query the provider for an eligible company. `symbol` is the cleaned
    /// exchange symbol derived from the ticker.
    async fn fetch_fields(&self, company: &Company, symbol: &str) -> Result<Enrichment, EnrichError>;

    /// Enrich one company, retrying provider failures
    async fn enrich(&self, company: &Company) -> Result<Enrichment, EnrichError> {
        let Some(symbol) = company.symbol() else {
            debug!("Skipping {} for company without ticker", self.name());
            return Ok(Enrichment::new());
        };
        let symbol = symbol.as_str();
        let operation = format!("{} ({})", self.name(), company.display_ticker());

        retry_with_backoff(self.retry_policy(), &operation, || self.fetch_fields(company, symbol)).await
    }
}

/// Enricher types that can be switched on through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnricherKind {
    MarketData,
    Identifiers,
    Classification,
    SecFilings,
    LlmResearch,
}

impl EnricherKind {
    pub const ALL: [EnricherKind; 5] = [
        EnricherKind::MarketData,
        EnricherKind::Identifiers,
        EnricherKind::Classification,
        EnricherKind::SecFilings,
        EnricherKind::LlmResearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnricherKind::MarketData => "market_data",
            EnricherKind::Identifiers => "identifiers",
            EnricherKind::Classification => "classification",
            EnricherKind::SecFilings => "sec_filings",
            EnricherKind::LlmResearch => "llm_research",
        }
    }
}

impl fmt::Display for EnricherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnricherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        EnricherKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownEnricher(s.to_string()))
    }
}

/// Construct the enabled enrichers in configured order.
///
/// Both SEC enrichers share one EDGAR client so the ticker file is only
/// downloaded once per run.
pub fn build_enrichers(
    config: &Config,
    archive: Arc<dyn FilingArchive>,
) -> Result<Vec<Arc<dyn Enricher>>, EnrichError> {
    let retry = config.retry_policy();
    let mut sec_client: Option<Arc<SecEdgarClient>> = None;
    let mut enrichers: Vec<Arc<dyn Enricher>> = Vec::with_capacity(config.enabled_enrichers.len());

    for kind in &config.enabled_enrichers {
        let enricher: Arc<dyn Enricher> = match kind {
            EnricherKind::MarketData => Arc::new(MarketDataEnricher::new(Arc::new(YahooFinanceClient::new()?), retry)),
            EnricherKind::Identifiers => Arc::new(IdentifierEnricher::new(
                Arc::new(OpenFigiClient::new(config.openfigi_api_key.clone())?),
                retry,
            )),
            EnricherKind::Classification => {
                let client = shared_sec_client(&mut sec_client, &config.edgar_identity)?;
                Arc::new(ClassificationEnricher::new(client, retry))
            }
            EnricherKind::SecFilings => {
                let client = shared_sec_client(&mut sec_client, &config.edgar_identity)?;
                Arc::new(SecFilingsEnricher::new(
                    client,
                    archive.clone(),
                    config.filings_lookback_days,
                    retry,
                ))
            }
            EnricherKind::LlmResearch => {
                let api_key = config
                    .gemini_api_key
                    .as_deref()
                    .ok_or(EnrichError::MissingCredential("GEMINI_API_KEY"))?;
                Arc::new(LlmResearchEnricher::new(
                    Arc::new(GeminiClient::new(api_key, &config.gemini_model)?),
                    retry,
                ))
            }
        };
        info!("✅ Enabled enricher: {}", enricher.name());
        enrichers.push(enricher);
    }

    Ok(enrichers)
}

fn shared_sec_client(
    slot: &mut Option<Arc<SecEdgarClient>>,
    identity: &str,
) -> Result<Arc<SecEdgarClient>, EnrichError> {
    if let Some(client) = slot {
        return Ok(client.clone());
    }
    let client = Arc::new(SecEdgarClient::new(identity)?);
    *slot = Some(client.clone());
    Ok(client)
}
