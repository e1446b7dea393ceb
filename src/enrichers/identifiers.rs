use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{EnrichError, Enricher};
use crate::api::IdentifierProvider;
use crate::models::{Company, Enrichment, FieldName};
use crate::retry::RetryPolicy;

/// Financial instrument identifiers (FIGI) for a ticker
pub struct IdentifierEnricher {
    provider: Arc<dyn IdentifierProvider>,
    retry: RetryPolicy,
}

impl IdentifierEnricher {
    pub fn new(provider: Arc<dyn IdentifierProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }
}

#[async_trait]
impl Enricher for IdentifierEnricher {
    fn name(&self) -> &str {
        "identifiers"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_fields(&self, company: &Company, symbol: &str) -> Result<Enrichment, EnrichError> {
        info!("🔎 Looking up identifiers for {}", company.display_ticker());

        let mut fields = Enrichment::new();
        match self.provider.lookup_ticker(symbol).await? {
            Some(record) => {
                fields
                    .set(FieldName::Figi, record.figi)
                    .set_opt(FieldName::CompositeFigi, record.composite_figi)
                    .set_opt(FieldName::ShareClassFigi, record.share_class_figi)
                    .set_opt(FieldName::SecurityType, record.security_type)
                    .set_opt(FieldName::MarketSector, record.market_sector);
            }
            None => debug!("No identifier mapping for {}", symbol),
        }
        Ok(fields)
    }
}
