use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{EnrichError, Enricher};
use crate::api::{DailyBar, MarketDataProvider};
use crate::models::{Company, Enrichment, FieldName};
use crate::retry::RetryPolicy;

/// Window for the average daily traded value
const HISTORY_RANGE: &str = "3mo";

/// Valuation, profile and liquidity from the market data provider
pub struct MarketDataEnricher {
    provider: Arc<dyn MarketDataProvider>,
    retry: RetryPolicy,
}

impl MarketDataEnricher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }
}

/// Mean volume times mean close over the window
pub fn average_daily_value_traded(bars: &[DailyBar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let count = bars.len() as f64;
    let mean_volume = bars.iter().map(|bar| bar.volume).sum::<f64>() / count;
    let mean_close = bars.iter().map(|bar| bar.close).sum::<f64>() / count;
    Some(mean_volume * mean_close)
}

#[async_trait]
impl Enricher for MarketDataEnricher {
    fn name(&self) -> &str {
        "market_data"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_fields(&self, company: &Company, symbol: &str) -> Result<Enrichment, EnrichError> {
        info!("📈 Enriching {} with market data", company.display_ticker());

        let mut fields = Enrichment::new();
        let Some(snapshot) = self.provider.market_snapshot(symbol).await? else {
            debug!("No market data for {}", symbol);
            return Ok(fields);
        };

        let bars = self.provider.daily_bars(symbol, HISTORY_RANGE).await?;

        fields
            .set_opt(FieldName::MarketCap, snapshot.market_cap)
            .set_opt(FieldName::EnterpriseValue, snapshot.enterprise_value)
            .set_opt(FieldName::AvgDailyValueTraded3m, average_daily_value_traded(&bars))
            .set_opt(FieldName::GicsSector, snapshot.sector)
            .set_opt(FieldName::GicsIndustryGroup, snapshot.industry)
            .set_opt(FieldName::CountryOfDomicile, snapshot.country);
        Ok(fields)
    }
}
