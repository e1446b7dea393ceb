//! Yahoo Finance market data.
//!
//! Valuation and profile come from the quoteSummary endpoint, trading
//! history from the v8 chart endpoint. Yahoo has no official API; both
//! payloads are parsed leniently and unknown symbols map to `None`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{build_http_client, ensure_success, ApiError, ApiRateLimiter, ApiResult, MarketDataProvider};

const PROVIDER: &str = "Yahoo Finance";
pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; equity-pipeline/1.0)";

/// Valuation and classification snapshot for one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    pub market_cap: Option<f64>,
    pub enterprise_value: Option<f64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
}

/// One daily bar; only what the traded-value calculation needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBar {
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryEnvelope {
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    result: Option<Vec<QuoteSummaryResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    price: Option<PriceModule>,
    summary_profile: Option<SummaryProfile>,
    default_key_statistics: Option<KeyStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    market_cap: Option<RawNumber>,
}

#[derive(Debug, Deserialize)]
struct SummaryProfile {
    sector: Option<String>,
    industry: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    enterprise_value: Option<RawNumber>,
}

/// Yahoo wraps numbers as `{"raw": 1.0, "fmt": "1.00"}`
#[derive(Debug, Deserialize)]
struct RawNumber {
    raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance client
pub struct YahooFinanceClient {
    client: Client,
    base_url: Url,
    rate_limiter: ApiRateLimiter,
}

impl YahooFinanceClient {
    pub fn new() -> ApiResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> ApiResult<Self> {
        Ok(Self {
            client: build_http_client(USER_AGENT)?,
            base_url: Url::parse(base_url)?,
            rate_limiter: ApiRateLimiter::per_minute(120),
        })
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        Ok(self.base_url.join(path)?)
    }
}

fn is_not_found(error: &YahooError) -> bool {
    error.code.eq_ignore_ascii_case("not found")
}

fn decode_error(message: impl Into<String>) -> ApiError {
    ApiError::Decode {
        provider: PROVIDER,
        message: message.into(),
    }
}

#[async_trait]
impl MarketDataProvider for YahooFinanceClient {
    async fn market_snapshot(&self, symbol: &str) -> ApiResult<Option<MarketSnapshot>> {
        let mut url = self.endpoint(&format!("v10/finance/quoteSummary/{}", symbol))?;
        url.query_pairs_mut()
            .append_pair("modules", "price,summaryProfile,defaultKeyStatistics");

        self.rate_limiter.wait().await;
        debug!("Fetching Yahoo quote summary for {}", symbol);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: QuoteSummaryEnvelope = ensure_success(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| decode_error(e.to_string()))?;

        if let Some(error) = envelope.quote_summary.error {
            if is_not_found(&error) {
                return Ok(None);
            }
            return Err(decode_error(format!(
                "{}: {}",
                error.code,
                error.description.unwrap_or_default()
            )));
        }

        let Some(result) = envelope
            .quote_summary
            .result
            .and_then(|results| results.into_iter().next())
        else {
            return Ok(None);
        };

        let profile = result.summary_profile;
        Ok(Some(MarketSnapshot {
            market_cap: result.price.and_then(|p| p.market_cap).and_then(|n| n.raw),
            enterprise_value: result
                .default_key_statistics
                .and_then(|s| s.enterprise_value)
                .and_then(|n| n.raw),
            sector: profile.as_ref().and_then(|p| p.sector.clone()),
            industry: profile.as_ref().and_then(|p| p.industry.clone()),
            country: profile.and_then(|p| p.country),
        }))
    }

    async fn daily_bars(&self, symbol: &str, range: &str) -> ApiResult<Vec<DailyBar>> {
        let mut url = self.endpoint(&format!("v8/finance/chart/{}", symbol))?;
        url.query_pairs_mut()
            .append_pair("range", range)
            .append_pair("interval", "1d");

        self.rate_limiter.wait().await;
        debug!("Fetching Yahoo chart for {} over {}", symbol, range);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let envelope: ChartEnvelope = ensure_success(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| decode_error(e.to_string()))?;

        if let Some(error) = envelope.chart.error {
            if is_not_found(&error) {
                return Ok(Vec::new());
            }
            return Err(decode_error(format!(
                "{}: {}",
                error.code,
                error.description.unwrap_or_default()
            )));
        }

        let series = envelope
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .and_then(|result| result.indicators.quote.into_iter().next());

        let bars = match series {
            Some(series) => series
                .close
                .into_iter()
                .zip(series.volume)
                .filter_map(|(close, volume)| Some(DailyBar { close: close?, volume: volume? }))
                .collect(),
            None => Vec::new(),
        };

        debug!("Retrieved {} daily bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}
