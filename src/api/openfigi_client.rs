use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{build_http_client, ensure_success, ApiError, ApiRateLimiter, ApiResult, IdentifierProvider};

const PROVIDER: &str = "OpenFIGI";
pub const DEFAULT_BASE_URL: &str = "https://api.openfigi.com";

/// First instrument OpenFIGI maps a ticker to
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FigiRecord {
    pub figi: String,
    #[serde(rename = "compositeFIGI")]
    pub composite_figi: Option<String>,
    #[serde(rename = "shareClassFIGI")]
    pub share_class_figi: Option<String>,
    pub security_type: Option<String>,
    pub market_sector: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MappingJob<'a> {
    id_type: &'static str,
    id_value: &'a str,
    exch_code: &'static str,
}

#[derive(Debug, Deserialize)]
struct MappingResult {
    data: Option<Vec<FigiRecord>>,
    warning: Option<String>,
    error: Option<String>,
}

/// OpenFIGI v3 mapping client
pub struct OpenFigiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    rate_limiter: ApiRateLimiter,
}

impl OpenFigiClient {
    pub fn new(api_key: Option<String>) -> ApiResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> ApiResult<Self> {
        // Anonymous access is limited to 25 mapping requests per minute
        let per_minute = if api_key.is_some() { 250 } else { 25 };
        Ok(Self {
            client: build_http_client("equity-pipeline/1.0")?,
            base_url: Url::parse(base_url)?,
            api_key,
            rate_limiter: ApiRateLimiter::per_minute(per_minute),
        })
    }
}

#[async_trait]
impl IdentifierProvider for OpenFigiClient {
    async fn lookup_ticker(&self, symbol: &str) -> ApiResult<Option<FigiRecord>> {
        let url = self.base_url.join("v3/mapping")?;
        let jobs = [MappingJob {
            id_type: "TICKER",
            id_value: symbol,
            exch_code: "US",
        }];

        let mut request = self.client.post(url).json(&jobs);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-OPENFIGI-APIKEY", api_key);
        }

        self.rate_limiter.wait().await;
        debug!("Mapping {} through OpenFIGI", symbol);

        let results: Vec<MappingResult> = ensure_success(PROVIDER, request.send().await?)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let Some(result) = results.into_iter().next() else {
            return Ok(None);
        };
        if let Some(error) = result.error {
            return Err(ApiError::Decode {
                provider: PROVIDER,
                message: error,
            });
        }
        if let Some(warning) = result.warning {
            debug!("OpenFIGI has no mapping for {}: {}", symbol, warning);
        }

        Ok(result.data.and_then(|records| records.into_iter().next()))
    }
}
