use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

pub mod gemini_client;
pub mod openfigi_client;
pub mod sec_edgar_client;
pub mod yahoo_client;

pub use gemini_client::GeminiClient;
pub use openfigi_client::{FigiRecord, OpenFigiClient};
pub use sec_edgar_client::{CompanyIdentity, RecentFiling, SecEdgarClient, Submissions};
pub use yahoo_client::{DailyBar, MarketSnapshot, YahooFinanceClient};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY: usize = 200;

/// Failure talking to an external provider
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("Failed to decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
    #[error("Invalid provider URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Shared request throttle for one provider client
pub struct ApiRateLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl ApiRateLimiter {
    pub fn per_second(requests: u32) -> Self {
        let requests = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(requests)),
        }
    }

    pub fn per_minute(requests: u32) -> Self {
        let requests = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(requests)),
        }
    }

    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

/// Build the HTTP client every provider uses
pub fn build_http_client(user_agent: &str) -> ApiResult<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

/// Turn a non-success response into `ApiError::Status`
pub(crate) async fn ensure_success(provider: &'static str, response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.chars().take(MAX_ERROR_BODY).collect();
    Err(ApiError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

/// Quote, valuation and profile data for one listed symbol
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// `None` when the provider does not know the symbol
    async fn market_snapshot(&self, symbol: &str) -> ApiResult<Option<MarketSnapshot>>;
    /// Daily bars over a provider range such as `3mo`
    async fn daily_bars(&self, symbol: &str, range: &str) -> ApiResult<Vec<DailyBar>>;
}

/// Ticker to financial-instrument identifier mapping
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentifierProvider: Send + Sync {
    async fn lookup_ticker(&self, symbol: &str) -> ApiResult<Option<FigiRecord>>;
}

/// Regulatory filing index keyed by SEC CIK
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FilingsProvider: Send + Sync {
    /// `None` for symbols the SEC does not list (typically non-US issuers)
    async fn resolve_ticker(&self, symbol: &str) -> ApiResult<Option<CompanyIdentity>>;
    async fn submissions(&self, cik: u64) -> ApiResult<Submissions>;
}

/// Free-text LLM completion
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> ApiResult<String>;
    fn model(&self) -> String;
}
