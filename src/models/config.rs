use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::enrichers::EnricherKind;
use crate::retry::RetryPolicy;

pub const DEFAULT_EDGAR_IDENTITY: &str = "equity-pipeline admin@example.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing datastore credentials: {0} environment variable required")]
    MissingCredentials(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("Unknown enricher '{0}' in ENABLED_ENRICHERS")]
    UnknownEnricher(String),
}

/// Configuration for one pipeline process, resolved once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub batch_size: usize,
    pub save_frequency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub concurrency: usize,
    pub enabled_enrichers: Vec<EnricherKind>,
    pub filings_lookback_days: i64,
    pub edgar_identity: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openfigi_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = get("DATABASE_URL")
            .ok_or(ConfigError::MissingCredentials("DATABASE_URL"))?;

        let retry_delay_secs: f64 = parse_or(get("RETRY_DELAY"), "RETRY_DELAY", 1.0)?;
        if !retry_delay_secs.is_finite() || retry_delay_secs < 0.0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_DELAY",
                value: retry_delay_secs.to_string(),
            });
        }

        let enabled_enrichers = match get("ENABLED_ENRICHERS") {
            Some(list) => parse_enricher_list(&list)?,
            None => vec![EnricherKind::LlmResearch],
        };

        let filings_lookback_days: i64 =
            parse_or(get("FILINGS_LOOKBACK_DAYS"), "FILINGS_LOOKBACK_DAYS", 365)?;
        if filings_lookback_days < 0 {
            return Err(ConfigError::Invalid {
                key: "FILINGS_LOOKBACK_DAYS",
                value: filings_lookback_days.to_string(),
            });
        }

        Ok(Config {
            database_url,
            batch_size: parse_positive(get("BATCH_SIZE"), "BATCH_SIZE", 10)?,
            save_frequency: parse_positive(get("SAVE_FREQUENCY"), "SAVE_FREQUENCY", 5)?,
            max_retries: parse_or(get("MAX_RETRIES"), "MAX_RETRIES", 2)?,
            retry_delay: Duration::from_secs_f64(retry_delay_secs),
            concurrency: parse_positive(get("ENRICHMENT_CONCURRENCY"), "ENRICHMENT_CONCURRENCY", 4)?,
            enabled_enrichers,
            filings_lookback_days,
            edgar_identity: get("EDGAR_IDENTITY").unwrap_or_else(|| DEFAULT_EDGAR_IDENTITY.to_string()),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            openfigi_api_key: get("OPENFIGI_API_KEY"),
        })
    }

    /// Retry policy every enricher wraps its provider call in
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_positive(raw: Option<String>, key: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value = parse_or(raw, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid { key, value: "0".to_string() });
    }
    Ok(value)
}

fn parse_enricher_list(list: &str) -> Result<Vec<EnricherKind>, ConfigError> {
    let mut kinds = Vec::new();
    for name in list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let kind = name
            .parse::<EnricherKind>()
            .map_err(|_| ConfigError::UnknownEnricher(name.to_string()))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}
