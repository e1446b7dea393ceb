use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use super::{build_http_client, ensure_success, ApiError, ApiRateLimiter, ApiResult, FilingsProvider};

const PROVIDER: &str = "SEC EDGAR";
pub const DEFAULT_WWW_URL: &str = "https://www.sec.gov";
pub const DEFAULT_DATA_URL: &str = "https://data.sec.gov";

/// SEC allows 10 requests per second per client
const SEC_REQUESTS_PER_SECOND: u32 = 10;

/// Issuer as listed in the SEC ticker file
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyIdentity {
    pub cik: u64,
    pub ticker: String,
    pub title: String,
}

/// One entry of a company's recent filing index
#[derive(Debug, Clone, PartialEq)]
pub struct RecentFiling {
    pub accession_number: String,
    pub form: String,
    pub filing_date: NaiveDate,
    pub report_date: Option<String>,
    pub filing_url: String,
    pub document_url: Option<String>,
    pub file_number: Option<String>,
    pub size: Option<u64>,
}

/// Decoded `submissions/CIK##########.json`
#[derive(Debug, Clone, PartialEq)]
pub struct Submissions {
    pub cik: u64,
    pub name: String,
    pub sic: Option<String>,
    pub sic_description: Option<String>,
    pub recent_filings: Vec<RecentFiling>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionsPayload {
    name: String,
    sic: Option<String>,
    sic_description: Option<String>,
    filings: FilingsPayload,
}

#[derive(Debug, Deserialize)]
struct FilingsPayload {
    recent: RecentColumns,
}

/// The recent index is column-oriented: one array per attribute
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentColumns {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
    #[serde(default)]
    file_number: Vec<String>,
    #[serde(default)]
    size: Vec<u64>,
}

/// SEC EDGAR client for ticker resolution and filing indices
pub struct SecEdgarClient {
    http_client: Client,
    www_url: Url,
    data_url: Url,
    rate_limiter: ApiRateLimiter,
    tickers: OnceCell<HashMap<String, CompanyIdentity>>,
}

impl SecEdgarClient {
    /// Create a client identifying itself with `identity` ("Company contact@email")
    pub fn new(identity: &str) -> ApiResult<Self> {
        Self::with_base_urls(identity, DEFAULT_WWW_URL, DEFAULT_DATA_URL)
    }

    pub fn with_base_urls(identity: &str, www_url: &str, data_url: &str) -> ApiResult<Self> {
        Ok(Self {
            http_client: build_http_client(identity)?,
            www_url: Url::parse(www_url)?,
            data_url: Url::parse(data_url)?,
            rate_limiter: ApiRateLimiter::per_second(SEC_REQUESTS_PER_SECOND),
            tickers: OnceCell::new(),
        })
    }

    async fn get(&self, url: Url) -> ApiResult<Option<reqwest::Response>> {
        self.rate_limiter.wait().await;
        debug!("Making request to: {}", url);

        let response = self.http_client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ensure_success(PROVIDER, response).await?))
    }

    /// Ticker file, downloaded once per client
    async fn ticker_index(&self) -> ApiResult<&HashMap<String, CompanyIdentity>> {
        self.tickers
            .get_or_try_init(|| async {
                let url = self.www_url.join("files/company_tickers.json")?;
                let response = self.get(url).await?.ok_or_else(|| ApiError::Decode {
                    provider: PROVIDER,
                    message: "company_tickers.json not found".to_string(),
                })?;
                let entries: HashMap<String, TickerEntry> = response.json().await.map_err(|e| ApiError::Decode {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;

                let index: HashMap<String, CompanyIdentity> = entries
                    .into_values()
                    .map(|entry| {
                        (
                            entry.ticker.to_uppercase(),
                            CompanyIdentity {
                                cik: entry.cik_str,
                                ticker: entry.ticker,
                                title: entry.title,
                            },
                        )
                    })
                    .collect();
                info!("📋 Loaded {} SEC ticker mappings", index.len());
                Ok::<_, ApiError>(index)
            })
            .await
    }

    fn archive_url(&self, cik: u64, accession_number: &str, file: &str) -> String {
        let folder = accession_number.replace('-', "");
        format!(
            "{}/Archives/edgar/data/{}/{}/{}",
            self.www_url.as_str().trim_end_matches('/'),
            cik,
            folder,
            file
        )
    }

    fn recent_filings(&self, cik: u64, columns: RecentColumns) -> Vec<RecentFiling> {
        let mut filings = Vec::with_capacity(columns.accession_number.len());

        for (index, accession_number) in columns.accession_number.iter().enumerate() {
            let Some(form) = columns.form.get(index) else {
                continue;
            };
            let filing_date = match columns
                .filing_date
                .get(index)
                .map(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d"))
            {
                Some(Ok(date)) => date,
                _ => {
                    warn!("Skipping filing {} with unparseable date", accession_number);
                    continue;
                }
            };
            let non_empty = |values: &Vec<String>| {
                values
                    .get(index)
                    .filter(|value| !value.is_empty())
                    .cloned()
            };

            filings.push(RecentFiling {
                accession_number: accession_number.clone(),
                form: form.clone(),
                filing_date,
                report_date: non_empty(&columns.report_date),
                filing_url: self.archive_url(cik, accession_number, &format!("{}-index.htm", accession_number)),
                document_url: non_empty(&columns.primary_document)
                    .map(|document| self.archive_url(cik, accession_number, &document)),
                file_number: non_empty(&columns.file_number),
                size: columns.size.get(index).copied(),
            });
        }

        filings
    }
}

#[async_trait]
impl FilingsProvider for SecEdgarClient {
    async fn resolve_ticker(&self, symbol: &str) -> ApiResult<Option<CompanyIdentity>> {
        let index = self.ticker_index().await?;
        Ok(index.get(&symbol.to_uppercase()).cloned())
    }

    async fn submissions(&self, cik: u64) -> ApiResult<Submissions> {
        let url = self.data_url.join(&format!("submissions/CIK{:0>10}.json", cik))?;
        let response = self.get(url).await?.ok_or_else(|| ApiError::Decode {
            provider: PROVIDER,
            message: format!("no submissions for CIK {}", cik),
        })?;
        let payload: SubmissionsPayload = response.json().await.map_err(|e| ApiError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        let recent_filings = self.recent_filings(cik, payload.filings.recent);
        debug!("Retrieved {} recent filings for CIK {}", recent_filings.len(), cik);

        Ok(Submissions {
            cik,
            name: payload.name,
            sic: payload.sic.filter(|sic| !sic.is_empty()),
            sic_description: payload.sic_description.filter(|d| !d.is_empty()),
            recent_filings,
        })
    }
}
