use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod config;
pub use config::{Config, ConfigError};

/// Value stored in a company column
pub type FieldValue = Value;

/// Column name of the identity key in the company table
pub const TICKER_COLUMN: &str = "ticker";
/// Column name of the provider-agnostic company name
pub const NAME_COLUMN: &str = "name";
/// Column stamped by the pipeline after a successful merge
pub const LAST_ENRICHED_COLUMN: &str = "last_enriched";

/// Every enrichment column the persisted schema knows about, with its SQLite type
pub const KNOWN_COLUMNS: &[(&str, &str)] = &[
    ("market_cap", "REAL"),
    ("enterprise_value", "REAL"),
    ("avg_daily_value_traded_3m", "REAL"),
    ("gics_sector", "TEXT"),
    ("gics_industry_group", "TEXT"),
    ("country_of_domicile", "TEXT"),
    ("figi", "TEXT"),
    ("composite_figi", "TEXT"),
    ("share_class_figi", "TEXT"),
    ("security_type", "TEXT"),
    ("market_sector", "TEXT"),
    ("sic_code", "TEXT"),
    ("sic_description", "TEXT"),
    ("sic_division", "TEXT"),
    ("sec_cik", "TEXT"),
    ("sec_company_name", "TEXT"),
    ("sec_filings_count", "INTEGER"),
    ("sec_latest_10k", "TEXT"),
    ("sec_latest_10q", "TEXT"),
    ("sec_latest_8k", "TEXT"),
    ("sec_latest_proxy", "TEXT"),
    ("sec_filings_summary", "TEXT"),
    ("sec_last_updated", "TEXT"),
    ("llm_primary_website", "TEXT"),
    ("llm_investor_section_url", "TEXT"),
    ("llm_corporate_presentations", "TEXT"),
    ("llm_presentations_count", "INTEGER"),
    ("llm_enrichment_model", "TEXT"),
    ("llm_last_updated", "TEXT"),
];

/// Name of a column an enricher can write.
///
/// Known provider fields are enumerated so a typo is a compile error;
/// `Extension` carries anything else through to the store, which decides
/// whether the column exists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    MarketCap,
    EnterpriseValue,
    AvgDailyValueTraded3m,
    GicsSector,
    GicsIndustryGroup,
    CountryOfDomicile,
    Figi,
    CompositeFigi,
    ShareClassFigi,
    SecurityType,
    MarketSector,
    SicCode,
    SicDescription,
    SicDivision,
    SecCik,
    SecCompanyName,
    SecFilingsCount,
    SecLatest10k,
    SecLatest10q,
    SecLatest8k,
    SecLatestProxy,
    SecFilingsSummary,
    SecLastUpdated,
    LlmPrimaryWebsite,
    LlmInvestorSectionUrl,
    LlmCorporatePresentations,
    LlmPresentationsCount,
    LlmEnrichmentModel,
    LlmLastUpdated,
    Extension(String),
}

impl FieldName {
    /// Column this field is persisted under
    pub fn column(&self) -> &str {
        match self {
            FieldName::MarketCap => "market_cap",
            FieldName::EnterpriseValue => "enterprise_value",
            FieldName::AvgDailyValueTraded3m => "avg_daily_value_traded_3m",
            FieldName::GicsSector => "gics_sector",
            FieldName::GicsIndustryGroup => "gics_industry_group",
            FieldName::CountryOfDomicile => "country_of_domicile",
            FieldName::Figi => "figi",
            FieldName::CompositeFigi => "composite_figi",
            FieldName::ShareClassFigi => "share_class_figi",
            FieldName::SecurityType => "security_type",
            FieldName::MarketSector => "market_sector",
            FieldName::SicCode => "sic_code",
            FieldName::SicDescription => "sic_description",
            FieldName::SicDivision => "sic_division",
            FieldName::SecCik => "sec_cik",
            FieldName::SecCompanyName => "sec_company_name",
            FieldName::SecFilingsCount => "sec_filings_count",
            FieldName::SecLatest10k => "sec_latest_10k",
            FieldName::SecLatest10q => "sec_latest_10q",
            FieldName::SecLatest8k => "sec_latest_8k",
            FieldName::SecLatestProxy => "sec_latest_proxy",
            FieldName::SecFilingsSummary => "sec_filings_summary",
            FieldName::SecLastUpdated => "sec_last_updated",
            FieldName::LlmPrimaryWebsite => "llm_primary_website",
            FieldName::LlmInvestorSectionUrl => "llm_investor_section_url",
            FieldName::LlmCorporatePresentations => "llm_corporate_presentations",
            FieldName::LlmPresentationsCount => "llm_presentations_count",
            FieldName::LlmEnrichmentModel => "llm_enrichment_model",
            FieldName::LlmLastUpdated => "llm_last_updated",
            FieldName::Extension(name) => name,
        }
    }

    /// Resolve a column name back to a field, falling back to `Extension`
    pub fn from_column(column: &str) -> Self {
        match column {
            "market_cap" => FieldName::MarketCap,
            "enterprise_value" => FieldName::EnterpriseValue,
            "avg_daily_value_traded_3m" => FieldName::AvgDailyValueTraded3m,
            "gics_sector" => FieldName::GicsSector,
            "gics_industry_group" => FieldName::GicsIndustryGroup,
            "country_of_domicile" => FieldName::CountryOfDomicile,
            "figi" => FieldName::Figi,
            "composite_figi" => FieldName::CompositeFigi,
            "share_class_figi" => FieldName::ShareClassFigi,
            "security_type" => FieldName::SecurityType,
            "market_sector" => FieldName::MarketSector,
            "sic_code" => FieldName::SicCode,
            "sic_description" => FieldName::SicDescription,
            "sic_division" => FieldName::SicDivision,
            "sec_cik" => FieldName::SecCik,
            "sec_company_name" => FieldName::SecCompanyName,
            "sec_filings_count" => FieldName::SecFilingsCount,
            "sec_latest_10k" => FieldName::SecLatest10k,
            "sec_latest_10q" => FieldName::SecLatest10q,
            "sec_latest_8k" => FieldName::SecLatest8k,
            "sec_latest_proxy" => FieldName::SecLatestProxy,
            "sec_filings_summary" => FieldName::SecFilingsSummary,
            "sec_last_updated" => FieldName::SecLastUpdated,
            "llm_primary_website" => FieldName::LlmPrimaryWebsite,
            "llm_investor_section_url" => FieldName::LlmInvestorSectionUrl,
            "llm_corporate_presentations" => FieldName::LlmCorporatePresentations,
            "llm_presentations_count" => FieldName::LlmPresentationsCount,
            "llm_enrichment_model" => FieldName::LlmEnrichmentModel,
            "llm_last_updated" => FieldName::LlmLastUpdated,
            other => FieldName::Extension(other.to_string()),
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl From<&str> for FieldName {
    fn from(column: &str) -> Self {
        FieldName::from_column(column)
    }
}

/// Partial set of field updates produced by one enricher for one company.
///
/// Null values never make it in: `set` drops them, so an enricher cannot
/// overwrite a stored column with NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    fields: BTreeMap<FieldName, FieldValue>,
}

impl Enrichment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, ignoring null values
    pub fn set(&mut self, field: impl Into<FieldName>, value: impl Into<FieldValue>) -> &mut Self {
        let value = value.into();
        if !value.is_null() {
            self.fields.insert(field.into(), value);
        }
        self
    }

    /// Set a field when the provider returned something
    pub fn set_opt<V: Into<FieldValue>>(&mut self, field: impl Into<FieldName>, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.set(field, value);
        }
        self
    }

    /// Builder-style `set`
    pub fn with(mut self, field: impl Into<FieldName>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &FieldName) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Merge `later` into `self`; on collision the later value wins
    pub fn merge(&mut self, later: Enrichment) {
        self.fields.extend(later.fields);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &FieldValue)> {
        self.fields.iter()
    }
}

/// In-memory copy of one row of the company table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Company {
    pub ticker: Option<String>,
    pub name: Option<String>,
    /// Every other non-null column of the row
    pub fields: BTreeMap<String, FieldValue>,
}

impl Company {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Identity key exactly as stored, if it is not blank.
    ///
    /// Writes are keyed on this value, so it is never trimmed.
    pub fn ticker(&self) -> Option<&str> {
        self.ticker
            .as_deref()
            .filter(|ticker| !ticker.trim().is_empty())
    }

    /// Ticker for log lines
    pub fn display_ticker(&self) -> &str {
        self.ticker().unwrap_or("Unknown")
    }

    /// Exchange symbol used when querying providers.
    ///
    /// Tickers may arrive in terminal form ("RING NO Equity"); providers only
    /// understand the leading symbol.
    pub fn symbol(&self) -> Option<String> {
        self.ticker()
            .and_then(|ticker| ticker.split_whitespace().next())
            .map(str::to_uppercase)
    }

    /// Human readable name, falling back to the ticker
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.display_ticker())
    }
}

/// Merged enrichment for one company, waiting in the results buffer
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyUpdate {
    pub ticker: String,
    pub enriched_at: DateTime<Utc>,
    pub fields: Enrichment,
}

impl CompanyUpdate {
    pub fn new(ticker: &str, fields: Enrichment) -> Self {
        Self {
            ticker: ticker.to_string(),
            enriched_at: Utc::now(),
            fields,
        }
    }

    /// Columns to write, including the `last_enriched` stamp
    pub fn columns(&self) -> Vec<(String, FieldValue)> {
        let mut columns: Vec<(String, FieldValue)> = self
            .fields
            .iter()
            .map(|(field, value)| (field.column().to_string(), value.clone()))
            .collect();
        columns.push((
            LAST_ENRICHED_COLUMN.to_string(),
            Value::String(self.enriched_at.to_rfc3339()),
        ));
        columns
    }
}

/// Row of the append-only enrichment error log
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentLogEntry {
    pub ticker: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl EnrichmentLogEntry {
    pub fn new(ticker: &str, error: impl fmt::Display, source: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
            source: source.to_string(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total_companies: usize,
    pub processed_companies: usize,
    /// Companies that produced at least one field
    pub enriched_companies: usize,
    pub failed_companies: usize,
    pub enricher_failures: usize,
    pub rows_written: usize,
    /// Rows that could not be persisted and went to the error log instead
    pub rows_dead_lettered: usize,
    pub flushes: usize,
    pub cancelled: bool,
    pub duration: Duration,
}
