//! Recent regulatory filings from SEC EDGAR.
//!
//! Only the form types in `FILING_TYPES` are tracked. Filings older than
//! the lookback window are ignored, the rest are summarised onto the
//! company row and the newest ones are archived in `company_filings`.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{EnrichError, Enricher};
use crate::api::{FilingsProvider, RecentFiling};
use crate::database::{FilingArchive, FilingRecord};
use crate::models::{Company, Enrichment, FieldName};
use crate::retry::RetryPolicy;

/// Form types worth tracking, with a short description
pub const FILING_TYPES: &[(&str, &str)] = &[
    ("10-K", "Annual report"),
    ("10-Q", "Quarterly report"),
    ("8-K", "Current report (material events)"),
    ("DEF 14A", "Proxy statement"),
    ("20-F", "Annual report (foreign)"),
    ("S-1", "Registration statement"),
    ("424B", "Prospectus"),
    ("11-K", "Employee stock plan annual report"),
    ("SC 13D", "Beneficial ownership report"),
    ("SC 13G", "Beneficial ownership report (passive)"),
    ("13F", "Institutional holdings"),
    ("DEFA14A", "Additional proxy materials"),
    ("S-3", "Registration statement (simplified)"),
    ("S-8", "Employee benefit plan registration"),
    ("6-K", "Current report (foreign)"),
    ("40-F", "Annual report (Canadian)"),
];

/// Families filed under numbered variants (424B2, 424B5, 13F-HR, ...)
const FORM_FAMILIES: &[&str] = &["424B", "13F"];

const PROXY_FORM: &str = "DEF 14A";
const ARCHIVED_FILINGS: usize = 20;

/// Description of a tracked form, `None` for forms we ignore
pub fn describe_form(form: &str) -> Option<&'static str> {
    FILING_TYPES
        .iter()
        .find(|(tracked, _)| *tracked == form || (FORM_FAMILIES.contains(tracked) && form.starts_with(tracked)))
        .map(|(_, description)| *description)
}

/// Tracked filings on or after `cutoff`, newest first
pub fn select_filings(filings: Vec<RecentFiling>, cutoff: NaiveDate) -> Vec<RecentFiling> {
    let mut selected: Vec<RecentFiling> = filings
        .into_iter()
        .filter(|filing| filing.filing_date >= cutoff && describe_form(&filing.form).is_some())
        .collect();
    selected.sort_by(|a, b| b.filing_date.cmp(&a.filing_date));
    selected
}

/// Link to the newest filing of `form`, preferring the primary document
fn latest_filing_url(filings: &[RecentFiling], form: &str) -> Option<String> {
    filings
        .iter()
        .find(|filing| filing.form == form)
        .map(|filing| filing.document_url.clone().unwrap_or_else(|| filing.filing_url.clone()))
}

/// `{form: {count, latest_date}}` over newest-first filings
fn filings_summary(filings: &[RecentFiling]) -> Value {
    let mut summary = Map::new();
    for filing in filings {
        let entry = summary
            .entry(filing.form.clone())
            .or_insert_with(|| json!({ "count": 0, "latest_date": filing.filing_date.to_string() }));
        if let Some(count) = entry.get_mut("count") {
            *count = json!(count.as_u64().unwrap_or(0) + 1);
        }
    }
    Value::Object(summary)
}

fn archive_record(filing: &RecentFiling) -> FilingRecord {
    FilingRecord {
        form_type: filing.form.clone(),
        filing_date: filing.filing_date,
        accession_number: filing.accession_number.clone(),
        filing_url: filing.filing_url.clone(),
        document_url: filing.document_url.clone(),
        metadata: json!({
            "description": describe_form(&filing.form),
            "report_date": filing.report_date,
            "file_number": filing.file_number,
            "size": filing.size,
        }),
    }
}

/// Summary of recent SEC filings, with the newest archived separately
pub struct SecFilingsEnricher {
    provider: Arc<dyn FilingsProvider>,
    archive: Arc<dyn FilingArchive>,
    lookback_days: i64,
    retry: RetryPolicy,
}

impl SecFilingsEnricher {
    pub fn new(
        provider: Arc<dyn FilingsProvider>,
        archive: Arc<dyn FilingArchive>,
        lookback_days: i64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            archive,
            lookback_days,
            retry,
        }
    }

    fn cutoff(&self) -> NaiveDate {
        Utc::now().date_naive() - Duration::days(self.lookback_days)
    }
}

#[async_trait]
impl Enricher for SecFilingsEnricher {
    fn name(&self) -> &str {
        "sec_filings"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_fields(&self, company: &Company, symbol: &str) -> Result<Enrichment, EnrichError> {
        let ticker = company.display_ticker();
        info!("📄 Fetching SEC filings for {} (from {})", symbol, ticker);

        let mut fields = Enrichment::new();
        let Some(identity) = self.provider.resolve_ticker(symbol).await? else {
            info!("{} not found in SEC EDGAR (likely non-US company)", symbol);
            return Ok(fields);
        };

        let submissions = self.provider.submissions(identity.cik).await?;
        let filings = select_filings(submissions.recent_filings, self.cutoff());
        debug!("{} tracked filings for {} in the last {} days", filings.len(), symbol, self.lookback_days);

        fields
            .set(FieldName::SecCik, identity.cik.to_string())
            .set(FieldName::SecCompanyName, submissions.name)
            .set(FieldName::SecFilingsCount, filings.len())
            .set_opt(FieldName::SecLatest10k, latest_filing_url(&filings, "10-K"))
            .set_opt(FieldName::SecLatest10q, latest_filing_url(&filings, "10-Q"))
            .set_opt(FieldName::SecLatest8k, latest_filing_url(&filings, "8-K"))
            .set_opt(FieldName::SecLatestProxy, latest_filing_url(&filings, PROXY_FORM))
            .set(FieldName::SecFilingsSummary, filings_summary(&filings))
            .set(FieldName::SecLastUpdated, Utc::now().to_rfc3339());

        let records: Vec<FilingRecord> = filings.iter().take(ARCHIVED_FILINGS).map(archive_record).collect();
        if !records.is_empty() {
            match self.archive.archive_filings(ticker, &records).await {
                Ok(stored) => debug!("Archived {} filings for {}", stored, ticker),
                Err(e) => warn!("Failed to store detailed filings for {}: {}", ticker, e),
            }
        }

        Ok(fields)
    }
}
