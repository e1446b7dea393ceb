use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{EnrichError, Enricher};
use crate::api::FilingsProvider;
use crate::models::{Company, Enrichment, FieldName};
use crate::retry::RetryPolicy;

/// SIC divisions keyed by the inclusive range of two-digit major groups
const SIC_DIVISIONS: &[(u32, u32, &str)] = &[
    (1, 9, "Agriculture, Forestry, And Fishing"),
    (10, 14, "Mining"),
    (15, 17, "Construction"),
    (20, 39, "Manufacturing"),
    (40, 49, "Transportation, Communications, Electric, Gas, And Sanitary Services"),
    (50, 51, "Wholesale Trade"),
    (52, 59, "Retail Trade"),
    (60, 67, "Finance, Insurance, And Real Estate"),
    (70, 89, "Services"),
    (91, 97, "Public Administration"),
    (99, 99, "Nonclassifiable Establishments"),
];

/// Division a four-digit SIC code belongs to
pub fn sic_division(sic_code: &str) -> Option<&'static str> {
    let code: u32 = sic_code.trim().parse().ok()?;
    let major_group = code / 100;
    SIC_DIVISIONS
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&major_group))
        .map(|(_, _, division)| *division)
}

/// Industry classification from the SEC registrant record
pub struct ClassificationEnricher {
    provider: Arc<dyn FilingsProvider>,
    retry: RetryPolicy,
}

impl ClassificationEnricher {
    pub fn new(provider: Arc<dyn FilingsProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }
}

#[async_trait]
impl Enricher for ClassificationEnricher {
    fn name(&self) -> &str {
        "classification"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_fields(&self, company: &Company, symbol: &str) -> Result<Enrichment, EnrichError> {
        info!("🏷️ Fetching industry classification for {}", company.display_ticker());

        let mut fields = Enrichment::new();
        let Some(identity) = self.provider.resolve_ticker(symbol).await? else {
            debug!("{} not registered with the SEC, skipping classification", symbol);
            return Ok(fields);
        };

        let submissions = self.provider.submissions(identity.cik).await?;
        if let Some(sic) = &submissions.sic {
            fields
                .set(FieldName::SicCode, sic.as_str())
                .set_opt(FieldName::SicDivision, sic_division(sic));
        }
        fields.set_opt(FieldName::SicDescription, submissions.sic_description);
        Ok(fields)
    }
}
