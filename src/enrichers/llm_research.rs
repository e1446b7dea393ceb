use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{EnrichError, Enricher};
use crate::api::CompletionProvider;
use crate::models::{Company, Enrichment, FieldName};
use crate::retry::RetryPolicy;

const PROMPT_TEMPLATE: &str = r#"
You are an information research and extractor agent for public equities. You will be given a company, find the following information:

Primary Website URL: primary website
Investor Section URL: found on primary website
Latest Corporate Presentation URLs: [list of working URLs of latest presentations listed in the investor section, could be more than one]

Company: {company_name} (Ticker: {ticker})

Answer in the following JSON format:
{
    "primary_website": "https://...",
    "investor_section_url": "https://...",
    "corporate_presentation_urls": [
        "https://...",
        "https://..."
    ]
}

Only return valid, working URLs. If you cannot find certain information, use null for that field.
"#;

/// Investor relations links as the model reports them
#[derive(Debug, Default, PartialEq, Deserialize)]
pub struct InvestorInfo {
    #[serde(default)]
    pub primary_website: Option<String>,
    #[serde(default)]
    pub investor_section_url: Option<String>,
    #[serde(default)]
    pub corporate_presentation_urls: Option<Vec<String>>,
}

pub fn build_prompt(company_name: &str, ticker: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{company_name}", company_name)
        .replace("{ticker}", ticker)
}

/// Parse a model answer, tolerating markdown code fences.
///
/// Returns `None` when the payload is not a JSON object.
pub fn parse_investor_info(response: &str) -> Option<InvestorInfo> {
    let mut text = response.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }

    let value: Value = match serde_json::from_str(text.trim()) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse LLM response as JSON: {}", e);
            debug!("Raw response: {}", response);
            return None;
        }
    };
    if !value.is_object() {
        warn!("LLM response is not a JSON object: {}", value);
        return None;
    }

    match serde_json::from_value(value) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!("LLM response has unexpected field types: {}", e);
            None
        }
    }
}

/// Investor relations research through an LLM with web grounding
pub struct LlmResearchEnricher {
    provider: Arc<dyn CompletionProvider>,
    retry: RetryPolicy,
}

impl LlmResearchEnricher {
    pub fn new(provider: Arc<dyn CompletionProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }
}

#[async_trait]
impl Enricher for LlmResearchEnricher {
    fn name(&self) -> &str {
        "llm_research"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_fields(&self, company: &Company, _symbol: &str) -> Result<Enrichment, EnrichError> {
        let ticker = company.display_ticker();
        let company_name = company.display_name();
        info!("🤖 Researching investor information for {} ({})", company_name, ticker);

        let response = self.provider.complete(&build_prompt(company_name, ticker)).await?;

        let mut fields = Enrichment::new();
        let Some(info) = parse_investor_info(&response) else {
            warn!("Could not extract valid investor information for {}", ticker);
            return Ok(fields);
        };

        let presentations = info.corporate_presentation_urls.unwrap_or_default();
        fields
            .set_opt(FieldName::LlmPrimaryWebsite, info.primary_website)
            .set_opt(FieldName::LlmInvestorSectionUrl, info.investor_section_url)
            .set(FieldName::LlmPresentationsCount, presentations.len())
            .set(FieldName::LlmCorporatePresentations, presentations)
            .set(FieldName::LlmEnrichmentModel, self.provider.model())
            .set(FieldName::LlmLastUpdated, Utc::now().to_rfc3339());

        info!("Extracted investor information for {}", ticker);
        Ok(fields)
    }
}
