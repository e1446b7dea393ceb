//! Google Gemini `generateContent` client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{build_http_client, ensure_success, ApiError, ApiRateLimiter, ApiResult, CompletionProvider};

const PROVIDER: &str = "Gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

/// Grounds answers in Google Search so returned URLs are live
#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    rate_limiter: ApiRateLimiter,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> ApiResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, model)
    }

    pub fn with_base_url(base_url: &str, api_key: &str, model: &str) -> ApiResult<Self> {
        Ok(Self {
            client: build_http_client("equity-pipeline/1.0")?,
            base_url: Url::parse(base_url)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            rate_limiter: ApiRateLimiter::per_minute(60),
        })
    }
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    async fn complete(&self, prompt: &str) -> ApiResult<String> {
        let url = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            tools: vec![Tool {
                google_search: GoogleSearch {},
            }],
        };

        self.rate_limiter.wait().await;
        debug!("Sending {} character prompt to {}", prompt.len(), self.model);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let data: GenerateContentResponse = ensure_success(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let text: String = data
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .map(|parts| parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ApiError::Decode {
                provider: PROVIDER,
                message: "response contained no text".to_string(),
            });
        }
        Ok(text)
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
