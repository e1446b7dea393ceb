//! Enrichers with scripted behaviour

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use equity_pipeline::enrichers::{EnrichError, Enricher};
use equity_pipeline::models::{Company, Enrichment};
use equity_pipeline::retry::RetryPolicy;

/// Always returns the same fields, optionally after a delay
pub struct StubEnricher {
    name: &'static str,
    fields: Enrichment,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StubEnricher {
    pub fn new(name: &'static str, fields: Enrichment) -> Self {
        Self {
            name,
            fields,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for StubEnricher {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_fields(&self, _company: &Company, _symbol: &str) -> Result<Enrichment, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.fields.clone())
    }
}

/// Fails every attempt
pub struct FailingEnricher {
    name: &'static str,
    retry: RetryPolicy,
    pub calls: AtomicUsize,
}

impl FailingEnricher {
    pub fn new(name: &'static str, retry: RetryPolicy) -> Self {
        Self {
            name,
            retry,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for FailingEnricher {
    fn name(&self) -> &str {
        self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn fetch_fields(&self, _company: &Company, _symbol: &str) -> Result<Enrichment, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EnrichError::MissingCredential("SCRIPTED_FAILURE"))
    }
}
