use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder};
use url::Url;

use super::{ScrapeResult, ScrapeStatus};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Why one step of a site's request sequence failed.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Parse(String),
}

impl StepError {
    pub fn status(&self) -> ScrapeStatus {
        match self {
            StepError::Network(_) => ScrapeStatus::NetworkError,
            StepError::Parse(_) => ScrapeStatus::ParseError,
        }
    }

    pub fn into_result(self, result: ScrapeResult) -> ScrapeResult {
        let status = self.status();
        result.fail(status, self.to_string())
    }
}

/// Failure counts over a site's repeated requests (days, tables, months).
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestTally {
    pub requested: usize,
    pub network_failed: usize,
    pub parse_failed: usize,
}

impl RequestTally {
    pub fn record(&mut self, error: &StepError) {
        match error {
            StepError::Network(_) => self.network_failed += 1,
            StepError::Parse(_) => self.parse_failed += 1,
        }
    }

    /// Status when no request succeeded. Any parse failure means the layout
    /// changed, which outranks an unreachable site.
    pub fn all_failed(&self) -> Option<ScrapeStatus> {
        if self.requested == 0 || self.network_failed + self.parse_failed < self.requested {
            return None;
        }
        if self.parse_failed > 0 {
            Some(ScrapeStatus::ParseError)
        } else {
            Some(ScrapeStatus::NetworkError)
        }
    }

    /// Records the counters under `{prefix}_requested` and friends.
    pub fn write_diagnostics(&self, result: &mut ScrapeResult, prefix: &str) {
        result.diagnostic(format!("{prefix}_requested"), self.requested);
        result.diagnostic(format!("{prefix}_network_failed"), self.network_failed);
        result.diagnostic(format!("{prefix}_parse_failed"), self.parse_failed);
    }
}

/// Cookie-carrying HTTP session against one reservation site.
pub struct Session {
    client: Client,
    base_url: Url,
}

impl Session {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("failed to construct HTTP client")?;
        let base_url = Url::parse(base_url).with_context(|| format!("invalid base URL {base_url}"))?;
        Ok(Self { client, base_url })
    }

    pub fn url(&self, path: &str) -> Result<Url, StepError> {
        self.base_url
            .join(path)
            .map_err(|e| StepError::Parse(format!("invalid path {path}: {e}")))
    }

    pub async fn get(&self, step: &str, path: &str) -> Result<String, StepError> {
        let url = self.url(path)?;
        self.get_url(step, url).await
    }

    pub async fn get_url(&self, step: &str, url: Url) -> Result<String, StepError> {
        self.send(step, self.client.get(url)).await
    }

    pub async fn post_form(
        &self,
        step: &str,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<String, StepError> {
        let url = self.url(path)?;
        self.send(step, self.client.post(url).form(form)).await
    }

    pub async fn post_multipart(
        &self,
        step: &str,
        path: &str,
        form: Form,
    ) -> Result<String, StepError> {
        let url = self.url(path)?;
        self.send(step, self.client.post(url).multipart(form)).await
    }

    async fn send(&self, step: &str, request: RequestBuilder) -> Result<String, StepError> {
        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| StepError::Network(format!("failed to {step}: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| StepError::Network(format!("failed to read {step} response: {e}")))
    }
}
