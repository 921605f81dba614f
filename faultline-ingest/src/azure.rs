//! Azure DevOps build API client
//!
//! Fetches failed builds of one pipeline, their timelines and log blobs.
//! Not-found responses come back as `None`; throttling and server errors are
//! retried with exponential backoff.

use faultline_core::config::AzureConfig;
use faultline_core::models::{BuildSummary, Timeline};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::IngestError;

const API_VERSION: &str = "7.1";

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Clone)]
pub struct AzureDevOpsClient {
    client: Client,
    project_url: String,
    pipeline_id: u64,
    token: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl AzureDevOpsClient {
    /// Build a client, reading the PAT from the env var named by `token_env`.
    pub fn new(config: &AzureConfig) -> Result<Self, IngestError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IngestError::MissingToken(config.token_env.clone()))?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: &AzureConfig, token: String) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            project_url: format!(
                "{}/{}/{}",
                config.base_url.trim_end_matches('/'),
                config.organization,
                config.project
            ),
            pipeline_id: config.pipeline_id,
            token,
            max_retries: 3,
            retry_delay_ms: 500,
        })
    }

    /// Override the retry policy (tests use a zero delay).
    pub fn with_retry(mut self, max_retries: usize, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Most recent failed builds of the configured pipeline, newest first.
    pub async fn list_failed_builds(&self, top: u32) -> Result<Vec<BuildSummary>, IngestError> {
        let url = format!(
            "{}/_apis/build/builds?definitions={}&resultFilter=failed&queryOrder=finishTimeDescending&$top={}&api-version={}",
            self.project_url, self.pipeline_id, top, API_VERSION
        );
        let builds: Option<ListResponse<BuildSummary>> = self.get_json(&url).await?;
        let builds = builds.map(|list| list.value).unwrap_or_default();
        tracing::info!(
            pipeline_id = self.pipeline_id,
            count = builds.len(),
            "Listed failed builds"
        );
        Ok(builds)
    }

    /// `None` when the build has no timeline (yet).
    pub async fn get_timeline(&self, build_id: u64) -> Result<Option<Timeline>, IngestError> {
        let url = format!(
            "{}/_apis/build/builds/{}/timeline?api-version={}",
            self.project_url, build_id, API_VERSION
        );
        self.get_json(&url).await
    }

    /// Full text of one log blob; `None` when it does not exist.
    pub async fn get_log(&self, build_id: u64, log_id: u64) -> Result<Option<String>, IngestError> {
        let url = format!(
            "{}/_apis/build/builds/{}/logs/{}?api-version={}",
            self.project_url, build_id, log_id, API_VERSION
        );
        self.get_text(&url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, IngestError> {
        match self.get_text(url).await? {
            Some(body) if !body.trim().is_empty() => Ok(Some(serde_json::from_str(&body)?)),
            _ => Ok(None),
        }
    }

    async fn get_text(&self, url: &str) -> Result<Option<String>, IngestError> {
        let strategy = ExponentialBackoff::from_millis(self.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(strategy, || self.get_once(url), |e: &IngestError| {
            let transient = e.is_transient();
            if transient {
                tracing::warn!(url, error = %e, "Transient build API error, retrying");
            }
            transient
        })
        .await
    }

    async fn get_once(&self, url: &str) -> Result<Option<String>, IngestError> {
        let response = self
            .client
            .get(url)
            .basic_auth("", Some(&self.token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(url, "Build API resource not found");
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IngestError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Some(response.text().await?))
    }
}
