//! Text embedding backends
//!
//! Failure text becomes a fixed-length vector through an `EmbeddingBackend`.
//! Two backends exist: the hosted Gemini `embedContent` endpoint and a local
//! ONNX sentence encoder (see `onnx_embedder`). Identical text must embed to
//! identical vectors because `cache::CachingBackend` memoizes by text.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Output size requested from Gemini unless configured otherwise
pub const GEMINI_DIMENSIONS: usize = 768;

/// Width of the all-MiniLM-L6-v2 sentence encoder
pub const ONNX_DIMENSIONS: usize = 384;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// `Ok(None)` when there was nothing to embed, such as blank text.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError>;

    /// Length of every vector this backend returns.
    fn dimensions(&self) -> usize;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding API returned {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("No Gemini API key configured (set GOOGLE_API_KEY)")]
    MissingApiKey,

    #[error("Embedding request still failing after {attempts} retries")]
    RetryExhausted { attempts: usize },

    #[error("ONNX model not found at {path}; download all-MiniLM-L6-v2 into the model directory")]
    ModelNotFound { path: String },

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),
}

/// Gemini `taskType` hint. Selected by `embedding.gemini_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmbeddingTask {
    #[default]
    #[serde(alias = "semantic_similarity")]
    SemanticSimilarity,
    #[serde(alias = "clustering")]
    Clustering,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub task: EmbeddingTask,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GeminiConfig {
    /// Falls back to `GOOGLE_API_KEY` when no key is given.
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        Self {
            api_key: api_key
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
                .unwrap_or_default(),
            model,
            dimensions,
            task: EmbeddingTask::default(),
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimensions: usize,
    /// Token window size; longer texts are embedded per window and averaged.
    pub max_chunk_tokens: usize,
}

pub enum BackendConfig {
    Gemini(GeminiConfig),
    Onnx(OnnxConfig),
}

pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    let backend: Box<dyn EmbeddingBackend> = match config {
        BackendConfig::Gemini(c) => Box::new(GeminiEmbeddingClient::new(c)?),
        BackendConfig::Onnx(c) => Box::new(crate::onnx_embedder::OnnxEmbeddingClient::new(c)?),
    };
    tracing::info!(backend = backend.name(), dimensions = backend.dimensions(), "Embedding backend ready");
    Ok(backend)
}

/// Translate the `[embedding]` section into a backend choice.
pub fn backend_config_from(
    config: &crate::config::EmbeddingConfig,
) -> Result<BackendConfig, EmbeddingError> {
    match config.backend.as_str() {
        "onnx" => {
            let (model_path, tokenizer_path) =
                crate::onnx_embedder::resolve_onnx_paths(&config.onnx_model_path);
            Ok(BackendConfig::Onnx(OnnxConfig {
                model_path,
                tokenizer_path,
                dimensions: config.onnx_dimensions as usize,
                max_chunk_tokens: config.max_chunk_tokens,
            }))
        }
        "gemini" => {
            let mut gemini = GeminiConfig::new(
                None,
                config.gemini_model.clone(),
                config.gemini_dimensions as usize,
            );
            gemini.task = config.gemini_task;
            Ok(BackendConfig::Gemini(gemini))
        }
        other => Err(EmbeddingError::UnknownBackend(other.to_string())),
    }
}

// Wire types of models/{model}:embedContent

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: EmbeddingTask,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
}

/// Prefer the structured `{"error": {...}}` body; fall back to the raw text.
fn api_error(status: StatusCode, body: String) -> EmbeddingError {
    match serde_json::from_str::<ApiErrorBody>(&body).ok().and_then(|b| b.error) {
        Some(detail) => EmbeddingError::Api {
            code: detail.code,
            message: detail.message,
        },
        None => EmbeddingError::Api {
            code: status.as_u16(),
            message: body,
        },
    }
}

#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    config: GeminiConfig,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: GeminiConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    /// Point the client at another host, e.g. a mock server.
    pub fn with_base_url(config: GeminiConfig, base_url: String) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
            config,
            base_url,
        })
    }

    /// Embed `text`, retrying with jittered exponential backoff.
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let backoff = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        Retry::spawn(backoff, || self.request_embedding(text))
            .await
            .map_err(|last| {
                tracing::error!(
                    model = %self.config.model,
                    attempts = self.config.max_retries,
                    error = %last,
                    "Gemini embedding gave up"
                );
                EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                }
            })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );
        let body = EmbedContentRequest {
            model: format!("models/{}", self.config.model),
            content: Content {
                parts: [Part { text }],
            },
            task_type: self.config.task,
            output_dimensionality: self.config.dimensions,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let err = api_error(status, response.text().await.unwrap_or_default());
            tracing::warn!(error = %err, "Gemini embedContent failed");
            return Err(err);
        }

        let values = response.json::<EmbedContentResponse>().await?.embedding.values;
        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.embed_raw(text).await.map(Some)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
