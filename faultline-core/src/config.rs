use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::embeddings::EmbeddingTask;
use crate::fanout::DEFAULT_CONCURRENCY;

#[derive(Debug, Deserialize, Clone)]
pub struct FaultlineConfig {
    pub service: ServiceConfig,
    pub azure: AzureConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
    pub store_root: String,
}

impl ServiceConfig {
    /// Store root with `~` and `$VARS` expanded.
    pub fn store_path(&self) -> PathBuf {
        match shellexpand::full(&self.store_root) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(e) => {
                tracing::warn!(
                    store_root = %self.store_root,
                    error = %e,
                    "Failed to expand store root, using it verbatim"
                );
                PathBuf::from(&self.store_root)
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AzureConfig {
    pub organization: String,
    pub project: String,
    pub pipeline_id: u64,
    #[serde(default = "default_azure_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_max_builds")]
    pub max_builds: u32,
}

fn default_azure_base_url() -> String {
    "https://dev.azure.com".to_string()
}

fn default_token_env() -> String {
    "AZURE_DEVOPS_TOKEN".to_string()
}

fn default_max_builds() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub backend: String,
    pub gemini_model: String,
    pub gemini_dimensions: u32,
    #[serde(default)]
    pub gemini_task: EmbeddingTask,
    #[serde(default)]
    pub onnx_model_path: String,
    pub onnx_dimensions: u32,
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_max_chunk_tokens() -> usize {
    256
}

fn default_cache_capacity() -> usize {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    /// Combined similarity at or above which a failure is auto-assignable.
    pub threshold: f64,
    /// Worker limit for store fan-out.
    pub concurrency: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl FaultlineConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("FAULTLINE").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
