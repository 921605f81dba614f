use thiserror::Error;

use crate::embeddings::EmbeddingError;

#[derive(Error, Debug)]
pub enum FaultlineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The descriptor stored under `key` names a different cluster.
    #[error("Cluster descriptor stored as '{key}' is named '{found}'")]
    DescriptorNameMismatch { key: String, found: String },

    /// A cluster references a job whose embedding is not in the store.
    #[error("No embedding stored for build {build_id} job {job_id}")]
    MissingEmbedding { build_id: u64, job_id: String },

    /// The embedding file stored for `expected` was written for another job.
    #[error("Embedding stored for {expected} belongs to {found}")]
    EmbeddingMismatch { expected: String, found: String },

    /// Name cannot be used as a store key (empty, path separators, `..`).
    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("Cluster already exists: {0}")]
    DuplicateCluster(String),
}
