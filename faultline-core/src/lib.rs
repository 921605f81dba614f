pub mod cache;
pub mod cluster;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod fanout;
pub mod graph;
pub mod localize;
pub mod matcher;
pub mod models;
pub mod onnx_embedder;
pub mod registry;
pub mod similarity;
pub mod store;

pub use cache::CachingBackend;
pub use cluster::{Cluster, CombinedSimilarity};
pub use config::FaultlineConfig;
pub use embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, EmbeddingError, GeminiConfig,
    GeminiEmbeddingClient, OnnxConfig, GEMINI_DIMENSIONS, ONNX_DIMENSIONS,
};
pub use error::FaultlineError;
pub use fanout::{fan_out, FanOutError};
pub use graph::TimelineGraph;
pub use localize::{leaf_failure_records, locate_failures};
pub use matcher::{Assignment, ClusterMatch, ClusterSet, MatchDecision};
pub use onnx_embedder::OnnxEmbeddingClient;
pub use registry::{ClusterRegistry, EmbeddingStore};
pub use similarity::{cosine_similarity, EmbeddingVector};
pub use store::FileStore;
