//! ONNX embedding backend: local inference via `all-MiniLM-L6-v2`
//!
//! Uses the `ort` crate for ONNX Runtime and `tokenizers` for WordPiece
//! tokenization. Log text is usually far longer than the model's window, so
//! the token stream is split into windows of `max_chunk_tokens`, each window
//! is mean-pooled, and the window vectors are averaged and L2-normalized.

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::embeddings::{EmbeddingBackend, EmbeddingError, OnnxConfig};

/// Local ONNX embedding client using `all-MiniLM-L6-v2`.
pub struct OnnxEmbeddingClient {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    dimensions: usize,
    max_chunk_tokens: usize,
}

impl std::fmt::Debug for OnnxEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingClient")
            .field("dimensions", &self.dimensions)
            .field("max_chunk_tokens", &self.max_chunk_tokens)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingClient {
    /// Create a new ONNX embedding client.
    ///
    /// Loads the ONNX model and tokenizer from the paths specified in `config`.
    /// Returns `EmbeddingError::ModelNotFound` if either file is missing.
    pub fn new(config: OnnxConfig) -> Result<Self, EmbeddingError> {
        if !config.model_path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.model_path.display().to_string(),
            });
        }
        if !config.tokenizer_path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.tokenizer_path.display().to_string(),
            });
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&config.model_path))
            .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

        let mut tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        // Chunking needs the full token stream.
        tokenizer
            .with_truncation(None)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions: config.dimensions,
            max_chunk_tokens: config.max_chunk_tokens.max(1),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        // ONNX inference is CPU-bound; run on the blocking thread pool.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let dimensions = self.dimensions;
        let max_chunk_tokens = self.max_chunk_tokens;
        let text = text.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Vec<f32>>, EmbeddingError> {
            let encoding = tokenizer
                .encode(text.as_str(), false)
                .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
            let ids = encoding.get_ids();
            if ids.is_empty() {
                return Ok(None);
            }

            let mut session_guard = session
                .lock()
                .map_err(|e| EmbeddingError::OnnxInference(format!("session lock poisoned: {e}")))?;

            let mut chunk_vectors = Vec::new();
            for window in token_windows(ids, max_chunk_tokens) {
                let ids = with_special_tokens(&tokenizer, window);
                chunk_vectors.push(embed_tokens(&mut session_guard, &ids, dimensions)?);
            }

            Ok(average_and_normalize(&chunk_vectors))
        })
        .await
        .map_err(|e| EmbeddingError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Split token ids into windows that leave room for `[CLS]` and `[SEP]`.
fn token_windows(ids: &[u32], max_chunk_tokens: usize) -> std::slice::Chunks<'_, u32> {
    ids.chunks(max_chunk_tokens.saturating_sub(2).max(1))
}

fn with_special_tokens(tokenizer: &tokenizers::Tokenizer, window: &[u32]) -> Vec<i64> {
    let cls = tokenizer.token_to_id("[CLS]");
    let sep = tokenizer.token_to_id("[SEP]");

    cls.into_iter()
        .chain(window.iter().copied())
        .chain(sep)
        .map(i64::from)
        .collect()
}

/// Run ONNX inference for one window and mean-pool the last hidden state.
fn embed_tokens(
    session: &mut Session,
    input_ids: &[i64],
    expected_dims: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let seq_len = input_ids.len();
    let shape = vec![1i64, seq_len as i64];
    let attention_mask = vec![1i64; seq_len];
    let token_type_ids = vec![0i64; seq_len];

    let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.to_vec()))
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;
    let attention_mask_tensor = Tensor::from_array((shape.clone(), attention_mask))
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;
    let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    let inputs = ort::inputs! {
        "input_ids" => input_ids_tensor,
        "attention_mask" => attention_mask_tensor,
        "token_type_ids" => token_type_ids_tensor,
    };

    let outputs = session
        .run(inputs)
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    // Expected shape: [1, seq_len, hidden_dim]
    let (out_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    if out_shape.len() != 3 {
        return Err(EmbeddingError::OnnxInference(format!(
            "Expected 3D output, got {}D",
            out_shape.len()
        )));
    }
    let out_seq_len = out_shape[1] as usize;
    let hidden_dim = out_shape[2] as usize;

    if hidden_dim != expected_dims {
        return Err(EmbeddingError::InvalidDimensions {
            expected: expected_dims,
            actual: hidden_dim,
        });
    }

    let tokens: Vec<&[f32]> = data.chunks(hidden_dim).take(out_seq_len).collect();
    Ok(mean(&tokens))
}

fn mean<V: AsRef<[f32]>>(vectors: &[V]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f32; first.as_ref().len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.as_ref()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    sum.iter_mut().for_each(|x| *x /= n);
    sum
}

/// Average the window vectors and L2-normalize. `None` for no windows.
fn average_and_normalize(chunks: &[Vec<f32>]) -> Option<Vec<f32>> {
    if chunks.is_empty() {
        return None;
    }
    let mut pooled = mean(chunks);
    let norm: f32 = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut pooled {
            *v /= norm;
        }
    }
    Some(pooled)
}

/// Resolve the default model directory.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("faultline/models")
}

/// Resolve paths for the ONNX model and tokenizer.
///
/// If `onnx_model_path` from config is empty, uses the default location.
pub fn resolve_onnx_paths(onnx_model_path: &str) -> (PathBuf, PathBuf) {
    if onnx_model_path.is_empty() {
        let dir = default_model_dir();
        (
            dir.join("all-MiniLM-L6-v2.onnx"),
            dir.join("all-MiniLM-L6-v2-tokenizer.json"),
        )
    } else {
        let model = PathBuf::from(onnx_model_path);
        let stem = model
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let tokenizer = model.with_file_name(format!("{stem}-tokenizer.json"));
        (model, tokenizer)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::ONNX_DIMENSIONS;

    #[test]
    fn test_model_not_found_returns_error() {
        let config = OnnxConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tokenizer_path: PathBuf::from("/nonexistent/tokenizer.json"),
            dimensions: ONNX_DIMENSIONS,
            max_chunk_tokens: 256,
        };

        match OnnxEmbeddingClient::new(config) {
            Err(EmbeddingError::ModelNotFound { path }) => {
                assert!(path.contains("nonexistent"), "path was: {path}");
            }
            other => panic!("Expected ModelNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn test_token_windows_reserve_special_tokens() {
        let ids: Vec<u32> = (0..10).collect();
        let windows: Vec<&[u32]> = token_windows(&ids, 6).collect();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], &[0, 1, 2, 3]);
        assert_eq!(windows[2], &[8, 9]);
    }

    #[test]
    fn test_token_windows_never_empty_width() {
        let ids: Vec<u32> = (0..3).collect();
        assert_eq!(token_windows(&ids, 1).count(), 3);
    }

    #[test]
    fn test_average_and_normalize() {
        let chunks = vec![vec![2.0, 0.0], vec![0.0, 2.0]];
        let pooled = average_and_normalize(&chunks).unwrap();
        let expected = 1.0 / 2f32.sqrt();
        assert!((pooled[0] - expected).abs() < 1e-6);
        assert!((pooled[1] - expected).abs() < 1e-6);
        assert!(average_and_normalize(&[]).is_none());
    }

    #[test]
    fn test_default_model_dir_contains_faultline() {
        let dir = default_model_dir();
        assert!(
            dir.to_string_lossy().contains("faultline/models"),
            "Expected faultline/models in path, got: {}",
            dir.display()
        );
    }

    #[test]
    fn test_resolve_onnx_paths_custom() {
        let (model, tokenizer) = resolve_onnx_paths("/opt/models/custom.onnx");
        assert_eq!(model, PathBuf::from("/opt/models/custom.onnx"));
        assert_eq!(tokenizer, PathBuf::from("/opt/models/custom-tokenizer.json"));
    }
}
