//! Memoized embeddings keyed by exact text
//!
//! Issue messages repeat heavily across builds, so each run wraps its backend
//! in a `CachingBackend`. The cache is owned by the caller and bounded; when
//! full, an arbitrary entry is evicted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::embeddings::{EmbeddingBackend, EmbeddingError};

/// Bounded text → embedding map.
#[derive(Debug)]
pub struct EmbeddingCache {
    capacity: usize,
    entries: HashMap<String, Option<Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, text: &str) -> Option<&Option<Vec<f32>>> {
        self.entries.get(text)
    }

    /// Insert, evicting an arbitrary entry first when at capacity. A zero
    /// capacity disables caching.
    pub fn insert(&mut self, text: String, embedding: Option<Vec<f32>>) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&text) && self.entries.len() >= self.capacity {
            if let Some(victim) = self.entries.keys().next().cloned() {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(text, embedding);
    }
}

/// Wraps a backend and memoizes its results.
///
/// Concurrent misses for the same text may both reach the inner backend;
/// determinism of the backend makes that harmless.
pub struct CachingBackend {
    inner: Arc<dyn EmbeddingBackend>,
    cache: Mutex<EmbeddingCache>,
    hits: std::sync::atomic::AtomicUsize,
}

impl CachingBackend {
    pub fn new(inner: Arc<dyn EmbeddingBackend>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(EmbeddingCache::new(capacity)),
            hits: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lookup(&self, text: &str) -> Option<Option<Vec<f32>>> {
        match self.cache.lock() {
            Ok(cache) => cache.get(text).cloned(),
            Err(e) => {
                tracing::warn!(error = %e, "Embedding cache lock poisoned, bypassing cache");
                None
            }
        }
    }
}

#[async_trait]
impl EmbeddingBackend for CachingBackend {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if let Some(cached) = self.lookup(text) {
            self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok(cached);
        }

        let embedding = self.inner.embed(text).await?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(text.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
