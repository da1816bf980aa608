//! Similarity provider
//!
//! Two layers:
//! - [`Embedder`]: the raw, fallible text -> vector collaborator
//! - [`SimilarityProvider`]: what the pipeline calls. Its `encode` never
//!   fails (zero vector of the last-known dimension on error) and its
//!   `similarity` is total (0.0 for mismatched/empty/zero-norm vectors)
//!
//! Summary vectors are cached so recall does not re-encode the same recent
//! episodes every turn. Failures are never retried.

mod cache;
mod tfidf;

pub use cache::{EmbeddingCache, EmbeddingCacheStats};
pub use tfidf::TfIdfEmbedder;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{PersonaError, Result};

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimensions
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Embedding model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model to use. Only the offline "tfidf" model ships with the crate;
    /// other embedders are injected through [`SimilarityProvider::new`].
    pub model: String,
    pub dimensions: usize,
    /// Entries kept in the summary-vector cache (0 disables it)
    pub cache_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "tfidf".to_string(),
            dimensions: 384,
            cache_entries: 1024,
        }
    }
}

/// Create an embedder from configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        "tfidf" => Ok(Arc::new(TfIdfEmbedder::new(config.dimensions))),
        other => Err(PersonaError::Config(format!(
            "Unknown embedding model: '{}'. Use 'tfidf' or inject a custom Embedder",
            other
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() {
        sim
    } else {
        0.0
    }
}

/// Infallible encode/similarity facade over an [`Embedder`]
pub struct SimilarityProvider {
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    last_dimensions: AtomicUsize,
}

impl SimilarityProvider {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_cache(embedder, EmbeddingCache::default())
    }

    pub fn with_cache(embedder: Arc<dyn Embedder>, cache: EmbeddingCache) -> Self {
        let dims = embedder.dimensions();
        Self {
            embedder,
            cache,
            last_dimensions: AtomicUsize::new(dims),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let embedder = create_embedder(config)?;
        Ok(Self::with_cache(
            embedder,
            EmbeddingCache::new(config.cache_entries),
        ))
    }

    /// Encode, surfacing the embedder error. Successful vectors are cached
    /// and update the last-known dimension.
    pub fn try_encode(&self, text: &str) -> Result<Arc<[f32]>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit);
        }
        let vector: Arc<[f32]> = self.embedder.embed(text)?.into();
        self.last_dimensions.store(vector.len(), Ordering::Relaxed);
        self.cache.put(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Encode without failing: a zero vector of the last-known dimension
    /// stands in for any embedder error.
    pub fn encode(&self, text: &str) -> Arc<[f32]> {
        match self.try_encode(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    model = self.embedder.model_name(),
                    "encode failed, using zero vector: {}",
                    e
                );
                vec![0.0_f32; self.dimensions()].into()
            }
        }
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    /// Last dimension observed from the embedder
    pub fn dimensions(&self) -> usize {
        self.last_dimensions.load(Ordering::Relaxed)
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn cache_stats(&self) -> EmbeddingCacheStats {
        self.cache.stats()
    }
}
