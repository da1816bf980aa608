//! Candidate recall: rank recent episodes against the current message
//!
//! Score = cosine(message, episode summary) + recency bonus. The bonus is
//! derived from each episode's timestamp rank rather than its position in
//! the backend response, so the selected set does not depend on the order
//! the backend returns episodes in.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use super::MemoryBackend;
use crate::embedding::SimilarityProvider;
use crate::types::{Episode, MemoryPointer};

/// Configuration for candidate recall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Ceiling on episodes read from the backend per turn
    pub fetch_limit: usize,
    /// Maximum pointers returned
    pub top_k: usize,
    /// Scores below this are dropped
    pub min_score: f32,
    pub use_recency_bias: bool,
    /// Bonus given to the newest episode; older ones get a linear fraction of it
    pub recency_weight: f32,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 50,
            top_k: 5,
            min_score: 0.12,
            use_recency_bias: true,
            recency_weight: 0.03,
        }
    }
}

/// Result of one recall pass, with counts for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecallOutcome {
    pub pointers: Vec<MemoryPointer>,
    pub fetched: usize,
    pub above_threshold: usize,
    /// Backend error that was degraded to an empty result
    pub error: Option<String>,
}

impl RecallOutcome {
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "fetched": self.fetched,
            "above_threshold": self.above_threshold,
            "selected": self.pointers.len(),
            "error": self.error,
        })
    }
}

pub struct CandidateRecall {
    provider: Arc<SimilarityProvider>,
    config: RecallConfig,
}

impl CandidateRecall {
    pub fn new(provider: Arc<SimilarityProvider>, config: RecallConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    /// Fetch recent episodes and rank them. A backend failure yields an
    /// empty pointer list.
    pub fn recall(&self, backend: &dyn MemoryBackend, message: &str) -> RecallOutcome {
        let episodes = match backend.fetch_recent(self.config.fetch_limit) {
            Ok(eps) => eps,
            Err(e) => {
                tracing::warn!("recall: backend fetch failed, continuing without memory: {}", e);
                return RecallOutcome {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let fetched = episodes.len();
        let query = self.provider.encode(message);
        let (pointers, above_threshold) = self.rank(&query, &episodes);

        tracing::debug!(fetched, above_threshold, selected = pointers.len(), "recall");

        RecallOutcome {
            pointers,
            fetched,
            above_threshold,
            error: None,
        }
    }

    /// Score, sort, threshold and cut to top-K.
    ///
    /// Returns the pointers and the number of candidates that cleared the threshold.
    pub fn rank(&self, query: &[f32], episodes: &[Episode]) -> (Vec<MemoryPointer>, usize) {
        if episodes.is_empty() {
            return (Vec::new(), 0);
        }

        // rank_from_oldest by timestamp, ties by id
        let mut by_age: Vec<usize> = (0..episodes.len()).collect();
        by_age.sort_by(|&a, &b| {
            episodes[a]
                .timestamp
                .cmp(&episodes[b].timestamp)
                .then_with(|| episodes[a].id.cmp(&episodes[b].id))
        });
        let mut age_rank = vec![0usize; episodes.len()];
        for (rank, &idx) in by_age.iter().enumerate() {
            age_rank[idx] = rank;
        }

        let total = episodes.len() as f32;
        let mut scored: Vec<MemoryPointer> = episodes
            .iter()
            .enumerate()
            .map(|(idx, episode)| {
                let mut score = self.similarity_to(query, episode);
                if self.config.use_recency_bias {
                    score += self.config.recency_weight * (age_rank[idx] + 1) as f32 / total;
                }
                if !score.is_finite() {
                    score = 0.0;
                }
                MemoryPointer::episodic(episode, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.episode_id.cmp(&b.episode_id))
        });

        let mut seen = HashSet::new();
        let above: Vec<MemoryPointer> = scored
            .into_iter()
            .filter(|p| p.score >= self.config.min_score)
            .filter(|p| seen.insert(p.episode_id.clone()))
            .collect();
        let above_threshold = above.len();

        (
            above.into_iter().take(self.config.top_k).collect(),
            above_threshold,
        )
    }

    /// Stored vector when it matches the query dimension, else the encoded summary
    fn similarity_to(&self, query: &[f32], episode: &Episode) -> f32 {
        match &episode.vector {
            Some(v) if v.len() == query.len() && !v.is_empty() => {
                self.provider.similarity(query, v)
            }
            _ => {
                let v = self.provider.encode(&episode.summary);
                self.provider.similarity(query, &v)
            }
        }
    }
}
