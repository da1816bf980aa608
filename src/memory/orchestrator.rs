//! Memory orchestrator: recall -> ambiguity -> merge
//!
//! The only component that talks to the [`MemoryBackend`] during a turn.
//! Every backend failure degrades the result instead of failing the turn.

use serde::Serialize;
use std::sync::Arc;

use super::{
    AmbiguityConfig, AmbiguityResolver, CandidateRecall, EpisodeMerger, MemoryBackend,
    MergeConfig, RecallConfig,
};
use crate::embedding::SimilarityProvider;
use crate::error::{PersonaError, Result};
use crate::types::{Diagnostics, Episode, EpisodeId, MemoryPointer};

/// What the memory pipeline hands to the rest of the turn
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemorySelectionResult {
    pub pointers: Vec<MemoryPointer>,
    pub merged_summary: Option<String>,
    pub diagnostics: Diagnostics,
}

impl MemorySelectionResult {
    pub fn has_past_context(&self) -> bool {
        !self.pointers.is_empty()
    }
}

pub struct MemoryOrchestrator {
    backend: Arc<dyn MemoryBackend>,
    recall: CandidateRecall,
    resolver: AmbiguityResolver,
    merger: EpisodeMerger,
}

impl MemoryOrchestrator {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        provider: Arc<SimilarityProvider>,
        recall: RecallConfig,
        ambiguity: AmbiguityConfig,
        merge: MergeConfig,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            recall: CandidateRecall::new(provider.clone(), recall),
            resolver: AmbiguityResolver::new(provider, ambiguity)?,
            merger: EpisodeMerger::new(merge),
        })
    }

    /// Run the selection pipeline for one message
    pub fn select(&self, message: &str) -> MemorySelectionResult {
        let mut diagnostics = Diagnostics::new();

        let recalled = self.recall.recall(self.backend.as_ref(), message);
        diagnostics.insert("recall".into(), recalled.diagnostics());
        if recalled.pointers.is_empty() {
            diagnostics.insert("info".into(), "no memory pointers selected by recall".into());
            return MemorySelectionResult {
                diagnostics,
                ..Default::default()
            };
        }

        let resolution = self.resolver.resolve(message, recalled.pointers);
        diagnostics.insert("ambiguity".into(), resolution.diagnostics());
        if resolution.resolved.is_empty() {
            diagnostics.insert(
                "info".into(),
                "ambiguity resolved but no relevant memory left".into(),
            );
            return MemorySelectionResult {
                diagnostics,
                ..Default::default()
            };
        }

        let ids: Vec<EpisodeId> = resolution
            .resolved
            .iter()
            .map(|p| p.episode_id.clone())
            .collect();
        let episodes = match self.backend.fetch_by_ids(&ids) {
            Ok(eps) => eps,
            Err(e) => {
                tracing::warn!("merge: fetch_by_ids failed, merging from excerpts: {}", e);
                diagnostics.insert("fetch_error".into(), e.to_string().into());
                Vec::new()
            }
        };

        let merged = self.merger.merge(&resolution.resolved, &episodes);
        diagnostics.insert("merge".into(), merged.diagnostics());

        MemorySelectionResult {
            pointers: merged.used_pointers,
            merged_summary: merged.summary,
            diagnostics,
        }
    }

    /// Append turn episodes after the turn is decided.
    ///
    /// Returns the failures instead of stopping at the first one.
    pub fn record(&self, episodes: Vec<Episode>) -> Vec<PersonaError> {
        episodes
            .into_iter()
            .filter_map(|episode| {
                let id = episode.id.clone();
                self.backend.append(episode).err().map(|e| {
                    tracing::warn!(episode_id = %id, "episode append failed: {}", e);
                    e
                })
            })
            .collect()
    }
}
