//! Ambiguity resolution for vague back-references
//!
//! "Let's get back to that thing" says nothing about *which* thing, so when
//! such a marker is present the recall candidates are re-scored against the
//! message on their own and only the closest few survive.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::SimilarityProvider;
use crate::error::{PersonaError, Result};
use crate::types::MemoryPointer;

fn default_markers() -> Vec<String> {
    [
        // English
        "the previous one",
        "previous one",
        "the last one",
        "that thing",
        "that one",
        "that topic",
        "same topic",
        "same thing",
        "as before",
        "where we left off",
        "what we discussed",
        // Japanese
        "それ",
        "あれ",
        "前の",
        "続き",
        "あの件",
        "その話",
        "例のやつ",
        "さっきの",
        "同じ話",
        "この前のやつ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbiguityConfig {
    /// Vague-reference markers. ASCII markers match on word boundaries,
    /// others as plain substrings; both case-insensitive.
    pub markers: Vec<String>,
    pub min_similarity: f32,
    /// Maximum pointers kept after re-ranking
    pub max_resolve: usize,
}

impl Default for AmbiguityConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
            min_similarity: 0.15,
            max_resolve: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    NoAmbiguity,
    Resolved,
    NoRelevantMemory,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionReason::NoAmbiguity => "no ambiguity detected",
            ResolutionReason::Resolved => "ambiguity resolved by semantic reranking",
            ResolutionReason::NoRelevantMemory => "ambiguity detected, no relevant memory",
        }
    }
}

impl std::fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguityResolution {
    pub resolved: Vec<MemoryPointer>,
    pub discarded: Vec<MemoryPointer>,
    pub reason: ResolutionReason,
    /// Marker text that triggered re-ranking, lowercased
    pub matched_marker: Option<String>,
}

impl AmbiguityResolution {
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "reason": self.reason.as_str(),
            "marker": self.matched_marker,
            "resolved": self.resolved.len(),
            "discarded": self.discarded.iter().map(|p| &p.episode_id).collect::<Vec<_>>(),
        })
    }
}

pub struct AmbiguityResolver {
    provider: Arc<SimilarityProvider>,
    config: AmbiguityConfig,
    pattern: Option<Regex>,
}

impl AmbiguityResolver {
    pub fn new(provider: Arc<SimilarityProvider>, config: AmbiguityConfig) -> Result<Self> {
        let pattern = Self::compile(&config.markers)?;
        Ok(Self {
            provider,
            config,
            pattern,
        })
    }

    /// One alternation over all markers, longest first so the reported
    /// marker is the most specific one.
    fn compile(markers: &[String]) -> Result<Option<Regex>> {
        let mut cleaned: Vec<String> = markers
            .iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Ok(None);
        }
        cleaned.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        cleaned.dedup();

        let alternatives: Vec<String> = cleaned
            .iter()
            .map(|m| {
                let escaped = regex::escape(m);
                if m.is_ascii() {
                    format!(r"\b{}\b", escaped)
                } else {
                    escaped
                }
            })
            .collect();

        Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))
            .map(Some)
            .map_err(|e| PersonaError::Config(format!("invalid ambiguity marker: {}", e)))
    }

    /// First vague-reference marker found in the message
    pub fn detect(&self, message: &str) -> Option<String> {
        self.pattern
            .as_ref()?
            .find(message)
            .map(|m| m.as_str().to_lowercase())
    }

    pub fn resolve(&self, message: &str, pointers: Vec<MemoryPointer>) -> AmbiguityResolution {
        let Some(marker) = self.detect(message) else {
            return AmbiguityResolution {
                resolved: pointers,
                discarded: Vec::new(),
                reason: ResolutionReason::NoAmbiguity,
                matched_marker: None,
            };
        };

        let query = self.provider.encode(message);
        let mut rescored: Vec<MemoryPointer> = pointers
            .iter()
            .filter_map(|p| {
                let candidate = self.provider.encode(&p.summary_excerpt);
                let sim = self.provider.similarity(&query, &candidate);
                let sim = if sim.is_finite() { sim } else { 0.0 };
                (sim >= self.config.min_similarity).then(|| p.rescored(sim))
            })
            .collect();

        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.episode_id.cmp(&b.episode_id))
        });
        rescored.truncate(self.config.max_resolve);

        let kept: HashSet<&str> = rescored.iter().map(|p| p.episode_id.as_str()).collect();
        let discarded: Vec<MemoryPointer> = pointers
            .iter()
            .filter(|p| !kept.contains(p.episode_id.as_str()))
            .cloned()
            .collect();

        let reason = if rescored.is_empty() {
            ResolutionReason::NoRelevantMemory
        } else {
            ResolutionReason::Resolved
        };

        tracing::debug!(
            marker = %marker,
            kept = rescored.len(),
            discarded = discarded.len(),
            "ambiguity: {}",
            reason
        );

        AmbiguityResolution {
            resolved: rescored,
            discarded,
            reason,
            matched_marker: Some(marker),
        }
    }
}
