//! Aggregate configuration
//!
//! Every tunable constant of the pipeline lives in one of the per-component
//! structs below. Missing fields take their defaults, so a config file only
//! needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::controller::{ControllerConfig, ResponseConfig};
use crate::drift::{TraitDriftConfig, ValueDriftConfig};
use crate::embedding::EmbeddingConfig;
use crate::error::{PersonaError, Result};
use crate::identity::IdentityConfig;
use crate::memory::{AmbiguityConfig, MergeConfig, RecallConfig};
use crate::state::GlobalStateConfig;

/// Upper bound on episodes fetched per turn; recall scores all of them in memory
pub const MAX_FETCH_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub embedding: EmbeddingConfig,
    pub recall: RecallConfig,
    pub ambiguity: AmbiguityConfig,
    pub merge: MergeConfig,
    pub identity: IdentityConfig,
    pub traits: TraitDriftConfig,
    pub values: ValueDriftConfig,
    pub global_state: GlobalStateConfig,
    pub response: ResponseConfig,
    pub controller: ControllerConfig,
}

impl PersonaConfig {
    /// Load from a JSON file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: PersonaConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(PersonaError::Config(
                "embedding.dimensions must be positive".into(),
            ));
        }

        let recall = &self.recall;
        if recall.top_k == 0 || recall.fetch_limit == 0 {
            return Err(PersonaError::Config(
                "recall.top_k and recall.fetch_limit must be positive".into(),
            ));
        }
        if recall.fetch_limit > MAX_FETCH_LIMIT {
            return Err(PersonaError::Config(format!(
                "recall.fetch_limit must be at most {}, got {}",
                MAX_FETCH_LIMIT, recall.fetch_limit
            )));
        }
        if !recall.min_score.is_finite() || !recall.recency_weight.is_finite() {
            return Err(PersonaError::Config(
                "recall.min_score and recall.recency_weight must be finite".into(),
            ));
        }

        let ambiguity = &self.ambiguity;
        if ambiguity.max_resolve == 0 || ambiguity.max_resolve > recall.top_k {
            return Err(PersonaError::Config(format!(
                "ambiguity.max_resolve must be in 1..={} (recall.top_k), got {}",
                recall.top_k, ambiguity.max_resolve
            )));
        }
        if !ambiguity.min_similarity.is_finite() {
            return Err(PersonaError::Config(
                "ambiguity.min_similarity must be finite".into(),
            ));
        }

        if self.merge.max_summary_chars == 0 {
            return Err(PersonaError::Config(
                "merge.max_summary_chars must be positive".into(),
            ));
        }

        self.traits.validate()?;
        self.values.validate()?;

        let gs = &self.global_state;
        let thresholds = [
            gs.overload_threshold,
            gs.high_safety_bias,
            gs.reflective_trigger,
            gs.low_calm,
            gs.high_calm,
            gs.high_curiosity,
        ];
        if thresholds.iter().any(|t| !t.is_finite()) {
            return Err(PersonaError::Config(
                "global_state thresholds must be finite".into(),
            ));
        }
        if gs.low_calm >= gs.high_calm {
            return Err(PersonaError::Config(
                "global_state.low_calm must be below global_state.high_calm".into(),
            ));
        }

        Ok(())
    }
}
