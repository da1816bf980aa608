//! Trait drift: calm / empathy / curiosity

use serde::{Deserialize, Serialize};

use super::{AxisBounds, AxisState, DriftOutcome, DriftStep};
use crate::error::Result;
use crate::identity::IdentityContinuityResult;
use crate::memory::MemorySelectionResult;
use crate::types::{AffectSignal, Diagnostics};

use super::ValueState;

const CALM: usize = 0;
const EMPATHY: usize = 1;
const CURIOSITY: usize = 2;

/// Short-horizon affective dispositions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TraitState {
    pub calm: f32,
    pub empathy: f32,
    pub curiosity: f32,
}

impl AxisState for TraitState {
    const AXES: &'static [&'static str] = &["calm", "empathy", "curiosity"];

    fn values(&self) -> Vec<f32> {
        vec![self.calm, self.empathy, self.curiosity]
    }

    fn from_values(values: &[f32]) -> Self {
        let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
        Self {
            calm: at(CALM),
            empathy: at(EMPATHY),
            curiosity: at(CURIOSITY),
        }
    }
}

fn default_conflict_markers() -> Vec<String> {
    ["conflict", "fight", "problem", "trouble", "argument", "衝突", "トラブル", "喧嘩"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Trait drift tuning. Rule weights are multiplied by `learning_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitDriftConfig {
    pub learning_rate: f32,
    pub decay_rate: f32,
    pub bounds: AxisBounds,
    /// Topic-label substrings that unsettle calm
    pub conflict_markers: Vec<String>,
    pub past_context_calm: f32,
    pub conflict_calm: f32,
    pub many_memories_empathy: f32,
    pub few_memories_empathy: f32,
    pub openness_curiosity: f32,
    pub safety_bias_calm: f32,
    pub safety_bias_curiosity: f32,
    pub tension_calm: f32,
    pub warmth_empathy: f32,
    pub affect_curiosity: f32,
}

impl Default for TraitDriftConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            decay_rate: 0.01,
            bounds: AxisBounds::default(),
            conflict_markers: default_conflict_markers(),
            past_context_calm: 0.3,
            conflict_calm: 0.4,
            many_memories_empathy: 0.4,
            few_memories_empathy: 0.2,
            openness_curiosity: 0.5,
            safety_bias_calm: 0.4,
            safety_bias_curiosity: 0.3,
            tension_calm: 0.5,
            warmth_empathy: 0.6,
            affect_curiosity: 0.7,
        }
    }
}

impl TraitDriftConfig {
    pub fn validate(&self) -> Result<()> {
        self.bounds.validate("traits")?;
        let weights = [
            self.past_context_calm,
            self.conflict_calm,
            self.many_memories_empathy,
            self.few_memories_empathy,
            self.openness_curiosity,
            self.safety_bias_calm,
            self.safety_bias_curiosity,
            self.tension_calm,
            self.warmth_empathy,
            self.affect_curiosity,
        ];
        super::values::check_rates("traits", self.learning_rate, self.decay_rate, &weights)
    }
}

/// Everything trait drift reads for one turn
pub struct TraitInputs<'a> {
    pub memory: &'a MemorySelectionResult,
    pub identity: &'a IdentityContinuityResult,
    /// Value state after this turn's value update
    pub values: &'a ValueState,
    pub affect: Option<&'a AffectSignal>,
}

#[derive(Debug, Clone, Default)]
pub struct TraitDriftEngine {
    config: TraitDriftConfig,
}

impl TraitDriftEngine {
    pub fn new(config: TraitDriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TraitDriftConfig {
        &self.config
    }

    pub fn neutral(&self) -> TraitState {
        TraitState::neutral(&self.config.bounds)
    }

    pub fn apply(&self, current: &TraitState, inputs: &TraitInputs<'_>) -> DriftOutcome<TraitState> {
        let c = &self.config;
        let mut step = DriftStep::begin(current, &c.bounds, c.learning_rate);
        step.decay(c.decay_rate);

        if inputs.identity.has_past_context {
            step.nudge("past_context", CALM, c.past_context_calm);
        }
        let topic = inputs.identity.topic_label.to_lowercase();
        if c
            .conflict_markers
            .iter()
            .any(|m| !m.is_empty() && topic.contains(&m.to_lowercase()))
        {
            step.nudge("conflict_topic", CALM, -c.conflict_calm);
        }

        match inputs.memory.pointers.len() {
            0 => {}
            1 | 2 => step.nudge("memory", EMPATHY, c.few_memories_empathy),
            _ => step.nudge("memory", EMPATHY, c.many_memories_empathy),
        }

        let values = inputs.values;
        if values.openness > 0.0 {
            step.nudge("openness", CURIOSITY, c.openness_curiosity * values.openness);
        }
        if values.safety_bias > 0.0 {
            step.nudge("safety_bias", CALM, c.safety_bias_calm * values.safety_bias);
            step.nudge(
                "safety_bias",
                CURIOSITY,
                -c.safety_bias_curiosity * values.safety_bias,
            );
        }

        if let Some(affect) = inputs.affect.map(AffectSignal::clamped) {
            step.nudge("affect_tension", CALM, -c.tension_calm * affect.tension);
            step.nudge("affect_warmth", EMPATHY, c.warmth_empathy * affect.warmth);
            step.nudge("affect_curiosity", CURIOSITY, c.affect_curiosity * affect.curiosity);
        }

        let mut notes = Diagnostics::new();
        notes.insert("pointer_count".into(), inputs.memory.pointers.len().into());
        notes.insert("affect".into(), serde_json::json!(inputs.affect));
        let outcome = step.finish(notes);
        tracing::debug!(state = ?outcome.new_state, "trait drift");
        outcome
    }
}
