//! Value drift: stability / openness / safety_bias / user_alignment
//!
//! Slower than trait drift. Reads the prior trait state, never the one
//! being produced this turn.

use serde::{Deserialize, Serialize};

use super::{AxisBounds, AxisState, DriftOutcome, DriftStep, TraitState};
use crate::error::{PersonaError, Result};
use crate::identity::IdentityContinuityResult;
use crate::memory::MemorySelectionResult;
use crate::types::{AffectSignal, Diagnostics, SafetyFlag};

const STABILITY: usize = 0;
const OPENNESS: usize = 1;
const SAFETY_BIAS: usize = 2;
const USER_ALIGNMENT: usize = 3;

/// Long-horizon dispositions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueState {
    pub stability: f32,
    pub openness: f32,
    pub safety_bias: f32,
    pub user_alignment: f32,
}

impl AxisState for ValueState {
    const AXES: &'static [&'static str] = &["stability", "openness", "safety_bias", "user_alignment"];

    fn values(&self) -> Vec<f32> {
        vec![self.stability, self.openness, self.safety_bias, self.user_alignment]
    }

    fn from_values(values: &[f32]) -> Self {
        let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
        Self {
            stability: at(STABILITY),
            openness: at(OPENNESS),
            safety_bias: at(SAFETY_BIAS),
            user_alignment: at(USER_ALIGNMENT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueDriftConfig {
    pub learning_rate: f32,
    pub decay_rate: f32,
    pub bounds: AxisBounds,
    /// Multiplied by the flag severity
    pub safety_flag_bias: f32,
    pub safety_flag_stability: f32,
    pub past_context_stability: f32,
    pub many_memories_alignment: f32,
    pub few_memories_alignment: f32,
    pub reward_alignment: f32,
    pub reward_openness: f32,
    pub low_calm_stability: f32,
    pub empathy_alignment: f32,
    pub tension_safety_bias: f32,
    /// Messages at least this many characters count as long
    pub long_message_chars: usize,
    pub long_message_openness: f32,
}

impl Default for ValueDriftConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.005,
            decay_rate: 0.005,
            bounds: AxisBounds::default(),
            safety_flag_bias: 0.8,
            safety_flag_stability: 0.2,
            past_context_stability: 0.3,
            many_memories_alignment: 0.3,
            few_memories_alignment: 0.15,
            reward_alignment: 0.5,
            reward_openness: 0.2,
            low_calm_stability: 0.2,
            empathy_alignment: 0.2,
            tension_safety_bias: 0.3,
            long_message_chars: 400,
            long_message_openness: 0.1,
        }
    }
}

impl ValueDriftConfig {
    pub fn validate(&self) -> Result<()> {
        self.bounds.validate("values")?;
        let weights = [
            self.safety_flag_bias,
            self.safety_flag_stability,
            self.past_context_stability,
            self.many_memories_alignment,
            self.few_memories_alignment,
            self.reward_alignment,
            self.reward_openness,
            self.low_calm_stability,
            self.empathy_alignment,
            self.tension_safety_bias,
            self.long_message_openness,
        ];
        check_rates("values", self.learning_rate, self.decay_rate, &weights)
    }
}

/// Shared sanity checks for drift tuning
pub(crate) fn check_rates(name: &str, learning_rate: f32, decay_rate: f32, weights: &[f32]) -> Result<()> {
    if !(learning_rate.is_finite() && learning_rate > 0.0 && learning_rate <= 1.0) {
        return Err(PersonaError::Config(format!(
            "{}: learning_rate must be in (0, 1], got {}",
            name, learning_rate
        )));
    }
    if !(decay_rate.is_finite() && decay_rate > 0.0 && decay_rate <= 1.0) {
        return Err(PersonaError::Config(format!(
            "{}: decay_rate must be in (0, 1], got {}",
            name, decay_rate
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || w.abs() > 1.0) {
        return Err(PersonaError::Config(format!(
            "{}: rule weights must be finite and at most 1.0 in magnitude, got {}",
            name, w
        )));
    }
    Ok(())
}

/// Everything value drift reads for one turn
pub struct ValueInputs<'a> {
    pub message: &'a str,
    pub memory: &'a MemorySelectionResult,
    pub identity: &'a IdentityContinuityResult,
    /// Trait state from before this turn
    pub traits: &'a TraitState,
    pub safety_flag: SafetyFlag,
    /// Feedback for the previous reply, in [-1, 1]
    pub reward: Option<f32>,
    pub affect: Option<&'a AffectSignal>,
}

#[derive(Debug, Clone, Default)]
pub struct ValueDriftEngine {
    config: ValueDriftConfig,
}

impl ValueDriftEngine {
    pub fn new(config: ValueDriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValueDriftConfig {
        &self.config
    }

    pub fn neutral(&self) -> ValueState {
        ValueState::neutral(&self.config.bounds)
    }

    pub fn apply(&self, current: &ValueState, inputs: &ValueInputs<'_>) -> DriftOutcome<ValueState> {
        let c = &self.config;
        let mut step = DriftStep::begin(current, &c.bounds, c.learning_rate);
        step.decay(c.decay_rate);

        if inputs.safety_flag.is_raised() {
            let severity = inputs.safety_flag.severity();
            step.nudge("safety_flag", SAFETY_BIAS, c.safety_flag_bias * severity);
            step.nudge("safety_flag", STABILITY, -c.safety_flag_stability * severity);
        }

        if inputs.identity.has_past_context {
            step.nudge("past_context", STABILITY, c.past_context_stability);
        }

        match inputs.memory.pointers.len() {
            0 => {}
            1 | 2 => step.nudge("memory", USER_ALIGNMENT, c.few_memories_alignment),
            _ => step.nudge("memory", USER_ALIGNMENT, c.many_memories_alignment),
        }

        if let Some(reward) = inputs.reward.filter(|r| r.is_finite()) {
            let reward = reward.clamp(-1.0, 1.0);
            step.nudge("reward", USER_ALIGNMENT, c.reward_alignment * reward);
            step.nudge("reward", OPENNESS, c.reward_openness * reward);
        }

        let traits = inputs.traits;
        if traits.calm < 0.0 {
            step.nudge("low_calm", STABILITY, c.low_calm_stability * traits.calm);
        }
        if traits.empathy > 0.0 {
            step.nudge("empathy", USER_ALIGNMENT, c.empathy_alignment * traits.empathy);
        }

        if let Some(affect) = inputs.affect.map(AffectSignal::clamped) {
            if affect.tension > 0.0 {
                step.nudge("affect_tension", SAFETY_BIAS, c.tension_safety_bias * affect.tension);
            }
        }

        let length = inputs.message.chars().count();
        if length >= c.long_message_chars {
            step.nudge("long_message", OPENNESS, c.long_message_openness);
        }

        let mut notes = Diagnostics::new();
        notes.insert("safety_flag".into(), inputs.safety_flag.as_str().into());
        notes.insert("reward".into(), serde_json::json!(inputs.reward));
        notes.insert("message_chars".into(), length.into());
        let outcome = step.finish(notes);
        tracing::debug!(state = ?outcome.new_state, "value drift");
        outcome
    }
}
