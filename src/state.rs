//! Global state machine: pick the conversational mode for a turn
//!
//! Strict priority: safety, then overload, then reflective need, then normal.
//! [`GlobalState::Silent`] is never chosen here; only a caller override
//! ([`GlobalStateContext::with_override`]) can enter it.

use serde::{Deserialize, Serialize};

use crate::drift::{TraitState, ValueState};
use crate::types::{Diagnostics, SafetyFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalState {
    #[default]
    Normal,
    Reflective,
    Overloaded,
    SafetyLocked,
    Silent,
}

impl GlobalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalState::Normal => "NORMAL",
            GlobalState::Reflective => "REFLECTIVE",
            GlobalState::Overloaded => "OVERLOADED",
            GlobalState::SafetyLocked => "SAFETY_LOCKED",
            GlobalState::Silent => "SILENT",
        }
    }
}

impl std::fmt::Display for GlobalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GlobalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "NORMAL" => Ok(GlobalState::Normal),
            "REFLECTIVE" => Ok(GlobalState::Reflective),
            "OVERLOADED" => Ok(GlobalState::Overloaded),
            "SAFETY_LOCKED" | "SAFETY_LOCK" => Ok(GlobalState::SafetyLocked),
            "SILENT" => Ok(GlobalState::Silent),
            _ => Err(format!("Unknown global state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStateContext {
    pub state: GlobalState,
    /// Whatever the caller carried in from the last turn
    pub previous_state: Option<GlobalState>,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl GlobalStateContext {
    /// Replace the decided state with a caller-chosen one, keeping the trace
    pub fn with_override(mut self, state: GlobalState, reason: &str) -> Self {
        self.reasons.push(format!(
            "override: {} -> {} ({})",
            self.state, state, reason
        ));
        self.diagnostics
            .insert("automatic_state".into(), self.state.as_str().into());
        self.state = state;
        self
    }
}

fn default_analytical_markers() -> Vec<String> {
    [
        "analysis", "analyze", "structure", "reason", "why", "review", "summary", "構造", "整理",
        "まとめ", "振り返り", "考察", "分析", "理由",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalStateConfig {
    pub overload_threshold: f32,
    pub high_safety_bias: f32,
    pub reflective_trigger: f32,
    pub low_calm: f32,
    pub high_calm: f32,
    pub high_curiosity: f32,
    /// Topic-label substrings that suggest an analytical turn
    pub analytical_markers: Vec<String>,
    pub many_pointers_weight: f32,
    pub some_pointers_weight: f32,
    pub few_pointers_weight: f32,
    pub analytical_weight: f32,
    pub high_calm_weight: f32,
    pub low_calm_weight: f32,
    pub high_curiosity_weight: f32,
    pub safety_bias_weight: f32,
    pub stability_weight: f32,
    pub long_message_chars: usize,
    pub long_message_weight: f32,
    pub medium_message_chars: usize,
    pub medium_message_weight: f32,
}

impl Default for GlobalStateConfig {
    fn default() -> Self {
        Self {
            overload_threshold: 0.75,
            high_safety_bias: 0.6,
            reflective_trigger: 1.0,
            low_calm: -0.4,
            high_calm: 0.4,
            high_curiosity: 0.5,
            analytical_markers: default_analytical_markers(),
            many_pointers_weight: 0.7,
            some_pointers_weight: 0.5,
            few_pointers_weight: 0.2,
            analytical_weight: 0.6,
            high_calm_weight: 0.3,
            low_calm_weight: -0.2,
            high_curiosity_weight: 0.3,
            safety_bias_weight: 0.4,
            stability_weight: 0.2,
            long_message_chars: 400,
            long_message_weight: 0.2,
            medium_message_chars: 200,
            medium_message_weight: 0.1,
        }
    }
}

/// Inputs to the reflective-need score
pub struct ReflectiveInputs<'a> {
    pub message: &'a str,
    pub pointer_count: usize,
    pub topic_label: &'a str,
    pub traits: &'a TraitState,
    pub values: &'a ValueState,
}

/// The signals the decision is made from, already normalized
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StateSignals {
    pub safety_flag: SafetyFlag,
    pub safety_bias: f32,
    pub overload_score: Option<f32>,
    pub reflective_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalStateMachine {
    config: GlobalStateConfig,
}

impl GlobalStateMachine {
    pub fn new(config: GlobalStateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GlobalStateConfig {
        &self.config
    }

    /// Weighted sum over pointer count, topic, traits, values and message length
    pub fn reflective_score(&self, inputs: &ReflectiveInputs<'_>) -> f32 {
        let c = &self.config;
        let mut score = match inputs.pointer_count {
            0 => 0.0,
            1 | 2 => c.few_pointers_weight,
            3 | 4 => c.some_pointers_weight,
            _ => c.many_pointers_weight,
        };

        let topic = inputs.topic_label.to_lowercase();
        if c
            .analytical_markers
            .iter()
            .any(|m| !m.is_empty() && topic.contains(&m.to_lowercase()))
        {
            score += c.analytical_weight;
        }

        if inputs.traits.calm >= c.high_calm {
            score += c.high_calm_weight;
        } else if inputs.traits.calm <= c.low_calm {
            score += c.low_calm_weight;
        }
        if inputs.traits.curiosity >= c.high_curiosity {
            score += c.high_curiosity_weight;
        }

        score += inputs.values.safety_bias.max(0.0) * c.safety_bias_weight;
        score += inputs.values.stability.max(0.0) * c.stability_weight;

        let length = inputs.message.chars().count();
        if length >= c.long_message_chars {
            score += c.long_message_weight;
        } else if length >= c.medium_message_chars {
            score += c.medium_message_weight;
        }

        if score.is_finite() {
            score
        } else {
            0.0
        }
    }

    /// Total decision over the normalized signals
    pub fn decide(&self, signals: &StateSignals, previous: Option<GlobalState>) -> GlobalStateContext {
        let c = &self.config;
        let mut reasons = Vec::new();
        let overload = signals.overload_score.filter(|v| v.is_finite());

        let state = if signals.safety_flag.is_raised() {
            reasons.push(format!("safety_flag={} -> SAFETY_LOCKED", signals.safety_flag));
            GlobalState::SafetyLocked
        } else if signals.safety_bias >= c.high_safety_bias {
            reasons.push(format!(
                "safety_bias={:.2} >= {:.2} -> SAFETY_LOCKED",
                signals.safety_bias, c.high_safety_bias
            ));
            GlobalState::SafetyLocked
        } else if let Some(score) = overload.filter(|s| *s >= c.overload_threshold) {
            reasons.push(format!(
                "overload_score={:.2} >= {:.2} -> OVERLOADED",
                score, c.overload_threshold
            ));
            GlobalState::Overloaded
        } else if signals.reflective_score >= c.reflective_trigger {
            reasons.push(format!(
                "reflective_score={:.2} >= {:.2} -> REFLECTIVE",
                signals.reflective_score, c.reflective_trigger
            ));
            GlobalState::Reflective
        } else {
            reasons.push("no trigger -> NORMAL".to_string());
            GlobalState::Normal
        };
        debug_assert_ne!(state, GlobalState::Silent);

        let mut diagnostics = Diagnostics::new();
        diagnostics.insert("reflective_score".into(), serde_json::json!(signals.reflective_score));
        diagnostics.insert("overload_score".into(), serde_json::json!(overload));
        diagnostics.insert("safety_bias".into(), serde_json::json!(signals.safety_bias));

        GlobalStateContext {
            state,
            previous_state: previous,
            reasons,
            diagnostics,
        }
    }

    /// Score reflective need and decide in one call
    pub fn evaluate(
        &self,
        inputs: &ReflectiveInputs<'_>,
        safety_flag: SafetyFlag,
        overload_score: Option<f32>,
        previous: Option<GlobalState>,
    ) -> GlobalStateContext {
        let signals = StateSignals {
            safety_flag,
            safety_bias: inputs.values.safety_bias,
            overload_score,
            reflective_score: self.reflective_score(inputs),
        };
        let ctx = self.decide(&signals, previous);
        tracing::debug!(state = %ctx.state, reasons = ?ctx.reasons, "global state");
        ctx
    }
}
