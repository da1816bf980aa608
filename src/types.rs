//! Core types shared by every pipeline stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PersonaError, Result};
use crate::state::GlobalState;

/// Unique identifier for an episode
pub type EpisodeId = String;

/// Free-form, JSON-shaped observability data attached to pipeline results
pub type Diagnostics = HashMap<String, serde_json::Value>;

/// Maximum characters of an episode summary carried on a [`MemoryPointer`]
pub const POINTER_EXCERPT_CHARS: usize = 200;

/// Who produced the text an episode was recorded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// An immutable entry of the episodic memory log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique identifier
    pub id: EpisodeId,
    /// When the episode was recorded
    pub timestamp: DateTime<Utc>,
    /// Short summary, used as the semantic source for recall
    pub summary: String,
    /// Full text of the turn side this episode records
    pub body: String,
    /// Precomputed summary vector, if the writer had one
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    /// Which side of the conversation produced the episode
    #[serde(default)]
    pub role: Role,
    /// Session the episode was recorded in
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Episode {
    /// Build a fresh episode from turn text, stamping id and time
    pub fn record(role: Role, session_id: &str, text: &str, summary_chars: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            summary: truncate_chars(text.trim(), summary_chars),
            body: text.to_string(),
            vector: None,
            role,
            session_id: Some(session_id.to_string()),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// A scored reference to a stored episode (not the episode content itself)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPointer {
    pub episode_id: EpisodeId,
    /// Where the pointer came from, e.g. "episodic"
    pub source_tag: String,
    pub score: f32,
    /// At most [`POINTER_EXCERPT_CHARS`] characters of the episode summary
    pub summary_excerpt: String,
}

impl MemoryPointer {
    pub fn episodic(episode: &Episode, score: f32) -> Self {
        Self {
            episode_id: episode.id.clone(),
            source_tag: "episodic".to_string(),
            score,
            summary_excerpt: truncate_chars(&episode.summary, POINTER_EXCERPT_CHARS),
        }
    }

    /// Same pointer with a replaced score
    pub fn rescored(&self, score: f32) -> Self {
        Self {
            score,
            ..self.clone()
        }
    }
}

/// Safety escalation reported by an upstream moderation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyFlag {
    #[default]
    None,
    Escalated,
    Blocked,
    Intervened,
}

impl SafetyFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyFlag::None => "none",
            SafetyFlag::Escalated => "escalated",
            SafetyFlag::Blocked => "blocked",
            SafetyFlag::Intervened => "intervened",
        }
    }

    /// Whether the flag forces a safety lock
    pub fn is_raised(&self) -> bool {
        !matches!(self, SafetyFlag::None)
    }

    /// Relative weight used by value drift (0.0 - 1.0)
    pub fn severity(&self) -> f32 {
        match self {
            SafetyFlag::None => 0.0,
            SafetyFlag::Intervened => 0.6,
            SafetyFlag::Escalated => 0.8,
            SafetyFlag::Blocked => 1.0,
        }
    }
}

impl std::fmt::Display for SafetyFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SafetyFlag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(SafetyFlag::None),
            "escalated" => Ok(SafetyFlag::Escalated),
            "blocked" => Ok(SafetyFlag::Blocked),
            "intervened" => Ok(SafetyFlag::Intervened),
            _ => Err(format!("Unknown safety flag: {}", s)),
        }
    }
}

/// External affect signal in canonical form, every channel in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AffectSignal {
    #[serde(default)]
    pub tension: f32,
    #[serde(default)]
    pub warmth: f32,
    #[serde(default)]
    pub curiosity: f32,
}

impl AffectSignal {
    /// Normalize a loosely-shaped map of named floats.
    ///
    /// Unknown names are ignored, non-finite values are dropped, and every
    /// channel is clamped to [-1, 1].
    pub fn from_map(map: &HashMap<String, f64>) -> Self {
        let read = |name: &str| -> f32 {
            map.get(name)
                .copied()
                .filter(|v| v.is_finite())
                .map(|v| (v as f32).clamp(-1.0, 1.0))
                .unwrap_or(0.0)
        };
        Self {
            tension: read("tension"),
            warmth: read("warmth"),
            curiosity: read("curiosity"),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.tension == 0.0 && self.warmth == 0.0 && self.curiosity == 0.0
    }

    /// Every channel clamped to [-1, 1]; non-finite channels become 0
    pub fn clamped(&self) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            tension: clamp(self.tension),
            warmth: clamp(self.warmth),
            curiosity: clamp(self.curiosity),
        }
    }
}

/// Truncate to at most `max` characters (not bytes)
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Truncate to `max` characters, appending an ellipsis marker when cut
pub fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut = truncate_chars(text, max).trim_end().to_string();
    cut.push('…');
    cut
}

/// Validated turn input in canonical form
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnInput {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    pub safety_flag: SafetyFlag,
    /// In [0, 1]
    pub overload_score: Option<f32>,
    pub affect: Option<AffectSignal>,
    /// Feedback on the previous reply, in [-1, 1]
    pub reward: Option<f32>,
    /// Caller-chosen mode that replaces the automatic decision
    pub mode_override: Option<GlobalState>,
}

impl TurnInput {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_safety_flag(mut self, flag: SafetyFlag) -> Self {
        self.safety_flag = flag;
        self
    }

    pub fn with_overload(mut self, score: f32) -> Self {
        self.overload_score = Some(score);
        self
    }

    pub fn with_affect(mut self, affect: AffectSignal) -> Self {
        self.affect = Some(affect);
        self
    }

    pub fn with_reward(mut self, reward: f32) -> Self {
        self.reward = Some(reward);
        self
    }

    pub fn with_mode_override(mut self, state: GlobalState) -> Self {
        self.mode_override = Some(state);
        self
    }

    /// Identifiers must be present; numeric signals must be usable
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() || self.session_id.trim().is_empty() {
            return Err(PersonaError::InvalidInput(
                "user_id and session_id are required".into(),
            ));
        }
        let finite = |v: Option<f32>| v.map_or(true, f32::is_finite);
        if !finite(self.overload_score) || !finite(self.reward) {
            return Err(PersonaError::InvalidInput(
                "overload_score and reward must be finite".into(),
            ));
        }
        if let Some(affect) = &self.affect {
            if ![affect.tension, affect.warmth, affect.curiosity]
                .iter()
                .all(|v| v.is_finite())
            {
                return Err(PersonaError::InvalidInput(
                    "affect channels must be finite".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Reward as callers send it: a bare number or an object holding one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawReward {
    Scalar(f64),
    Object {
        #[serde(alias = "reward", alias = "score")]
        value: f64,
    },
}

impl RawReward {
    pub fn value(&self) -> f64 {
        match self {
            RawReward::Scalar(v) | RawReward::Object { value: v } => *v,
        }
    }
}

/// Turn input as it arrives from outside the core (JSON, CLI)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTurnInput {
    pub user_id: String,
    pub session_id: String,
    #[serde(alias = "message_text")]
    pub message: String,
    #[serde(default)]
    pub safety_flag: Option<String>,
    #[serde(default)]
    pub overload_score: Option<f64>,
    #[serde(default)]
    pub affect_signal: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub reward: Option<RawReward>,
    #[serde(default)]
    pub mode_override: Option<String>,
}

impl RawTurnInput {
    /// Normalize into a [`TurnInput`].
    ///
    /// Unknown flag or mode names are rejected. Non-finite numbers are
    /// dropped and the rest clamped into range.
    pub fn normalize(self) -> Result<TurnInput> {
        let safety_flag = match self.safety_flag.as_deref() {
            Some(raw) => raw.parse().map_err(PersonaError::InvalidInput)?,
            None => SafetyFlag::None,
        };
        let mode_override = match self.mode_override.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(raw) => Some(raw.parse().map_err(PersonaError::InvalidInput)?),
        };
        let overload_score = self
            .overload_score
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0) as f32);
        let reward = self
            .reward
            .map(|r| r.value())
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(-1.0, 1.0) as f32);
        let affect = self
            .affect_signal
            .filter(|m| !m.is_empty())
            .map(|m| AffectSignal::from_map(&m));

        let input = TurnInput {
            user_id: self.user_id.trim().to_string(),
            session_id: self.session_id.trim().to_string(),
            message: self.message,
            safety_flag,
            overload_score,
            affect,
            reward,
            mode_override,
        };
        input.validate()?;
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("こんにちは世界", 5), "こんにちは");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello…");
        assert_eq!(truncate_with_ellipsis("hello", 5), "hello");
    }

    #[test]
    fn test_safety_flag_parse() {
        assert_eq!("Blocked".parse::<SafetyFlag>(), Ok(SafetyFlag::Blocked));
        assert_eq!("".parse::<SafetyFlag>(), Ok(SafetyFlag::None));
        assert!("panic".parse::<SafetyFlag>().is_err());
        assert!(!SafetyFlag::None.is_raised());
        assert!(SafetyFlag::Intervened.is_raised());
    }

    #[test]
    fn test_affect_normalization() {
        let mut map = HashMap::new();
        map.insert("tension".to_string(), 3.0);
        map.insert("warmth".to_string(), f64::NAN);
        map.insert("curiosity".to_string(), -0.25);
        map.insert("unknown".to_string(), 1.0);

        let affect = AffectSignal::from_map(&map);
        assert_eq!(affect.tension, 1.0);
        assert_eq!(affect.warmth, 0.0);
        assert_eq!(affect.curiosity, -0.25);
        assert!(AffectSignal::default().is_zero());
    }

    #[test]
    fn test_pointer_excerpt_bounded() {
        let text = "x".repeat(500);
        let episode = Episode::record(Role::User, "s1", &text, 400);
        let pointer = MemoryPointer::episodic(&episode, 0.5);
        assert_eq!(pointer.summary_excerpt.chars().count(), POINTER_EXCERPT_CHARS);
        assert_eq!(pointer.source_tag, "episodic");
    }

    #[test]
    fn test_raw_input_normalization() {
        let raw: RawTurnInput = serde_json::from_str(
            r#"{
                "user_id": " alice ",
                "session_id": "s1",
                "message_text": "hi",
                "safety_flag": "Escalated",
                "overload_score": 7.5,
                "affect_signal": {"tension": 0.4},
                "reward": {"score": -2.0},
                "mode_override": "silent"
            }"#,
        )
        .unwrap();
        let input = raw.normalize().unwrap();
        assert_eq!(input.user_id, "alice");
        assert_eq!(input.message, "hi");
        assert_eq!(input.safety_flag, SafetyFlag::Escalated);
        assert_eq!(input.overload_score, Some(1.0));
        assert_eq!(input.affect.unwrap().tension, 0.4);
        assert_eq!(input.reward, Some(-1.0));
        assert_eq!(input.mode_override, Some(GlobalState::Silent));
    }

    #[test]
    fn test_raw_input_rejects_bad_values() {
        let missing_user = RawTurnInput {
            session_id: "s".into(),
            message: "hi".into(),
            ..Default::default()
        };
        assert!(matches!(
            missing_user.normalize(),
            Err(PersonaError::InvalidInput(_))
        ));

        let bad_flag = RawTurnInput {
            user_id: "u".into(),
            session_id: "s".into(),
            safety_flag: Some("maybe".into()),
            ..Default::default()
        };
        assert!(bad_flag.normalize().is_err());

        let nan_overload = RawTurnInput {
            user_id: "u".into(),
            session_id: "s".into(),
            overload_score: Some(f64::NAN),
            reward: Some(RawReward::Scalar(0.5)),
            ..Default::default()
        };
        let input = nan_overload.normalize().unwrap();
        assert_eq!(input.overload_score, None);
        assert_eq!(input.reward, Some(0.5));
    }

    #[test]
    fn test_affect_clamped_and_validated() {
        let wild = AffectSignal {
            tension: 500.0,
            warmth: -3.0,
            curiosity: f32::NAN,
        };
        let c = wild.clamped();
        assert_eq!((c.tension, c.warmth, c.curiosity), (1.0, -1.0, 0.0));

        assert!(TurnInput::new("u", "s", "hi").with_affect(wild).validate().is_err());
        let loud = AffectSignal {
            tension: 500.0,
            ..Default::default()
        };
        assert!(TurnInput::new("u", "s", "hi").with_affect(loud).validate().is_ok());
    }
}
