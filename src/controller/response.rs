//! Mode-aware response generation
//!
//! The [`Responder`] is the language-model collaborator. The generator
//! decides per global state whether it is called at all and what it is
//! asked, then validates what comes back.

use serde::{Deserialize, Serialize};

use crate::drift::{TraitState, ValueState};
use crate::error::{PersonaError, Result};
use crate::identity::IdentityContinuityResult;
use crate::memory::MemorySelectionResult;
use crate::state::{GlobalState, GlobalStateContext};
use crate::types::truncate_with_ellipsis;

/// Everything a responder may look at for one turn
pub struct ResponseRequest<'a> {
    /// Mode preface (if any) followed by the possibly shortened message
    pub prompt: String,
    pub message: &'a str,
    pub format: ReplyFormat,
    pub global_state: &'a GlobalStateContext,
    pub memory: &'a MemorySelectionResult,
    pub identity: &'a IdentityContinuityResult,
    pub traits: &'a TraitState,
    pub values: &'a ValueState,
}

/// Produces the reply text for a turn
pub trait Responder: Send + Sync {
    fn respond(&self, request: &ResponseRequest<'_>) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    /// Responder output is the reply
    #[default]
    Text,
    /// Responder must return `{"reply": "..."}`
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub format: ReplyFormat,
    /// Call the responder (with a preface) even when safety-locked
    pub safety_lock_passthrough: bool,
    pub safety_lock_message: String,
    pub safety_preface: String,
    pub reflective_preface: String,
    pub overloaded_preface: String,
    /// Reply for SILENT turns; the responder is not called
    pub silent_message: String,
    pub fallback_reply: String,
    /// Message characters forwarded in REFLECTIVE and OVERLOADED modes
    pub max_length_hint_chars: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            format: ReplyFormat::Text,
            safety_lock_passthrough: false,
            safety_lock_message:
                "I can't continue with this topic. If you are in danger, please contact local emergency services."
                    .to_string(),
            safety_preface: "[mode: safety] Respond cautiously and avoid harmful detail.".to_string(),
            reflective_preface: "[mode: reflective] Step back and respond in a structured, considered way."
                .to_string(),
            overloaded_preface: "[mode: overloaded] Keep the reply short and focus on one point.".to_string(),
            silent_message: String::new(),
            fallback_reply: "I'm unable to respond right now.".to_string(),
            max_length_hint_chars: 600,
        }
    }
}

/// Pull the reply out of a `{"reply": "..."}` payload
pub fn parse_structured_reply(raw: &str) -> Result<String> {
    let malformed = |message: String| PersonaError::MalformedResponse {
        message,
        raw: raw.to_string(),
    };

    let value: serde_json::Value = serde_json::from_str(raw.trim())
        .map_err(|e| malformed(format!("reply is not JSON: {}", e)))?;
    let reply = value
        .get("reply")
        .ok_or_else(|| malformed("missing \"reply\" field".to_string()))?
        .as_str()
        .ok_or_else(|| malformed("\"reply\" is not a string".to_string()))?;
    Ok(reply.to_string())
}

pub struct ResponseGenerator {
    responder: std::sync::Arc<dyn Responder>,
    config: ResponseConfig,
}

impl ResponseGenerator {
    pub fn new(responder: std::sync::Arc<dyn Responder>, config: ResponseConfig) -> Self {
        Self { responder, config }
    }

    pub fn config(&self) -> &ResponseConfig {
        &self.config
    }

    /// Reply for the decided state. Errors are the responder's or a
    /// malformed payload; the caller chooses the fallback.
    pub fn generate(
        &self,
        message: &str,
        global_state: &GlobalStateContext,
        memory: &MemorySelectionResult,
        identity: &IdentityContinuityResult,
        traits: &TraitState,
        values: &ValueState,
    ) -> Result<String> {
        let c = &self.config;
        let preface = match global_state.state {
            GlobalState::Silent => return Ok(c.silent_message.clone()),
            GlobalState::SafetyLocked if !c.safety_lock_passthrough => {
                return Ok(c.safety_lock_message.clone())
            }
            GlobalState::SafetyLocked => Some(c.safety_preface.as_str()),
            GlobalState::Reflective => Some(c.reflective_preface.as_str()),
            GlobalState::Overloaded => Some(c.overloaded_preface.as_str()),
            GlobalState::Normal => None,
        };

        let prompt = match preface {
            Some(preface) => format!(
                "{}\n\n{}",
                preface,
                truncate_with_ellipsis(message, c.max_length_hint_chars)
            ),
            None => message.to_string(),
        };

        let request = ResponseRequest {
            prompt,
            message,
            format: c.format,
            global_state,
            memory,
            identity,
            traits,
            values,
        };
        let raw = self.responder.respond(&request)?;

        match c.format {
            ReplyFormat::Json => parse_structured_reply(&raw),
            ReplyFormat::Text => Ok(raw.trim().to_string()),
        }
    }
}

/// Offline responder that reflects the prompt back, tagged with the mode
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn respond(&self, request: &ResponseRequest<'_>) -> Result<String> {
        let text = format!(
            "({}) {}",
            request.global_state.state,
            truncate_with_ellipsis(request.message.trim(), 160)
        );
        Ok(match request.format {
            ReplyFormat::Text => text,
            ReplyFormat::Json => serde_json::json!({ "reply": text }).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{GlobalStateMachine, StateSignals};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Returns a canned payload and remembers the prompt it saw
    struct Scripted {
        payload: String,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(payload: &str) -> Arc<Self> {
            Arc::new(Self {
                payload: payload.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Responder for Scripted {
        fn respond(&self, request: &ResponseRequest<'_>) -> Result<String> {
            self.seen.lock().push(request.prompt.clone());
            Ok(self.payload.clone())
        }
    }

    fn ctx(state: GlobalState) -> GlobalStateContext {
        GlobalStateMachine::default()
            .decide(&StateSignals::default(), None)
            .with_override(state, "test")
    }

    fn generate(generator: &ResponseGenerator, message: &str, state: GlobalState) -> Result<String> {
        generator.generate(
            message,
            &ctx(state),
            &MemorySelectionResult::default(),
            &IdentityContinuityResult::default(),
            &TraitState::default(),
            &ValueState::default(),
        )
    }

    #[test]
    fn test_normal_passes_message_through() {
        let responder = Scripted::new("  hello back  ");
        let generator = ResponseGenerator::new(responder.clone(), ResponseConfig::default());
        let reply = generate(&generator, "hello", GlobalState::Normal).unwrap();
        assert_eq!(reply, "hello back");
        assert_eq!(responder.seen.lock()[0], "hello");
    }

    #[test]
    fn test_silent_and_locked_skip_responder() {
        let responder = Scripted::new("should not be used");
        let generator = ResponseGenerator::new(responder.clone(), ResponseConfig::default());

        assert_eq!(generate(&generator, "hi", GlobalState::Silent).unwrap(), "");
        let locked = generate(&generator, "hi", GlobalState::SafetyLocked).unwrap();
        assert_eq!(locked, ResponseConfig::default().safety_lock_message);
        assert!(responder.seen.lock().is_empty());
    }

    #[test]
    fn test_overloaded_prefaces_and_truncates() {
        let responder = Scripted::new("ok");
        let generator = ResponseGenerator::new(
            responder.clone(),
            ResponseConfig {
                max_length_hint_chars: 10,
                ..Default::default()
            },
        );
        generate(&generator, &"a".repeat(50), GlobalState::Overloaded).unwrap();
        let prompt = responder.seen.lock()[0].clone();
        assert!(prompt.starts_with("[mode: overloaded]"));
        assert!(prompt.ends_with(&format!("{}…", "a".repeat(10))));
    }

    #[test]
    fn test_json_format_requires_reply_field() {
        let config = ResponseConfig {
            format: ReplyFormat::Json,
            ..Default::default()
        };
        let ok = ResponseGenerator::new(Scripted::new(r#"{"reply": "structured"}"#), config.clone());
        assert_eq!(generate(&ok, "hi", GlobalState::Normal).unwrap(), "structured");

        let bad = ResponseGenerator::new(Scripted::new("plain words"), config);
        match generate(&bad, "hi", GlobalState::Normal) {
            Err(PersonaError::MalformedResponse { raw, .. }) => assert_eq!(raw, "plain words"),
            other => panic!("expected malformed response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_structured_reply_errors() {
        assert!(parse_structured_reply(r#"{"text": "x"}"#).is_err());
        assert!(parse_structured_reply(r#"{"reply": 3}"#).is_err());
    }

    #[test]
    fn test_echo_responder_json_round_trips() {
        let generator = ResponseGenerator::new(
            Arc::new(EchoResponder),
            ResponseConfig {
                format: ReplyFormat::Json,
                ..Default::default()
            },
        );
        let reply = generate(&generator, "ping", GlobalState::Reflective).unwrap();
        assert_eq!(reply, "(REFLECTIVE) ping");
    }
}
