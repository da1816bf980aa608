//! Identity continuity: label the turn as a continuation or a new topic
//!
//! An optional [`AnchorHint`] collaborator can supply the label. It is fully
//! isolated: errors, panics and empty hints all count as "no hint".

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::Result;
use crate::memory::MemorySelectionResult;
use crate::types::{truncate_with_ellipsis, Diagnostics};

/// Source of an explicit topic label for the turn
pub trait AnchorHint: Send + Sync {
    fn hint(&self, message: &str, memory: &MemorySelectionResult) -> Result<Option<String>>;
}

type NoArgsHint = dyn Fn() -> Option<String> + Send + Sync;
type MessageHint = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Wraps anchor extractors that only need part of the context
pub enum AnchorAdapter {
    NoArgs(Box<NoArgsHint>),
    MessageOnly(Box<MessageHint>),
}

impl AnchorHint for AnchorAdapter {
    fn hint(&self, message: &str, _memory: &MemorySelectionResult) -> Result<Option<String>> {
        Ok(match self {
            AnchorAdapter::NoArgs(f) => f(),
            AnchorAdapter::MessageOnly(f) => f(message),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub max_preview_chars: usize,
    /// Characters of the first message line kept in a new-topic label
    pub topic_head_chars: usize,
    pub continuation_label: String,
    pub new_topic_label: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            max_preview_chars: 240,
            topic_head_chars: 24,
            continuation_label: "Continuation of prior context".to_string(),
            new_topic_label: "New topic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityContinuityResult {
    pub topic_label: String,
    pub has_past_context: bool,
    pub anchor_hint: Option<String>,
    pub memory_preview: Option<String>,
    #[serde(default)]
    pub notes: Diagnostics,
}

pub struct IdentityContinuityEngine {
    config: IdentityConfig,
    anchor: Option<Arc<dyn AnchorHint>>,
}

impl IdentityContinuityEngine {
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            anchor: None,
        }
    }

    pub fn with_anchor(mut self, anchor: Arc<dyn AnchorHint>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn evaluate(&self, message: &str, memory: &MemorySelectionResult) -> IdentityContinuityResult {
        let mut notes = Diagnostics::new();
        let anchor_hint = self.anchor_hint(message, memory, &mut notes);
        let has_past_context = memory.has_past_context();
        let memory_preview = self.preview(memory);

        let topic_label = match &anchor_hint {
            Some(hint) => hint.clone(),
            None if has_past_context => self.config.continuation_label.clone(),
            None => self.new_topic_label(message),
        };

        notes.insert("pointer_count".into(), memory.pointers.len().into());
        notes.insert(
            "has_merged_summary".into(),
            memory.merged_summary.is_some().into(),
        );
        tracing::debug!(topic = %topic_label, has_past_context, "identity");

        IdentityContinuityResult {
            topic_label,
            has_past_context,
            anchor_hint,
            memory_preview,
            notes,
        }
    }

    fn anchor_hint(
        &self,
        message: &str,
        memory: &MemorySelectionResult,
        notes: &mut Diagnostics,
    ) -> Option<String> {
        let Some(anchor) = &self.anchor else {
            notes.insert("anchor".into(), "not_provided".into());
            return None;
        };

        let status: String;
        let hint = match catch_unwind(AssertUnwindSafe(|| anchor.hint(message, memory))) {
            Ok(Ok(Some(hint))) if !hint.trim().is_empty() => {
                status = "ok".into();
                Some(hint.trim().to_string())
            }
            Ok(Ok(_)) => {
                status = "empty".into();
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("anchor hint failed: {}", e);
                status = format!("error: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("anchor hint panicked");
                status = "panicked".into();
                None
            }
        };
        notes.insert("anchor".into(), status.into());
        hint
    }

    fn preview(&self, memory: &MemorySelectionResult) -> Option<String> {
        let text = memory.merged_summary.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        Some(truncate_with_ellipsis(text, self.config.max_preview_chars))
    }

    fn new_topic_label(&self, message: &str) -> String {
        let first_line = message.trim().lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            return self.config.new_topic_label.clone();
        }
        format!(
            "{}: {}",
            self.config.new_topic_label,
            truncate_with_ellipsis(first_line, self.config.topic_head_chars)
        )
    }
}

impl Default for IdentityContinuityEngine {
    fn default() -> Self {
        Self::new(IdentityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersonaError;
    use crate::memory::tests::episode;
    use crate::types::MemoryPointer;

    struct FailingAnchor;

    impl AnchorHint for FailingAnchor {
        fn hint(&self, _m: &str, _mem: &MemorySelectionResult) -> Result<Option<String>> {
            Err(PersonaError::Internal("anchor index corrupt".into()))
        }
    }

    struct PanickingAnchor;

    impl AnchorHint for PanickingAnchor {
        fn hint(&self, _m: &str, _mem: &MemorySelectionResult) -> Result<Option<String>> {
            panic!("boom")
        }
    }

    fn with_pointer() -> MemorySelectionResult {
        MemorySelectionResult {
            pointers: vec![MemoryPointer::episodic(&episode("a", "garden", 1), 0.5)],
            merged_summary: Some("[1] garden".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_topic_label_from_first_line() {
        let engine = IdentityContinuityEngine::default();
        let result = engine.evaluate(
            "Planning a trip to the northern coast this summer\nsecond line",
            &MemorySelectionResult::default(),
        );
        assert_eq!(result.topic_label, "New topic: Planning a trip to the n…");
        assert!(!result.has_past_context);
        assert_eq!(result.memory_preview, None);
    }

    #[test]
    fn test_empty_message_label() {
        let engine = IdentityContinuityEngine::default();
        let result = engine.evaluate("   ", &MemorySelectionResult::default());
        assert_eq!(result.topic_label, "New topic");
    }

    #[test]
    fn test_continuation_when_memory_present() {
        let engine = IdentityContinuityEngine::default();
        let result = engine.evaluate("more", &with_pointer());
        assert_eq!(result.topic_label, "Continuation of prior context");
        assert!(result.has_past_context);
        assert_eq!(result.memory_preview.as_deref(), Some("[1] garden"));
    }

    #[test]
    fn test_anchor_hint_takes_priority() {
        let engine = IdentityContinuityEngine::default().with_anchor(Arc::new(
            AnchorAdapter::MessageOnly(Box::new(|m| Some(format!("anchor:{}", m)))),
        ));
        let result = engine.evaluate("x", &with_pointer());
        assert_eq!(result.topic_label, "anchor:x");
        assert_eq!(result.anchor_hint.as_deref(), Some("anchor:x"));
    }

    #[test]
    fn test_failing_anchor_is_ignored() {
        for anchor in [
            Arc::new(FailingAnchor) as Arc<dyn AnchorHint>,
            Arc::new(PanickingAnchor),
            Arc::new(AnchorAdapter::NoArgs(Box::new(|| Some("  ".into())))),
        ] {
            let engine = IdentityContinuityEngine::default().with_anchor(anchor);
            let result = engine.evaluate("hello", &MemorySelectionResult::default());
            assert_eq!(result.anchor_hint, None);
            assert_eq!(result.topic_label, "New topic: hello");
            assert!(result.notes.contains_key("anchor"));
        }
    }

    #[test]
    fn test_preview_is_truncated() {
        let engine = IdentityContinuityEngine::default();
        let memory = MemorySelectionResult {
            merged_summary: Some("a".repeat(500)),
            ..with_pointer()
        };
        let preview = engine.evaluate("x", &memory).memory_preview.unwrap();
        assert_eq!(preview.chars().count(), 241);
        assert!(preview.ends_with('…'));
    }
}
