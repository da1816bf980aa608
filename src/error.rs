//! Error types for the persona core

use thiserror::Error;

/// Result type alias for persona operations
pub type Result<T> = std::result::Result<T, PersonaError>;

/// Main error type for the persona core
#[derive(Error, Debug)]
pub enum PersonaError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Memory backend error: {0}")]
    Backend(String),

    #[error("Snapshot store error: {0}")]
    Snapshot(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A collaborator was asked for structured output and returned something unparsable.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, raw: String },

    #[error("Responder error: {0}")]
    Responder(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PersonaError {
    /// Failures of an external collaborator (similarity, backend, store).
    ///
    /// These are degraded to empty/neutral values inside a turn and never
    /// surface as a turn-level error.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            PersonaError::Database(_)
                | PersonaError::Io(_)
                | PersonaError::Embedding(_)
                | PersonaError::Backend(_)
                | PersonaError::Snapshot(_)
        )
    }

    /// Raw payload attached to a malformed collaborator response, if any
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            PersonaError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Short machine-readable kind, used in turn diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            PersonaError::Database(_) => "database",
            PersonaError::Serialization(_) => "serialization",
            PersonaError::Io(_) => "io",
            PersonaError::Embedding(_) => "embedding",
            PersonaError::Backend(_) => "backend",
            PersonaError::Snapshot(_) => "snapshot",
            PersonaError::InvalidInput(_) => "invalid_input",
            PersonaError::Config(_) => "config",
            PersonaError::MalformedResponse { .. } => "malformed_response",
            PersonaError::Responder(_) => "responder",
            PersonaError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_classification() {
        assert!(PersonaError::Backend("down".into()).is_collaborator_failure());
        assert!(PersonaError::Embedding("timeout".into()).is_collaborator_failure());
        assert!(!PersonaError::InvalidInput("x".into()).is_collaborator_failure());
        assert!(!PersonaError::MalformedResponse {
            message: "bad json".into(),
            raw: "{".into()
        }
        .is_collaborator_failure());
    }

    #[test]
    fn test_raw_payload_kept() {
        let err = PersonaError::MalformedResponse {
            message: "missing reply field".into(),
            raw: "{\"text\": 1}".into(),
        };
        assert_eq!(err.raw_payload(), Some("{\"text\": 1}"));
        assert_eq!(err.kind(), "malformed_response");
    }
}
