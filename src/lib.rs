//! Persona - per-turn state orchestration for conversational agents
//!
//! Each user turn runs memory recall and merging, identity continuity,
//! bounded value and trait drift, and a global mode state machine, then
//! asks a responder for a reply shaped by the resulting mode.

pub mod config;
pub mod controller;
pub mod drift;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod memory;
pub mod state;
pub mod storage;
pub mod types;

pub use config::PersonaConfig;
pub use controller::{PersonaController, Responder, SessionRegistry, TurnOutput};
pub use drift::{TraitState, ValueState};
pub use error::{PersonaError, Result};
pub use state::{GlobalState, GlobalStateContext};
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
