//! Persona controller: the per-turn sequencer
//!
//! Fixed order per turn:
//! memory -> identity -> value drift -> trait drift -> global state ->
//! response -> write-back.
//!
//! The controller owns the only mutable copy of a session's trait state,
//! value state and previous global state, behind one mutex held for the
//! whole turn, so turns of the same session never interleave.

mod registry;
mod response;

pub use registry::{ControllerFactory, SessionKey, SessionRegistry};
pub use response::{
    parse_structured_reply, EchoResponder, ReplyFormat, Responder, ResponseConfig,
    ResponseGenerator, ResponseRequest,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::config::PersonaConfig;
use crate::drift::{
    AxisState, DriftOutcome, TraitDriftEngine, TraitInputs, TraitState, ValueDriftEngine,
    ValueInputs, ValueState,
};
use crate::embedding::SimilarityProvider;
use crate::error::{PersonaError, Result};
use crate::identity::{AnchorHint, IdentityContinuityEngine, IdentityContinuityResult};
use crate::memory::{MemoryBackend, MemoryOrchestrator, MemorySelectionResult};
use crate::state::{GlobalState, GlobalStateContext, GlobalStateMachine, ReflectiveInputs};
use crate::storage::{SnapshotKind, SnapshotStore, StateSnapshot};
use crate::types::{Diagnostics, Episode, Role, TurnInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Summary length of the episodes recorded for each turn
    pub episode_summary_chars: usize,
    pub record_episodes: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            episode_summary_chars: 120,
            record_episodes: true,
        }
    }
}

/// A state vector together with the change this turn applied to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport<S> {
    pub state: S,
    pub delta: BTreeMap<String, f32>,
}

impl<S> From<DriftOutcome<S>> for StateReport<S> {
    fn from(outcome: DriftOutcome<S>) -> Self {
        Self {
            state: outcome.new_state,
            delta: outcome.delta,
        }
    }
}

/// Everything a turn produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutput {
    pub reply_text: String,
    pub global_state: GlobalStateContext,
    pub traits: StateReport<TraitState>,
    pub values: StateReport<ValueState>,
    pub identity: IdentityContinuityResult,
    pub memory: MemorySelectionResult,
    pub diagnostics: Diagnostics,
    /// 1-based turn number within this controller's lifetime
    pub turn: u64,
}

/// Read-only view of a session's current state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionView {
    pub traits: TraitState,
    pub values: ValueState,
    pub previous_state: Option<GlobalState>,
    pub turns: u64,
}

struct SessionState {
    traits: TraitState,
    values: ValueState,
    previous_state: Option<GlobalState>,
    turns: u64,
}

pub struct PersonaController {
    user_id: String,
    session_id: String,
    provider: Arc<SimilarityProvider>,
    memory: MemoryOrchestrator,
    identity: IdentityContinuityEngine,
    value_engine: ValueDriftEngine,
    trait_engine: TraitDriftEngine,
    fsm: GlobalStateMachine,
    responses: ResponseGenerator,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    config: ControllerConfig,
    session: Mutex<SessionState>,
}

/// Assembles a [`PersonaController`] from its collaborators
pub struct PersonaControllerBuilder {
    user_id: String,
    session_id: String,
    backend: Arc<dyn MemoryBackend>,
    responder: Arc<dyn Responder>,
    config: PersonaConfig,
    provider: Option<Arc<SimilarityProvider>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    anchor: Option<Arc<dyn AnchorHint>>,
}

impl PersonaControllerBuilder {
    pub fn config(mut self, config: PersonaConfig) -> Self {
        self.config = config;
        self
    }

    /// Share one similarity provider (and its cache) across controllers
    pub fn provider(mut self, provider: Arc<SimilarityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn anchor(mut self, anchor: Arc<dyn AnchorHint>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn build(self) -> Result<PersonaController> {
        if self.user_id.trim().is_empty() || self.session_id.trim().is_empty() {
            return Err(PersonaError::InvalidInput(
                "controller needs a user_id and a session_id".into(),
            ));
        }
        let config = self.config;
        config.validate()?;

        let provider = match self.provider {
            Some(p) => p,
            None => Arc::new(SimilarityProvider::from_config(&config.embedding)?),
        };
        let memory = MemoryOrchestrator::new(
            self.backend,
            provider.clone(),
            config.recall.clone(),
            config.ambiguity.clone(),
            config.merge.clone(),
        )?;
        let mut identity = IdentityContinuityEngine::new(config.identity.clone());
        if let Some(anchor) = self.anchor {
            identity = identity.with_anchor(anchor);
        }

        let trait_engine = TraitDriftEngine::new(config.traits.clone());
        let value_engine = ValueDriftEngine::new(config.values.clone());
        let traits = load_state(self.snapshots.as_deref(), SnapshotKind::Trait, &config.traits.bounds)
            .unwrap_or_else(|| trait_engine.neutral());
        let values = load_state(self.snapshots.as_deref(), SnapshotKind::Value, &config.values.bounds)
            .unwrap_or_else(|| value_engine.neutral());

        Ok(PersonaController {
            user_id: self.user_id,
            session_id: self.session_id,
            provider,
            memory,
            identity,
            value_engine,
            trait_engine,
            fsm: GlobalStateMachine::new(config.global_state.clone()),
            responses: ResponseGenerator::new(self.responder, config.response.clone()),
            snapshots: self.snapshots,
            config: config.controller,
            session: Mutex::new(SessionState {
                traits,
                values,
                previous_state: None,
                turns: 0,
            }),
        })
    }
}

/// Latest stored state of a kind, or None when absent or unreadable
fn load_state<S: AxisState>(
    store: Option<&dyn SnapshotStore>,
    kind: SnapshotKind,
    bounds: &crate::drift::AxisBounds,
) -> Option<S> {
    match store?.load_latest(kind) {
        Ok(Some(snapshot)) => Some(S::from_map(&snapshot.state, bounds)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("loading {} snapshot failed, starting neutral: {}", kind, e);
            None
        }
    }
}

impl PersonaController {
    pub fn builder(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        backend: Arc<dyn MemoryBackend>,
        responder: Arc<dyn Responder>,
    ) -> PersonaControllerBuilder {
        PersonaControllerBuilder {
            user_id: user_id.into(),
            session_id: session_id.into(),
            backend,
            responder,
            config: PersonaConfig::default(),
            provider: None,
            snapshots: None,
            anchor: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn view(&self) -> SessionView {
        let session = self.session.lock();
        SessionView {
            traits: session.traits,
            values: session.values,
            previous_state: session.previous_state,
            turns: session.turns,
        }
    }

    /// Run one turn.
    ///
    /// Fails only on invalid input, before any state changes. Collaborator
    /// failures degrade inside the turn and show up in the diagnostics.
    #[instrument(skip(self, input), fields(user_id = %self.user_id, session_id = %self.session_id))]
    pub fn handle_turn(&self, input: TurnInput) -> Result<TurnOutput> {
        input.validate()?;
        if input.user_id != self.user_id || input.session_id != self.session_id {
            return Err(PersonaError::InvalidInput(format!(
                "turn for {}/{} sent to controller of {}/{}",
                input.user_id, input.session_id, self.user_id, self.session_id
            )));
        }

        let mut session = self.session.lock();
        let message = input.message.as_str();
        let mut diagnostics = Diagnostics::new();

        let memory = self.memory.select(message);
        let identity = self.identity.evaluate(message, &memory);

        let value_out = self.value_engine.apply(
            &session.values,
            &ValueInputs {
                message,
                memory: &memory,
                identity: &identity,
                traits: &session.traits,
                safety_flag: input.safety_flag,
                reward: input.reward,
                affect: input.affect.as_ref(),
            },
        );
        let trait_out = self.trait_engine.apply(
            &session.traits,
            &TraitInputs {
                memory: &memory,
                identity: &identity,
                values: &value_out.new_state,
                affect: input.affect.as_ref(),
            },
        );

        let mut global_state = self.fsm.evaluate(
            &ReflectiveInputs {
                message,
                pointer_count: memory.pointers.len(),
                topic_label: &identity.topic_label,
                traits: &trait_out.new_state,
                values: &value_out.new_state,
            },
            input.safety_flag,
            input.overload_score,
            session.previous_state,
        );
        if let Some(mode) = input.mode_override {
            global_state = global_state.with_override(mode, "caller override");
        }

        // state advances even if the reply below fails
        session.traits = trait_out.new_state;
        session.values = value_out.new_state;
        session.previous_state = Some(global_state.state);
        session.turns += 1;
        let turn = session.turns;

        let reply_text = match self.responses.generate(
            message,
            &global_state,
            &memory,
            &identity,
            &trait_out.new_state,
            &value_out.new_state,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(kind = e.kind(), "responder failed, using fallback reply: {}", e);
                diagnostics.insert(
                    "responder_error".into(),
                    serde_json::json!({
                        "kind": e.kind(),
                        "message": e.to_string(),
                        "raw": e.raw_payload(),
                    }),
                );
                self.responses.config().fallback_reply.clone()
            }
        };

        let failures = self.write_back(&input, &reply_text, &trait_out, &value_out, &global_state, turn);
        if !failures.is_empty() {
            diagnostics.insert("persistence".into(), serde_json::json!(failures));
        }
        diagnostics.insert("trait_drift".into(), serde_json::json!(trait_out.notes));
        diagnostics.insert("value_drift".into(), serde_json::json!(value_out.notes));
        diagnostics.insert(
            "embedding_cache_hit_rate".into(),
            serde_json::json!(self.provider.cache_stats().hit_rate),
        );

        tracing::info!(
            turn,
            state = %global_state.state,
            pointers = memory.pointers.len(),
            "turn complete"
        );

        Ok(TurnOutput {
            reply_text,
            global_state,
            traits: trait_out.into(),
            values: value_out.into(),
            identity,
            memory,
            diagnostics,
            turn,
        })
    }

    /// Persist episodes and snapshots. Returns failure descriptions, never errors.
    fn write_back(
        &self,
        input: &TurnInput,
        reply: &str,
        traits: &DriftOutcome<TraitState>,
        values: &DriftOutcome<ValueState>,
        global_state: &GlobalStateContext,
        turn: u64,
    ) -> Vec<String> {
        let mut failures = Vec::new();

        if self.config.record_episodes {
            let mut episodes = vec![self.episode(Role::User, &input.message)];
            if !reply.trim().is_empty() {
                episodes.push(self.episode(Role::Assistant, reply));
            }
            failures.extend(
                self.memory
                    .record(episodes)
                    .into_iter()
                    .map(|e| format!("episode: {}", e)),
            );
        }

        if let Some(store) = &self.snapshots {
            let meta = serde_json::json!({
                "session_id": self.session_id,
                "turn": turn,
                "global_state": global_state.state,
                "safety_flag": input.safety_flag,
            });
            let snapshots = [
                StateSnapshot::new(
                    SnapshotKind::Trait,
                    traits.new_state.to_map(),
                    traits.delta.clone(),
                    meta.clone(),
                ),
                StateSnapshot::new(
                    SnapshotKind::Value,
                    values.new_state.to_map(),
                    values.delta.clone(),
                    meta,
                ),
            ];
            for snapshot in &snapshots {
                if let Err(e) = store.store(snapshot) {
                    tracing::warn!("storing {} snapshot failed: {}", snapshot.kind, e);
                    failures.push(format!("{} snapshot: {}", snapshot.kind, e));
                }
            }
        }

        failures
    }

    fn episode(&self, role: Role, text: &str) -> Episode {
        let episode = Episode::record(role, &self.session_id, text, self.config.episode_summary_chars);
        match self.provider.try_encode(&episode.summary) {
            Ok(vector) => episode.with_vector(vector.to_vec()),
            Err(_) => episode,
        }
    }
}
