//! End-to-end turn scenarios through the public API
//!
//! Run with: cargo test --test scenario_tests

use std::collections::BTreeMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use persona::controller::{EchoResponder, PersonaController, Responder, ResponseRequest};
use persona::drift::{AxisBounds, AxisState};
use persona::memory::{InMemoryBackend, MemoryBackend};
use persona::storage::{
    InMemorySnapshotStore, SnapshotKind, SnapshotStore, SqliteEpisodeStore, SqliteSnapshotStore,
    StateSnapshot, Storage, StorageConfig, StorageMode,
};
use persona::{
    Episode, EpisodeId, GlobalState, PersonaConfig, PersonaError, RawTurnInput, Result,
    SafetyFlag, TraitState, TurnInput,
};

fn echo_controller(backend: Arc<dyn MemoryBackend>) -> PersonaController {
    PersonaController::builder("alice", "s1", backend, Arc::new(EchoResponder))
        .build()
        .unwrap()
}

#[test]
fn plain_message_with_empty_memory_is_a_new_topic() {
    let ctl = echo_controller(Arc::new(InMemoryBackend::new()));
    let out = ctl
        .handle_turn(TurnInput::new("alice", "s1", "What's a good recipe for bread?"))
        .unwrap();

    assert!(out.memory.pointers.is_empty());
    assert_eq!(out.memory.merged_summary, None);
    assert!(!out.identity.has_past_context);
    assert!(out.identity.topic_label.starts_with("New topic"));
    assert!(out.identity.topic_label.contains("What's a good recipe"));
    assert_eq!(out.global_state.state, GlobalState::Normal);
}

#[test]
fn blocked_flag_locks_regardless_of_other_signals() {
    let ctl = echo_controller(Arc::new(InMemoryBackend::new()));
    let raw: RawTurnInput = serde_json::from_value(serde_json::json!({
        "user_id": "alice",
        "session_id": "s1",
        "message_text": "Why? Why? Explain the reason and compare the tradeoffs.",
        "safety_flag": "blocked",
        "overload_score": 0.99,
        "reward": {"score": 1.0},
        "affect_signal": {"tension": 0.2}
    }))
    .unwrap();

    let out = ctl.handle_turn(raw.normalize().unwrap()).unwrap();
    assert_eq!(out.global_state.state, GlobalState::SafetyLocked);
    assert!(out.global_state.reasons.iter().any(|r| r.contains("safety_flag")));
    assert!(out.global_state.reasons.iter().any(|r| r.contains("blocked")));
}

#[test]
fn quiet_turns_converge_traits_to_center() {
    let mut config = PersonaConfig::default();
    config.controller.record_episodes = false;

    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let mut seed = BTreeMap::new();
    seed.insert("calm".to_string(), 0.6);
    seed.insert("empathy".to_string(), -0.5);
    seed.insert("curiosity".to_string(), 0.3);
    snapshots
        .store(&StateSnapshot::new(
            SnapshotKind::Trait,
            seed,
            BTreeMap::new(),
            serde_json::Value::Null,
        ))
        .unwrap();

    let ctl = PersonaController::builder(
        "alice",
        "s1",
        Arc::new(InMemoryBackend::new()),
        Arc::new(EchoResponder),
    )
    .config(config)
    .snapshots(snapshots)
    .build()
    .unwrap();

    let bounds = AxisBounds::default();
    let mut distances = vec![ctl.view().traits.distance_to_center(&bounds)];
    for _ in 0..10 {
        let out = ctl.handle_turn(TurnInput::new("alice", "s1", "hello")).unwrap();
        assert!(out.memory.pointers.is_empty());
        distances.push(out.traits.state.distance_to_center(&bounds));
    }

    for pair in distances.windows(2) {
        assert!(pair[1] < pair[0], "distance did not shrink: {:?}", distances);
    }
    let last = ctl.view().traits;
    assert!(last.calm > 0.0 && last.calm < 0.6);
    assert!(last.empathy < 0.0 && last.empathy > -0.5);
}

#[test]
fn repeated_topic_is_recalled_as_continuation() {
    let backend = Arc::new(InMemoryBackend::new());
    let ctl = echo_controller(backend);

    ctl.handle_turn(TurnInput::new("alice", "s1", "planning a hiking trip to the alps"))
        .unwrap();
    let out = ctl
        .handle_turn(TurnInput::new("alice", "s1", "planning a hiking trip to the alps"))
        .unwrap();

    assert!(!out.memory.pointers.is_empty());
    assert!(out.identity.has_past_context);
    assert_eq!(out.identity.topic_label, "Continuation of prior context");
    let summary = out.memory.merged_summary.unwrap();
    assert!(summary.contains("hiking"));
}

/// Backend that reads fine but refuses every write
struct ReadOnlyBackend(InMemoryBackend);

impl MemoryBackend for ReadOnlyBackend {
    fn fetch_recent(&self, limit: usize) -> Result<Vec<Episode>> {
        self.0.fetch_recent(limit)
    }

    fn fetch_by_ids(&self, ids: &[EpisodeId]) -> Result<Vec<Episode>> {
        self.0.fetch_by_ids(ids)
    }

    fn append(&self, _episode: Episode) -> Result<()> {
        Err(PersonaError::Backend("disk full".into()))
    }
}

struct FailingSnapshots;

impl SnapshotStore for FailingSnapshots {
    fn load_latest(&self, _kind: SnapshotKind) -> Result<Option<StateSnapshot>> {
        Err(PersonaError::Snapshot("unreadable".into()))
    }

    fn store(&self, _snapshot: &StateSnapshot) -> Result<()> {
        Err(PersonaError::Snapshot("read-only".into()))
    }
}

#[test]
fn persistence_failures_are_reported_not_raised() {
    let ctl = PersonaController::builder(
        "alice",
        "s1",
        Arc::new(ReadOnlyBackend(InMemoryBackend::new())),
        Arc::new(EchoResponder),
    )
    .snapshots(Arc::new(FailingSnapshots))
    .build()
    .unwrap();

    // unreadable snapshots start from neutral
    assert_eq!(ctl.view().traits, TraitState::default());

    let out = ctl.handle_turn(TurnInput::new("alice", "s1", "hi")).unwrap();
    assert_eq!(out.reply_text, "(NORMAL) hi");
    let failures = out.diagnostics["persistence"].as_array().unwrap();
    // two episodes and two snapshots
    assert_eq!(failures.len(), 4);
    assert_eq!(ctl.view().turns, 1);
}

struct GarbledResponder;

impl Responder for GarbledResponder {
    fn respond(&self, _request: &ResponseRequest<'_>) -> Result<String> {
        Ok("not json at all".to_string())
    }
}

#[test]
fn malformed_reply_falls_back_with_raw_payload() {
    let mut config = PersonaConfig::default();
    config.response.format = persona::controller::ReplyFormat::Json;

    let ctl = PersonaController::builder(
        "alice",
        "s1",
        Arc::new(InMemoryBackend::new()),
        Arc::new(GarbledResponder),
    )
    .config(config)
    .build()
    .unwrap();

    let out = ctl.handle_turn(TurnInput::new("alice", "s1", "hi")).unwrap();
    assert_eq!(out.reply_text, "I'm unable to respond right now.");
    let error = &out.diagnostics["responder_error"];
    assert_eq!(error["kind"], "malformed_response");
    assert_eq!(error["raw"], "not json at all");
}

#[test]
fn silent_only_by_override() {
    let ctl = echo_controller(Arc::new(InMemoryBackend::new()));
    let auto = ctl
        .handle_turn(TurnInput::new("alice", "s1", "hi").with_overload(1.0))
        .unwrap();
    assert_eq!(auto.global_state.state, GlobalState::Overloaded);

    let forced = ctl
        .handle_turn(TurnInput::new("alice", "s1", "hi").with_mode_override(GlobalState::Silent))
        .unwrap();
    assert_eq!(forced.global_state.state, GlobalState::Silent);
    assert_eq!(forced.global_state.previous_state, Some(GlobalState::Overloaded));
    assert_eq!(forced.reply_text, "");
}

#[test]
fn sqlite_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("persona.db").to_string_lossy().to_string();
    let open = || {
        Storage::open(StorageConfig {
            db_path: db_path.clone(),
            storage_mode: StorageMode::Local,
        })
        .unwrap()
    };
    let build = |storage: &Storage, session: &str| {
        PersonaController::builder(
            "alice",
            session,
            Arc::new(SqliteEpisodeStore::new(storage.clone(), "alice")),
            Arc::new(EchoResponder),
        )
        .snapshots(Arc::new(SqliteSnapshotStore::new(storage.clone(), "alice")))
        .build()
        .unwrap()
    };

    let first_traits = {
        let storage = open();
        let ctl = build(&storage, "s1");
        ctl.handle_turn(
            TurnInput::new("alice", "s1", "my sister is getting married in june")
                .with_safety_flag(SafetyFlag::Escalated),
        )
        .unwrap();
        ctl.view()
    };

    let storage = open();
    assert_eq!(
        SqliteEpisodeStore::new(storage.clone(), "alice").count().unwrap(),
        2
    );
    let ctl = build(&storage, "s2");
    assert_eq!(ctl.view().traits, first_traits.traits);
    assert_eq!(ctl.view().values, first_traits.values);

    let out = ctl
        .handle_turn(TurnInput::new("alice", "s2", "my sister is getting married in june"))
        .unwrap();
    assert!(out.identity.has_past_context);

    let latest = SqliteSnapshotStore::new(storage, "alice")
        .load_latest(SnapshotKind::Value)
        .unwrap()
        .unwrap();
    assert_eq!(latest.meta["session_id"], "s2");
    assert_eq!(latest.meta["turn"], 1);
}
