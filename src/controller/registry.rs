//! Live controllers keyed by (user, session)
//!
//! Different sessions proceed in parallel; turns of one session serialize
//! on that controller's own lock. With a session cap, the least recently
//! used controller is dropped when a new session arrives; its traits and
//! values come back from the snapshot store when the session returns.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{PersonaController, TurnOutput};
use crate::error::Result;
use crate::types::TurnInput;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(user_id: &str, session_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

/// Builds the controller for a session seen for the first time
pub type ControllerFactory = Box<dyn Fn(&str, &str) -> Result<PersonaController> + Send + Sync>;

struct LiveSession {
    controller: Arc<PersonaController>,
    last_used: AtomicU64,
}

pub struct SessionRegistry {
    controllers: DashMap<SessionKey, LiveSession>,
    factory: ControllerFactory,
    max_sessions: Option<usize>,
    clock: AtomicU64,
}

impl SessionRegistry {
    pub fn new(factory: ControllerFactory) -> Self {
        Self {
            controllers: DashMap::new(),
            factory,
            max_sessions: None,
            clock: AtomicU64::new(0),
        }
    }

    /// Keep at most `max` live controllers (at least one)
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max.max(1));
        self
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get_or_create(&self, user_id: &str, session_id: &str) -> Result<Arc<PersonaController>> {
        let key = SessionKey::new(user_id, session_id);
        if let Some(existing) = self.controllers.get(&key) {
            existing.last_used.store(self.tick(), Ordering::Relaxed);
            return Ok(existing.controller.clone());
        }

        // built outside the map lock; a concurrent winner is kept
        let controller = Arc::new((self.factory)(user_id, session_id)?);
        if let Some(max) = self.max_sessions {
            while self.controllers.len() >= max {
                if !self.evict_least_recent() {
                    break;
                }
            }
        }
        let entry = self.controllers.entry(key).or_insert(LiveSession {
            controller,
            last_used: AtomicU64::new(self.tick()),
        });
        Ok(entry.controller.clone())
    }

    /// Drop the least recently used session. False when there is none.
    fn evict_least_recent(&self) -> bool {
        let oldest = self
            .controllers
            .iter()
            .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                tracing::debug!(
                    user_id = %key.user_id,
                    session_id = %key.session_id,
                    "evicting idle session"
                );
                self.controllers.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Route a turn to its session's controller
    pub fn handle_turn(&self, input: TurnInput) -> Result<TurnOutput> {
        let controller = self.get_or_create(&input.user_id, &input.session_id)?;
        controller.handle_turn(input)
    }

    pub fn remove(&self, user_id: &str, session_id: &str) -> Option<Arc<PersonaController>> {
        self.controllers
            .remove(&SessionKey::new(user_id, session_id))
            .map(|(_, session)| session.controller)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::EchoResponder;
    use crate::memory::{InMemoryBackend, MemoryBackend};
    use crate::storage::InMemorySnapshotStore;
    use crate::types::SafetyFlag;

    fn registry() -> SessionRegistry {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::new());
        SessionRegistry::new(Box::new(move |user: &str, session: &str| {
            PersonaController::builder(user, session, backend.clone(), Arc::new(EchoResponder)).build()
        }))
    }

    #[test]
    fn test_same_session_reuses_controller() {
        let registry = registry();
        let a = registry.get_or_create("alice", "s1").unwrap();
        let b = registry.get_or_create("alice", "s1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        registry.get_or_create("alice", "s2").unwrap();
        assert_eq!(registry.len(), 2);

        assert!(registry.remove("alice", "s1").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_factory_error_is_returned() {
        let registry = registry();
        assert!(registry.get_or_create("", "s1").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sessions_do_not_share_state() {
        let registry = registry();
        registry
            .handle_turn(TurnInput::new("alice", "s1", "hi").with_safety_flag(SafetyFlag::Blocked))
            .unwrap();
        registry.handle_turn(TurnInput::new("alice", "s2", "hi")).unwrap();

        let s1 = registry.get_or_create("alice", "s1").unwrap().view();
        let s2 = registry.get_or_create("alice", "s2").unwrap().view();
        assert!(s1.values.safety_bias > 0.0);
        assert_eq!(s2.values.safety_bias, 0.0);
    }

    #[test]
    fn test_concurrent_turns_serialize_per_session() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let session = format!("s{}", i % 2);
                    for _ in 0..5 {
                        registry
                            .handle_turn(TurnInput::new("alice", session.as_str(), "hello"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 2);
        for session in ["s0", "s1"] {
            assert_eq!(registry.get_or_create("alice", session).unwrap().view().turns, 20);
        }
    }

    #[test]
    fn test_session_cap_evicts_least_recent() {
        let registry = registry().with_max_sessions(2);
        registry.get_or_create("alice", "s1").unwrap();
        registry.get_or_create("alice", "s2").unwrap();
        // s1 becomes the most recent
        registry.get_or_create("alice", "s1").unwrap();
        registry.get_or_create("alice", "s3").unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.remove("alice", "s2").is_none());
        assert!(registry.remove("alice", "s1").is_some());
        assert!(registry.remove("alice", "s3").is_some());
    }

    #[test]
    fn test_evicted_session_reloads_drift_state() {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let registry = SessionRegistry::new(Box::new(move |user: &str, session: &str| {
            PersonaController::builder(user, session, backend.clone(), Arc::new(EchoResponder))
                .snapshots(snapshots.clone())
                .build()
        }))
        .with_max_sessions(1);

        registry
            .handle_turn(TurnInput::new("alice", "s1", "hi").with_safety_flag(SafetyFlag::Blocked))
            .unwrap();
        let before = registry.get_or_create("alice", "s1").unwrap().view();
        registry.handle_turn(TurnInput::new("alice", "s2", "hi")).unwrap();
        assert_eq!(registry.len(), 1);

        let after = registry.get_or_create("alice", "s1").unwrap().view();
        assert_eq!(after.turns, 0);
        assert!(after.values.safety_bias > 0.0);
        assert!(after.values.safety_bias <= before.values.safety_bias);
    }
}
