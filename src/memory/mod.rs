//! Episodic memory selection
//!
//! Pipeline, run once per turn by [`MemoryOrchestrator`]:
//! 1. [`CandidateRecall`]: similarity + recency ranking of recent episodes
//! 2. [`AmbiguityResolver`]: re-ranking when the message has a vague back-reference
//! 3. [`EpisodeMerger`]: one bounded summary plus the pointers actually used

mod ambiguity;
mod merger;
mod orchestrator;
mod recall;

pub use ambiguity::{AmbiguityConfig, AmbiguityResolution, AmbiguityResolver, ResolutionReason};
pub use merger::{EpisodeMerger, MergeConfig, MergeOutcome, SkipReason, SkippedPointer};
pub use orchestrator::{MemoryOrchestrator, MemorySelectionResult};
pub use recall::{CandidateRecall, RecallConfig, RecallOutcome};

use parking_lot::RwLock;
use std::collections::HashSet;

use crate::error::Result;
use crate::types::{Episode, EpisodeId};

/// Append-only episode log
///
/// Implementations take `&self` and handle their own synchronization so a
/// single handle can be shared by concurrent sessions.
pub trait MemoryBackend: Send + Sync {
    /// Most recent episodes, newest first
    fn fetch_recent(&self, limit: usize) -> Result<Vec<Episode>>;

    /// Episodes with the given ids, in no particular order. Unknown ids are skipped.
    fn fetch_by_ids(&self, ids: &[EpisodeId]) -> Result<Vec<Episode>>;

    fn append(&self, episode: Episode) -> Result<()>;
}

/// Volatile backend, used by tests and the offline CLI mode
#[derive(Default)]
pub struct InMemoryBackend {
    episodes: RwLock<Vec<Episode>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_episodes(episodes: Vec<Episode>) -> Self {
        Self {
            episodes: RwLock::new(episodes),
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryBackend for InMemoryBackend {
    fn fetch_recent(&self, limit: usize) -> Result<Vec<Episode>> {
        let guard = self.episodes.read();
        // stable sort keeps later appends first among equal timestamps
        let mut recent: Vec<Episode> = guard.iter().rev().cloned().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(limit);
        Ok(recent)
    }

    fn fetch_by_ids(&self, ids: &[EpisodeId]) -> Result<Vec<Episode>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .episodes
            .read()
            .iter()
            .filter(|e| wanted.contains(e.id.as_str()))
            .cloned()
            .collect())
    }

    fn append(&self, episode: Episode) -> Result<()> {
        self.episodes.write().push(episode);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PersonaError;
    use crate::types::Role;
    use chrono::{Duration, Utc};

    /// Backend whose every call fails
    pub(crate) struct UnavailableBackend;

    impl MemoryBackend for UnavailableBackend {
        fn fetch_recent(&self, _limit: usize) -> Result<Vec<Episode>> {
            Err(PersonaError::Backend("connection refused".into()))
        }

        fn fetch_by_ids(&self, _ids: &[EpisodeId]) -> Result<Vec<Episode>> {
            Err(PersonaError::Backend("connection refused".into()))
        }

        fn append(&self, _episode: Episode) -> Result<()> {
            Err(PersonaError::Backend("connection refused".into()))
        }
    }

    /// Episode with a fixed id, `minutes_ago` old
    pub(crate) fn episode(id: &str, summary: &str, minutes_ago: i64) -> Episode {
        Episode {
            id: id.to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            summary: summary.to_string(),
            body: summary.to_string(),
            vector: None,
            role: Role::User,
            session_id: Some("s1".to_string()),
        }
    }

    #[test]
    fn test_fetch_recent_newest_first() {
        let backend = InMemoryBackend::with_episodes(vec![
            episode("old", "a", 30),
            episode("new", "b", 1),
            episode("mid", "c", 10),
        ]);
        let recent = backend.fetch_recent(2).unwrap();
        let ids: Vec<&str> = recent.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[test]
    fn test_fetch_by_ids_skips_unknown() {
        let backend = InMemoryBackend::new();
        backend.append(episode("a", "x", 1)).unwrap();
        backend.append(episode("b", "y", 2)).unwrap();
        let found = backend
            .fetch_by_ids(&["b".to_string(), "zzz".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");
    }
}
