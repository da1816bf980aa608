//! Trait/value state snapshots
//!
//! Every store is scoped to one user at construction. Nothing here is
//! process-global.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::episodes::{format_timestamp, parse_timestamp, sql_limit};
use super::Storage;
use crate::error::{PersonaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Trait,
    Value,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Trait => "trait",
            SnapshotKind::Value => "value",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted state vector with the delta that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub kind: SnapshotKind,
    pub created_at: DateTime<Utc>,
    pub state: BTreeMap<String, f32>,
    #[serde(default)]
    pub delta: BTreeMap<String, f32>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl StateSnapshot {
    pub fn new(
        kind: SnapshotKind,
        state: BTreeMap<String, f32>,
        delta: BTreeMap<String, f32>,
        meta: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            created_at: Utc::now(),
            state,
            delta,
            meta,
        }
    }
}

/// Persistence for state snapshots of one user
pub trait SnapshotStore: Send + Sync {
    fn load_latest(&self, kind: SnapshotKind) -> Result<Option<StateSnapshot>>;

    fn store(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// Volatile snapshot store
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<StateSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored snapshots of a kind, oldest first
    pub fn history(&self, kind: SnapshotKind) -> Vec<StateSnapshot> {
        self.snapshots
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load_latest(&self, kind: SnapshotKind) -> Result<Option<StateSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .rev()
            .find(|s| s.kind == kind)
            .cloned())
    }

    fn store(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }
}

pub struct SqliteSnapshotStore {
    storage: Storage,
    user_id: String,
}

impl SqliteSnapshotStore {
    pub fn new(storage: Storage, user_id: impl Into<String>) -> Self {
        Self {
            storage,
            user_id: user_id.into(),
        }
    }

    /// Most recent snapshots of a kind, newest first
    pub fn recent(&self, kind: SnapshotKind, limit: usize) -> Result<Vec<StateSnapshot>> {
        self.storage.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT created_at, state, delta, meta FROM state_snapshots
                 WHERE user_id = ? AND kind = ? ORDER BY id DESC LIMIT ?",
            )?;
            let rows = stmt
                .query_map(
                    params![self.user_id, kind.as_str(), sql_limit(limit)],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(created_at, state, delta, meta)| decode(kind, &created_at, &state, &delta, &meta))
                .collect()
        })
    }
}

fn decode(
    kind: SnapshotKind,
    created_at: &str,
    state: &str,
    delta: &str,
    meta: &str,
) -> Result<StateSnapshot> {
    let state: BTreeMap<String, f32> = serde_json::from_str(state)
        .map_err(|e| PersonaError::Snapshot(format!("corrupt {} snapshot: {}", kind, e)))?;
    Ok(StateSnapshot {
        kind,
        created_at: parse_timestamp(created_at)?,
        state,
        delta: serde_json::from_str(delta).unwrap_or_default(),
        meta: serde_json::from_str(meta).unwrap_or(serde_json::Value::Null),
    })
}

impl SnapshotStore for SqliteSnapshotStore {
    fn load_latest(&self, kind: SnapshotKind) -> Result<Option<StateSnapshot>> {
        let row = self.storage.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT created_at, state, delta, meta FROM state_snapshots
                     WHERE user_id = ? AND kind = ? ORDER BY id DESC LIMIT 1",
                    params![self.user_id, kind.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        row.map(|(created_at, state, delta, meta)| decode(kind, &created_at, &state, &delta, &meta))
            .transpose()
    }

    fn store(&self, snapshot: &StateSnapshot) -> Result<()> {
        let state = serde_json::to_string(&snapshot.state)?;
        let delta = serde_json::to_string(&snapshot.delta)?;
        let meta = serde_json::to_string(&snapshot.meta)?;
        self.storage.with_connection(|conn| {
            conn.execute(
                "INSERT INTO state_snapshots (user_id, kind, created_at, state, delta, meta)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    self.user_id,
                    snapshot.kind.as_str(),
                    format_timestamp(&snapshot.created_at),
                    state,
                    delta,
                    meta,
                ],
            )?;
            Ok(())
        })
    }
}
