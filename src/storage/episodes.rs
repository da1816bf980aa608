//! SQLite-backed episode log, scoped to one user

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};

use super::Storage;
use crate::error::{PersonaError, Result};
use crate::memory::MemoryBackend;
use crate::types::{Episode, EpisodeId, Role};

const EPISODE_COLUMNS: &str = "id, session_id, role, created_at, summary, body, vector, dimensions";

pub struct SqliteEpisodeStore {
    storage: Storage,
    user_id: String,
}

impl SqliteEpisodeStore {
    pub fn new(storage: Storage, user_id: impl Into<String>) -> Self {
        Self {
            storage,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn count(&self) -> Result<i64> {
        self.storage.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM episodes WHERE user_id = ?",
                params![self.user_id],
                |row| row.get(0),
            )?)
        })
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersonaError::InvalidInput(format!("bad timestamp '{}': {}", raw, e)))
}

/// SQLite LIMIT value; sizes past `i64::MAX` saturate instead of wrapping to "no limit"
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(bytes: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimensions * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

struct EpisodeRow {
    id: String,
    session_id: Option<String>,
    role: String,
    created_at: String,
    summary: String,
    body: String,
    vector: Option<Vec<u8>>,
    dimensions: Option<i64>,
}

impl EpisodeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: row.get(2)?,
            created_at: row.get(3)?,
            summary: row.get(4)?,
            body: row.get(5)?,
            vector: row.get(6)?,
            dimensions: row.get(7)?,
        })
    }

    fn into_episode(self) -> Result<Episode> {
        // a blob that does not match its dimension count is treated as absent
        let vector = match (self.vector, self.dimensions) {
            (Some(bytes), Some(dims)) if dims > 0 => blob_to_vector(&bytes, dims as usize),
            _ => None,
        };
        Ok(Episode {
            id: self.id,
            timestamp: parse_timestamp(&self.created_at)?,
            summary: self.summary,
            body: self.body,
            vector,
            role: self.role.parse().unwrap_or(Role::User),
            session_id: self.session_id,
        })
    }
}

fn query_episodes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Episode>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, EpisodeRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(EpisodeRow::into_episode).collect()
}

impl MemoryBackend for SqliteEpisodeStore {
    fn fetch_recent(&self, limit: usize) -> Result<Vec<Episode>> {
        self.storage.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM episodes WHERE user_id = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
                EPISODE_COLUMNS
            );
            query_episodes(conn, &sql, params![self.user_id, sql_limit(limit)])
        })
    }

    fn fetch_by_ids(&self, ids: &[EpisodeId]) -> Result<Vec<Episode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.storage.with_connection(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM episodes WHERE user_id = ? AND id IN ({})",
                EPISODE_COLUMNS, placeholders
            );
            let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
            values.push(&self.user_id);
            for id in ids {
                values.push(id);
            }
            query_episodes(conn, &sql, values.as_slice())
        })
    }

    fn append(&self, episode: Episode) -> Result<()> {
        self.storage.with_connection(|conn| {
            let blob = episode.vector.as_deref().map(vector_to_blob);
            let dims = episode.vector.as_ref().map(|v| v.len() as i64);
            conn.execute(
                "INSERT INTO episodes (id, user_id, session_id, role, created_at, summary, body, vector, dimensions)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    episode.id,
                    self.user_id,
                    episode.session_id,
                    episode.role.as_str(),
                    format_timestamp(&episode.timestamp),
                    episode.summary,
                    episode.body,
                    blob,
                    dims,
                ],
            )?;
            Ok(())
        })
    }
}
