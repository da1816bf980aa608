//! Database connection management with WAL mode support
//!
//! One SQLite connection behind a mutex, with pragmas chosen per
//! [`StorageMode`]: WAL for local disks, DELETE journal for folders synced
//! by a cloud client.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::error::Result;

/// Storage mode for SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    #[default]
    Local,
    CloudSafe,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "cloud-safe" | "cloud_safe" => Ok(StorageMode::CloudSafe),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database, or ":memory:"
    pub db_path: String,
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Shared SQLite handle. Clones share the same connection.
#[derive(Clone)]
pub struct Storage {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a database and bring its schema up to date
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;
        run_migrations(&conn)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    fn create_connection(config: &StorageConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        Self::configure_pragmas(&conn, config.storage_mode)?;
        Ok(conn)
    }

    fn configure_pragmas(conn: &Connection, mode: StorageMode) -> Result<()> {
        match mode {
            StorageMode::Local => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
            StorageMode::CloudSafe => {
                // Single-file mode for Dropbox, OneDrive, iCloud
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=DELETE;
                    PRAGMA synchronous=FULL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
        }
        Ok(())
    }

    /// Execute a function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function inside a transaction
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Warning when a WAL database sits in a cloud-synced folder
    pub fn storage_mode_warning(&self) -> Option<String> {
        let path = self.config.db_path.to_lowercase();
        let in_cloud_folder = ["dropbox", "onedrive", "icloud", "google drive"]
            .iter()
            .any(|p| path.contains(p));
        if in_cloud_folder && self.config.storage_mode == StorageMode::Local {
            Some(format!(
                "Database '{}' appears to be in a cloud-synced folder; WAL mode may corrupt it. \
                 Set PERSONA_STORAGE_MODE=cloud-safe or move the database.",
                self.config.db_path
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.db_path(), ":memory:");
        assert_eq!(storage.storage_mode(), StorageMode::Local);
    }

    #[test]
    fn test_cloud_safe_mode() {
        let storage = Storage::open(StorageConfig {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::CloudSafe,
        })
        .unwrap();
        assert_eq!(storage.storage_mode(), StorageMode::CloudSafe);
    }

    #[test]
    fn test_cloud_folder_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dropbox").join("persona.db");
        let storage = Storage::open(StorageConfig {
            db_path: path.to_string_lossy().to_string(),
            storage_mode: StorageMode::Local,
        })
        .unwrap();
        assert!(storage.storage_mode_warning().is_some());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("cloud-safe".parse(), Ok(StorageMode::CloudSafe));
        assert!("nfs".parse::<StorageMode>().is_err());
    }
}
