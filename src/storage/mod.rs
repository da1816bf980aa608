//! SQLite persistence for episodes and state snapshots

mod connection;
mod episodes;
mod migrations;
mod snapshots;

pub use connection::{Storage, StorageConfig, StorageMode};
pub use episodes::SqliteEpisodeStore;
pub use migrations::SCHEMA_VERSION;
pub use snapshots::{
    InMemorySnapshotStore, SnapshotKind, SnapshotStore, SqliteSnapshotStore, StateSnapshot,
};
