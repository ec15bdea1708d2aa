// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync status persistence.

use rusqlite::params;

use super::{Storage, StorageError};

/// Connection state of the replication loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStateKind {
    /// No sync has run, or the endpoint is unreachable.
    Offline,
    /// A sync pass is in progress.
    Syncing,
    /// Fully caught up as of `last_success_at`.
    Synced,
    /// The last pass failed; see `last_error` and `next_retry_at`.
    Error,
}

impl SyncStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStateKind::Offline => "offline",
            SyncStateKind::Syncing => "syncing",
            SyncStateKind::Synced => "synced",
            SyncStateKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(SyncStateKind::Offline),
            "syncing" => Some(SyncStateKind::Syncing),
            "synced" => Some(SyncStateKind::Synced),
            "error" => Some(SyncStateKind::Error),
            _ => None,
        }
    }
}

/// Singleton sync status row.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncStateKind,
    pub last_success_at: Option<u64>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<u64>,
    /// Highest remote sequence number fully applied locally.
    pub pull_checkpoint: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            state: SyncStateKind::Offline,
            last_success_at: None,
            last_error: None,
            next_retry_at: None,
            pull_checkpoint: 0,
        }
    }
}

impl Storage {
    // === Sync Status Operations ===

    /// Loads the sync status, or the offline default if none was saved yet.
    pub fn load_sync_status(&self) -> Result<SyncStatus, StorageError> {
        let result = self.conn().query_row(
            "SELECT state, last_success_at, last_error, next_retry_at, pull_checkpoint
             FROM sync_status WHERE id = 1",
            [],
            |row| {
                let state_str: String = row.get(0)?;
                Ok(SyncStatus {
                    state: SyncStateKind::parse(&state_str).unwrap_or(SyncStateKind::Offline),
                    last_success_at: row.get::<_, Option<i64>>(1)?.map(|t| t as u64),
                    last_error: row.get(2)?,
                    next_retry_at: row.get::<_, Option<i64>>(3)?.map(|t| t as u64),
                    pull_checkpoint: row.get::<_, i64>(4)? as u64,
                })
            },
        );

        match result {
            Ok(status) => Ok(status),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SyncStatus::default()),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Saves the sync status, replacing any previous row.
    pub fn save_sync_status(&self, status: &SyncStatus) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO sync_status
             (id, state, last_success_at, last_error, next_retry_at, pull_checkpoint)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 state = excluded.state,
                 last_success_at = excluded.last_success_at,
                 last_error = excluded.last_error,
                 next_retry_at = excluded.next_retry_at,
                 pull_checkpoint = excluded.pull_checkpoint",
            params![
                status.state.as_str(),
                status.last_success_at.map(|t| t as i64),
                status.last_error,
                status.next_retry_at.map(|t| t as i64),
                status.pull_checkpoint as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_when_unsaved() {
        let storage = Storage::in_memory().unwrap();
        let status = storage.load_sync_status().unwrap();
        assert_eq!(status.state, SyncStateKind::Offline);
        assert_eq!(status.pull_checkpoint, 0);
        assert!(status.last_success_at.is_none());
    }

    #[test]
    fn test_status_round_trip_and_overwrite() {
        let storage = Storage::in_memory().unwrap();

        let status = SyncStatus {
            state: SyncStateKind::Synced,
            last_success_at: Some(1234),
            last_error: None,
            next_retry_at: None,
            pull_checkpoint: 42,
        };
        storage.save_sync_status(&status).unwrap();

        let loaded = storage.load_sync_status().unwrap();
        assert_eq!(loaded.state, SyncStateKind::Synced);
        assert_eq!(loaded.pull_checkpoint, 42);

        let errored = SyncStatus {
            state: SyncStateKind::Error,
            last_success_at: Some(1234),
            last_error: Some("connection refused".to_string()),
            next_retry_at: Some(2000),
            pull_checkpoint: 42,
        };
        storage.save_sync_status(&errored).unwrap();

        let loaded = storage.load_sync_status().unwrap();
        assert_eq!(loaded.state, SyncStateKind::Error);
        assert_eq!(loaded.last_error.as_deref(), Some("connection refused"));
        assert_eq!(loaded.next_retry_at, Some(2000));
    }
}
