// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database Schema Migration Framework
//!
//! Provides versioned schema migrations with transactional safety.
//! Each migration has a version number, name, and either SQL or a Rust
//! callback. The runner tracks applied versions in a `schema_version`
//! table and runs pending migrations in order within a single transaction.

use rusqlite::Connection;

use super::StorageError;

/// A single schema migration step.
pub struct Migration {
    /// Monotonically increasing version number (starting at 1).
    pub version: u32,
    /// Human-readable name for this migration.
    pub name: &'static str,
    /// The migration action: either SQL or a Rust callback.
    pub action: MigrationAction,
}

/// The action a migration performs.
pub enum MigrationAction {
    /// Pure SQL migration.
    Sql(&'static str),
    /// Rust callback migration (for data transformations).
    Callback(fn(&Connection) -> Result<(), StorageError>),
}

/// Runs schema migrations against a database connection.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Runs all pending migrations in a transaction.
    ///
    /// Creates the `schema_version` table if it doesn't exist, then applies
    /// any migrations whose version is greater than the current schema
    /// version. All pending migrations run within a single transaction —
    /// if any migration fails, all changes are rolled back.
    pub fn run(conn: &Connection, migrations: &[Migration]) -> Result<(), StorageError> {
        // Created outside the transaction, since we need to read it before
        // starting the migration transaction.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let current_version = Self::current_version(conn)?;

        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|m| m.version > current_version)
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        for window in pending.windows(2) {
            if window[0].version >= window[1].version {
                return Err(StorageError::Migration(format!(
                    "Migrations are not in order: v{} before v{}",
                    window[0].version, window[1].version
                )));
            }
        }

        conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION;")?;

        for migration in &pending {
            let result = match &migration.action {
                MigrationAction::Sql(sql) => conn
                    .execute_batch(sql)
                    .map_err(|e| StorageError::Migration(e.to_string())),
                MigrationAction::Callback(cb) => cb(conn),
            };

            if let Err(e) = result {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e
                )));
            }

            let now = super::unix_now();
            if let Err(e) = conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.version, now as i64],
            ) {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                )));
            }
        }

        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Returns the current schema version, or 0 if no migrations have been applied.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap_or(None);

        Ok(version.unwrap_or(0))
    }
}

/// Returns all registered migrations in version order.
///
/// This is the single source of truth for the database schema.
/// New migrations are appended to the end of this list.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "baseline_schema",
            action: MigrationAction::Sql(MIGRATION_V1_BASELINE),
        },
        Migration {
            version: 2,
            name: "sync_and_expiry_indexes",
            action: MigrationAction::Sql(MIGRATION_V2_INDEXES),
        },
    ]
}

const MIGRATION_V1_BASELINE: &str = "
CREATE TABLE documents (
    id TEXT PRIMARY KEY,
    revision TEXT NOT NULL,
    ciphertext BLOB NOT NULL,
    content_digest BLOB NOT NULL,
    encrypted_at INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    pending INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE corrupted_documents (
    id TEXT PRIMARY KEY,
    encrypted_at INTEGER NOT NULL,
    error_kind TEXT NOT NULL,
    recoverable INTEGER NOT NULL,
    first_seen_at INTEGER NOT NULL
);

CREATE TABLE key_versions (
    key_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    rotated_at INTEGER,
    rotated_by TEXT NOT NULL,
    key_fingerprint TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    usage_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE key_backups (
    key_id TEXT PRIMARY KEY,
    wrapped_key BLOB NOT NULL,
    salt BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE paired_devices (
    device_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    device_class TEXT NOT NULL,
    public_key BLOB NOT NULL,
    paired_at INTEGER NOT NULL,
    last_sync_at INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE transfer_requests (
    request_id TEXT PRIMARY KEY,
    from_device TEXT NOT NULL,
    to_device TEXT NOT NULL,
    wrapped_key BLOB NOT NULL,
    salt BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    consumed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE conflict_records (
    document_id TEXT NOT NULL,
    local_revision TEXT NOT NULL,
    remote_revision TEXT NOT NULL,
    local_document BLOB NOT NULL,
    remote_document BLOB NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolution_kind TEXT,
    resolved_at INTEGER,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (document_id, local_revision, remote_revision)
);

CREATE TABLE sync_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    state TEXT NOT NULL,
    last_success_at INTEGER,
    last_error TEXT,
    next_retry_at INTEGER,
    pull_checkpoint INTEGER NOT NULL DEFAULT 0
);
";

const MIGRATION_V2_INDEXES: &str = "
CREATE INDEX idx_documents_pending ON documents(pending) WHERE pending = 1;
CREATE INDEX idx_conflicts_unresolved ON conflict_records(resolved) WHERE resolved = 0;
CREATE INDEX idx_transfers_expiry ON transfer_requests(expires_at);
CREATE INDEX idx_backups_expiry ON key_backups(expires_at);
";
