// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! Local SQLite persistence for ciphertext documents, corrupted-document
//! records, key versions and backups, paired devices, key transfer
//! requests, conflict records and sync status.
//!
//! The storage layer never holds an encryption key: documents arrive and
//! leave as ciphertext, and everything else it stores is plaintext-free
//! metadata (fingerprints, revision tokens, timestamps). Encryption lives
//! one layer up in [`crate::store::EncryptedStore`].

#[cfg(feature = "testing")]
pub mod conflicts;
#[cfg(not(feature = "testing"))]
mod conflicts;

#[cfg(feature = "testing")]
pub mod corrupted;
#[cfg(not(feature = "testing"))]
mod corrupted;

#[cfg(feature = "testing")]
pub mod devices;
#[cfg(not(feature = "testing"))]
mod devices;

#[cfg(feature = "testing")]
pub mod documents;
#[cfg(not(feature = "testing"))]
mod documents;

#[cfg(feature = "testing")]
pub mod error;
#[cfg(not(feature = "testing"))]
mod error;

#[cfg(feature = "testing")]
pub mod keys;
#[cfg(not(feature = "testing"))]
mod keys;

#[cfg(feature = "testing")]
pub mod status;
#[cfg(not(feature = "testing"))]
mod status;

#[cfg(feature = "testing")]
pub mod transfers;
#[cfg(not(feature = "testing"))]
mod transfers;

pub mod migration;

pub use conflicts::{ConflictRecord, ResolutionKind};
pub use corrupted::CorruptedDocument;
pub use devices::PairedDevice;
pub use documents::{RawDocument, RemoteApply, Revision};
pub use error::StorageError;
pub use keys::{KeyBackup, KeyVersion, RotatedBy};
pub use status::{SyncStateKind, SyncStatus};
pub use transfers::KeyTransferRequest;

use rusqlite::Connection;
use std::path::Path;

/// Returns the current Unix timestamp in seconds.
/// Falls back to 0 if the system clock is before UNIX_EPOCH (should never happen).
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// SQLite-based storage implementation.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        // Other connections briefly hold the write lock during IMMEDIATE
        // transactions; wait for them instead of failing with SQLITE_BUSY.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let storage = Storage { conn };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Creates an in-memory storage (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let storage = Storage { conn };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Runs all pending schema migrations.
    fn run_migrations(&self) -> Result<(), StorageError> {
        let migrations = migration::all_migrations();
        migration::MigrationRunner::run(&self.conn, &migrations)
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        migration::MigrationRunner::current_version(&self.conn)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside an IMMEDIATE transaction so check-then-write
    /// sequences stay atomic against writers on other connections.
    pub(crate) fn immediate<T>(
        &self,
        f: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        match f() {
            Ok(value) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(e) => {
                self.conn.execute_batch("ROLLBACK;")?;
                Err(e)
            }
        }
    }
}
