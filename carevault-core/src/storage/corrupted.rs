// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Corrupted-document record storage.
//!
//! A record is created the first time a document fails to decrypt.
//! Records are deduplicated by id and never auto-deleted: a document that
//! later becomes readable again keeps its history of having been
//! unreadable.

use rusqlite::params;

use super::{unix_now, Storage, StorageError};

/// Record of a document whose ciphertext could not be authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptedDocument {
    pub id: String,
    /// `encrypted_at` of the unreadable ciphertext.
    pub encrypted_at: u64,
    /// Short machine-readable failure kind, e.g. "auth_tag_failure".
    pub error_kind: String,
    /// Whether a key rotation or backup restore could recover the document.
    pub recoverable: bool,
    pub first_seen_at: u64,
}

impl Storage {
    // === Corrupted Document Operations ===

    /// Records a decryption failure for a document.
    ///
    /// Deduplicated by id: the first sighting wins and `first_seen_at` is
    /// never overwritten.
    pub fn record_corrupted(
        &self,
        id: &str,
        encrypted_at: u64,
        error_kind: &str,
        recoverable: bool,
    ) -> Result<(), StorageError> {
        let now = unix_now();

        self.conn().execute(
            "INSERT OR IGNORE INTO corrupted_documents
             (id, encrypted_at, error_kind, recoverable, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, encrypted_at as i64, error_kind, recoverable as i32, now as i64],
        )?;

        Ok(())
    }

    /// Checks whether a corrupted record exists for an id.
    pub fn is_corrupted(&self, id: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM corrupted_documents WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Lists all corrupted-document records.
    pub fn list_corrupted(&self) -> Result<Vec<CorruptedDocument>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT id, encrypted_at, error_kind, recoverable, first_seen_at
             FROM corrupted_documents ORDER BY first_seen_at",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(CorruptedDocument {
                id: row.get(0)?,
                encrypted_at: row.get::<_, i64>(1)? as u64,
                error_kind: row.get(2)?,
                recoverable: row.get::<_, i32>(3)? != 0,
                first_seen_at: row.get::<_, i64>(4)? as u64,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Counts corrupted-document records.
    pub fn count_corrupted(&self) -> Result<usize, StorageError> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM corrupted_documents", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_deduplicated_by_id() {
        let storage = Storage::in_memory().unwrap();

        storage
            .record_corrupted("doc-1", 10, "auth_tag_failure", false)
            .unwrap();
        storage
            .record_corrupted("doc-1", 20, "auth_tag_failure", false)
            .unwrap();

        let records = storage.list_corrupted().unwrap();
        assert_eq!(records.len(), 1);
        // First sighting wins
        assert_eq!(records[0].encrypted_at, 10);
        assert!(!records[0].recoverable);
    }

    #[test]
    fn test_distinct_ids_get_distinct_records() {
        let storage = Storage::in_memory().unwrap();

        storage
            .record_corrupted("doc-1", 1, "auth_tag_failure", false)
            .unwrap();
        storage
            .record_corrupted("doc-2", 2, "auth_tag_failure", false)
            .unwrap();

        assert_eq!(storage.count_corrupted().unwrap(), 2);
        assert!(storage.is_corrupted("doc-1").unwrap());
        assert!(!storage.is_corrupted("doc-3").unwrap());
    }
}
