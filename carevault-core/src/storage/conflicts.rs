// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conflict record storage operations.

use rusqlite::params;

use super::{unix_now, Storage, StorageError};

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// The local version was kept wholesale.
    Local,
    /// The remote version was kept wholesale.
    Remote,
    /// A per-field merge produced a new document.
    Merge,
}

impl ResolutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionKind::Local => "local",
            ResolutionKind::Remote => "remote",
            ResolutionKind::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ResolutionKind::Local),
            "remote" => Some(ResolutionKind::Remote),
            "merge" => Some(ResolutionKind::Merge),
            _ => None,
        }
    }
}

/// A divergence between a local edit and a remote update, captured with
/// both encrypted versions so resolution can happen later and offline.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub document_id: String,
    pub local_revision: String,
    pub remote_revision: String,
    pub local_document: Vec<u8>,
    pub remote_document: Vec<u8>,
    pub resolved: bool,
    pub resolution_kind: Option<ResolutionKind>,
    pub resolved_at: Option<u64>,
    pub created_at: u64,
}

impl Storage {
    // === Conflict Record Operations ===

    /// Records a conflict. The same (document, local, remote) revision pair
    /// is only recorded once.
    pub fn save_conflict(
        &self,
        document_id: &str,
        local_revision: &str,
        remote_revision: &str,
        local_document: &[u8],
        remote_document: &[u8],
    ) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO conflict_records
             (document_id, local_revision, remote_revision,
              local_document, remote_document, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                document_id,
                local_revision,
                remote_revision,
                local_document,
                remote_document,
                unix_now() as i64,
            ],
        )?;
        Ok(())
    }

    /// Lists unresolved conflicts, oldest first.
    pub fn unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT document_id, local_revision, remote_revision,
                    local_document, remote_document, resolved,
                    resolution_kind, resolved_at, created_at
             FROM conflict_records WHERE resolved = 0 ORDER BY created_at",
        )?;

        let rows = stmt.query_map([], row_to_conflict)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Gets a specific conflict by its revision pair.
    pub fn get_conflict(
        &self,
        document_id: &str,
        local_revision: &str,
        remote_revision: &str,
    ) -> Result<Option<ConflictRecord>, StorageError> {
        let result = self.conn().query_row(
            "SELECT document_id, local_revision, remote_revision,
                    local_document, remote_document, resolved,
                    resolution_kind, resolved_at, created_at
             FROM conflict_records
             WHERE document_id = ?1 AND local_revision = ?2 AND remote_revision = ?3",
            params![document_id, local_revision, remote_revision],
            row_to_conflict,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Marks a conflict resolved. Returns `false` if the record was already
    /// resolved or does not exist.
    pub fn mark_conflict_resolved(
        &self,
        document_id: &str,
        local_revision: &str,
        remote_revision: &str,
        kind: ResolutionKind,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE conflict_records
             SET resolved = 1, resolution_kind = ?1, resolved_at = ?2
             WHERE document_id = ?3 AND local_revision = ?4
               AND remote_revision = ?5 AND resolved = 0",
            params![
                kind.as_str(),
                unix_now() as i64,
                document_id,
                local_revision,
                remote_revision,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Counts unresolved conflicts.
    pub fn count_unresolved_conflicts(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conflict_records WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Converts a database row to a ConflictRecord.
fn row_to_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRecord> {
    let kind_str: Option<String> = row.get(6)?;
    Ok(ConflictRecord {
        document_id: row.get(0)?,
        local_revision: row.get(1)?,
        remote_revision: row.get(2)?,
        local_document: row.get(3)?,
        remote_document: row.get(4)?,
        resolved: row.get::<_, i32>(5)? != 0,
        resolution_kind: kind_str.as_deref().and_then(ResolutionKind::parse),
        resolved_at: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_conflict_recorded_once() {
        let storage = Storage::in_memory().unwrap();

        storage
            .save_conflict("doc-1", "2-aa", "2-bb", b"local", b"remote")
            .unwrap();
        storage
            .save_conflict("doc-1", "2-aa", "2-bb", b"local-again", b"remote-again")
            .unwrap();

        let conflicts = storage.unresolved_conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        // First capture wins
        assert_eq!(conflicts[0].local_document, b"local");
    }

    #[test]
    fn test_resolve_is_single_shot() {
        let storage = Storage::in_memory().unwrap();
        storage
            .save_conflict("doc-1", "2-aa", "2-bb", b"local", b"remote")
            .unwrap();

        assert!(storage
            .mark_conflict_resolved("doc-1", "2-aa", "2-bb", ResolutionKind::Merge)
            .unwrap());
        assert!(!storage
            .mark_conflict_resolved("doc-1", "2-aa", "2-bb", ResolutionKind::Local)
            .unwrap());

        let record = storage.get_conflict("doc-1", "2-aa", "2-bb").unwrap().unwrap();
        assert!(record.resolved);
        assert_eq!(record.resolution_kind, Some(ResolutionKind::Merge));
        assert_eq!(storage.count_unresolved_conflicts().unwrap(), 0);
    }
}
