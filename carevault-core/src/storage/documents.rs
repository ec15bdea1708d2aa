// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ciphertext document storage with per-document revision CAS.
//!
//! Writes only apply when the caller's expected revision matches the
//! stored one; a stale revision is a `RevisionConflict`, never silently
//! applied. Deletes are tombstones so they replicate like any other write.

use ring::digest;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{ConflictRecord, Storage, StorageError};

/// Opaque revision token: `generation-digest`.
///
/// The generation is monotonic per document id; the digest ties the token
/// to the exact ciphertext it was assigned for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision(String);

impl Revision {
    /// Number of digest bytes embedded in the token.
    const DIGEST_BYTES: usize = 16;

    /// Parses a revision token, validating its shape.
    pub fn parse(token: &str) -> Result<Self, StorageError> {
        let (gen_part, digest_part) = token
            .split_once('-')
            .ok_or_else(|| StorageError::InvalidRevision(token.to_string()))?;

        if gen_part.parse::<u64>().is_err()
            || digest_part.len() != Self::DIGEST_BYTES * 2
            || !digest_part.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(StorageError::InvalidRevision(token.to_string()));
        }

        Ok(Revision(token.to_string()))
    }

    /// Derives the next revision for a document from its predecessor generation.
    pub(crate) fn next(prev_generation: u64, id: &str, ciphertext: &[u8]) -> Self {
        let generation = prev_generation + 1;

        let mut material = Vec::with_capacity(8 + id.len() + ciphertext.len());
        material.extend_from_slice(&generation.to_be_bytes());
        material.extend_from_slice(id.as_bytes());
        material.extend_from_slice(ciphertext);

        let hash = digest::digest(&digest::SHA256, &material);
        let suffix = hex::encode(&hash.as_ref()[..Self::DIGEST_BYTES]);

        Revision(format!("{}-{}", generation, suffix))
    }

    /// Returns the monotonic generation part of the token.
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(g, _)| g.parse().ok())
            .unwrap_or(0)
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_stored(token: String) -> Self {
        Revision(token)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored document as the storage layer sees it: ciphertext plus
/// replication metadata, no plaintext.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub id: String,
    pub revision: Revision,
    pub ciphertext: Vec<u8>,
    /// SHA-256 of the plaintext content (non-reversible).
    pub content_digest: Vec<u8>,
    pub encrypted_at: u64,
    pub deleted: bool,
    /// True when this write has not yet been pushed to the remote.
    pub pending: bool,
}

/// Outcome of [`Storage::apply_remote_guarded`].
#[derive(Debug)]
pub enum RemoteApply {
    /// Stored verbatim, pending flag cleared.
    Applied,
    /// Local already holds this revision.
    AlreadyCurrent,
    /// A pending local edit collides; the divergence was recorded.
    Conflicted(ConflictRecord),
}

impl Storage {
    // === Document CAS Operations ===

    /// Fetches a document row by id, including tombstones.
    pub fn fetch_raw(&self, id: &str) -> Result<Option<RawDocument>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT id, revision, ciphertext, content_digest, encrypted_at, deleted, pending
             FROM documents WHERE id = ?1",
        )?;

        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_raw_document(row)?)),
            None => Ok(None),
        }
    }

    /// Writes a document with compare-and-swap on the revision.
    ///
    /// `expected` must be `None` for a fresh id (or one whose latest state
    /// is a tombstone) and must equal the stored revision otherwise.
    /// Returns the newly assigned revision; marks the document pending push.
    pub fn put_raw(
        &self,
        id: &str,
        expected: Option<&Revision>,
        ciphertext: &[u8],
        content_digest: &[u8],
        encrypted_at: u64,
    ) -> Result<Revision, StorageError> {
        // Check and write share one IMMEDIATE transaction so concurrent
        // writers on other connections cannot both pass the same check.
        self.immediate(|| {
            let current = self.fetch_raw(id)?;

            let prev_generation = match (&current, expected) {
                (None, None) => 0,
                (None, Some(_)) => return Err(StorageError::RevisionConflict(id.to_string())),
                (Some(cur), None) => {
                    if !cur.deleted {
                        return Err(StorageError::RevisionConflict(id.to_string()));
                    }
                    cur.revision.generation()
                }
                (Some(cur), Some(exp)) => {
                    if cur.deleted || cur.revision != *exp {
                        return Err(StorageError::RevisionConflict(id.to_string()));
                    }
                    cur.revision.generation()
                }
            };

            let revision = Revision::next(prev_generation, id, ciphertext);

            self.conn().execute(
                "INSERT OR REPLACE INTO documents
                 (id, revision, ciphertext, content_digest, encrypted_at, deleted, pending)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 1)",
                params![
                    id,
                    revision.as_str(),
                    ciphertext,
                    content_digest,
                    encrypted_at as i64,
                ],
            )?;

            Ok(revision)
        })
    }

    /// Tombstones a document with compare-and-swap on the revision.
    pub fn delete_raw(&self, id: &str, expected: &Revision) -> Result<Revision, StorageError> {
        self.immediate(|| {
            let current = self
                .fetch_raw(id)?
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

            if current.deleted || current.revision != *expected {
                return Err(StorageError::RevisionConflict(id.to_string()));
            }

            let revision = Revision::next(current.revision.generation(), id, &[]);

            self.conn().execute(
                "UPDATE documents
                 SET revision = ?1, ciphertext = x'', content_digest = x'',
                     deleted = 1, pending = 1
                 WHERE id = ?2",
                params![revision.as_str(), id],
            )?;

            Ok(revision)
        })
    }

    /// Bypass write used by conflict resolution.
    ///
    /// Supersedes both ancestor revisions with a merged document without
    /// going through CAS: the merge itself is the arbitration, so a new
    /// conflicting edit must not be created. The new generation is one past
    /// the greater ancestor generation.
    pub fn store_resolved(
        &self,
        id: &str,
        local_revision: &Revision,
        remote_revision: &Revision,
        ciphertext: &[u8],
        content_digest: &[u8],
        encrypted_at: u64,
    ) -> Result<Revision, StorageError> {
        let base = local_revision
            .generation()
            .max(remote_revision.generation());
        let revision = Revision::next(base, id, ciphertext);

        self.conn().execute(
            "INSERT OR REPLACE INTO documents
             (id, revision, ciphertext, content_digest, encrypted_at, deleted, pending)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 1)",
            params![
                id,
                revision.as_str(),
                ciphertext,
                content_digest,
                encrypted_at as i64,
            ],
        )?;

        Ok(revision)
    }

    /// Replaces a document's ciphertext in place during key migration.
    ///
    /// CAS on the revision like `put_raw`, but preserves the pending flag:
    /// re-encryption alone does not make a document "locally edited", yet
    /// the new ciphertext must replicate, so pending is always set.
    pub fn replace_ciphertext(
        &self,
        id: &str,
        expected: &Revision,
        ciphertext: &[u8],
        encrypted_at: u64,
    ) -> Result<Revision, StorageError> {
        self.immediate(|| {
            let current = self
                .fetch_raw(id)?
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

            if current.deleted || current.revision != *expected {
                return Err(StorageError::RevisionConflict(id.to_string()));
            }

            let revision = Revision::next(current.revision.generation(), id, ciphertext);

            self.conn().execute(
                "UPDATE documents
                 SET revision = ?1, ciphertext = ?2, encrypted_at = ?3, pending = 1
                 WHERE id = ?4",
                params![revision.as_str(), ciphertext, encrypted_at as i64, id],
            )?;

            Ok(revision)
        })
    }

    /// Applies a remote document verbatim (revision and ciphertext as
    /// received), clearing the pending flag.
    ///
    /// Performs no collision check; callers that may race a local edit go
    /// through [`Storage::apply_remote_guarded`] instead.
    pub fn apply_remote(
        &self,
        id: &str,
        revision: &Revision,
        ciphertext: &[u8],
        content_digest: &[u8],
        encrypted_at: u64,
        deleted: bool,
    ) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO documents
             (id, revision, ciphertext, content_digest, encrypted_at, deleted, pending)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                id,
                revision.as_str(),
                ciphertext,
                content_digest,
                encrypted_at as i64,
                deleted as i32,
            ],
        )?;
        Ok(())
    }

    /// Applies a pulled remote document, running the pending-edit check and
    /// the write in one IMMEDIATE transaction.
    ///
    /// A pending local edit is never overwritten: the divergence is filed
    /// as a conflict record and the stored row stays untouched.
    pub fn apply_remote_guarded(
        &self,
        id: &str,
        revision: &Revision,
        ciphertext: &[u8],
        content_digest: &[u8],
        encrypted_at: u64,
        deleted: bool,
    ) -> Result<RemoteApply, StorageError> {
        self.immediate(|| match self.fetch_raw(id)? {
            Some(ref current) if current.revision == *revision => Ok(RemoteApply::AlreadyCurrent),
            Some(ref current) if current.pending => {
                self.save_conflict(
                    id,
                    current.revision.as_str(),
                    revision.as_str(),
                    &current.ciphertext,
                    ciphertext,
                )?;
                let record = self
                    .get_conflict(id, current.revision.as_str(), revision.as_str())?
                    .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
                Ok(RemoteApply::Conflicted(record))
            }
            _ => {
                self.apply_remote(id, revision, ciphertext, content_digest, encrypted_at, deleted)?;
                Ok(RemoteApply::Applied)
            }
        })
    }

    /// Returns all live (non-tombstoned) document ids.
    pub fn all_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM documents WHERE deleted = 0 ORDER BY id")?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Returns all live document rows.
    pub fn all_raw(&self) -> Result<Vec<RawDocument>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT id, revision, ciphertext, content_digest, encrypted_at, deleted, pending
             FROM documents WHERE deleted = 0 ORDER BY id",
        )?;

        let rows = stmt.query_map([], row_to_raw_document)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Returns all rows awaiting push, tombstones included.
    pub fn pending_push(&self) -> Result<Vec<RawDocument>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT id, revision, ciphertext, content_digest, encrypted_at, deleted, pending
             FROM documents WHERE pending = 1 ORDER BY id",
        )?;

        let rows = stmt.query_map([], row_to_raw_document)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Clears the pending flag for a document, but only if its revision is
    /// still the one that was pushed (a newer local edit stays pending).
    pub fn mark_pushed(&self, id: &str, revision: &Revision) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE documents SET pending = 0 WHERE id = ?1 AND revision = ?2",
            params![id, revision.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Counts live documents.
    pub fn count_documents(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM documents WHERE deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Converts a database row to a RawDocument.
fn row_to_raw_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDocument> {
    Ok(RawDocument {
        id: row.get(0)?,
        revision: Revision::from_stored(row.get(1)?),
        ciphertext: row.get(2)?,
        content_digest: row.get(3)?,
        encrypted_at: row.get::<_, i64>(4)? as u64,
        deleted: row.get::<_, i32>(5)? != 0,
        pending: row.get::<_, i32>(6)? != 0,
    })
}
