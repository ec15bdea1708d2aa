// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Encrypted document store.
//!
//! Callers hand in plaintext JSON documents and get plaintext back; every
//! byte that touches the underlying storage is encrypted. The store holds
//! no key of its own: it asks its [`KeyManager`] on every operation, and
//! emits one audit event per encrypt/decrypt.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSeverity, AuditSink};
use crate::crypto::{content_digest, decrypt, encrypt, SymmetricKey};
use crate::keys::{KeyError, KeyManager};
use crate::resolver::{resolve, MergeDecision, StrategyTable};
use crate::storage::{
    unix_now, ConflictRecord, RawDocument, ResolutionKind, Revision, Storage, StorageError,
};

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrong or rotated key, or corrupted ciphertext. The document is
    /// present but unreadable; a Corrupted Document record was filed.
    #[error("Document not decryptable: {0}")]
    NotDecryptable(String),

    /// Stale revision. Retryable: re-read and resubmit.
    #[error("Revision conflict on document: {0}")]
    Conflict(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    /// No encryption key. Fatal: no store operation proceeds.
    #[error("No encryption key available")]
    KeyUnavailable,

    #[error("Invalid document content: {0}")]
    InvalidContent(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<KeyError> for StoreError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::Unavailable => StoreError::KeyUnavailable,
            other => StoreError::InvalidContent(other.to_string()),
        }
    }
}

/// A plaintext document as callers see it.
///
/// `revision` is `None` until the document is first written; a read
/// returns the stored revision, which must accompany the next write.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub revision: Option<Revision>,
    pub content: Value,
    /// Plaintext digest at the time this document was read, used to tell
    /// a stale cached revision from a true concurrent edit.
    base_digest: Option<Vec<u8>>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: Value) -> Self {
        Document {
            id: id.into(),
            revision: None,
            content,
            base_digest: None,
        }
    }
}

/// Encryption wrapper over the revisioned document storage.
pub struct EncryptedStore<'a> {
    storage: &'a Storage,
    keys: &'a dyn KeyManager,
    audit: &'a dyn AuditSink,
}

impl<'a> EncryptedStore<'a> {
    /// Opens the store, refusing if no encryption key is available.
    pub fn new(
        storage: &'a Storage,
        keys: &'a dyn KeyManager,
        audit: &'a dyn AuditSink,
    ) -> Result<Self, StoreError> {
        keys.ensure_key()?;
        Ok(EncryptedStore {
            storage,
            keys,
            audit,
        })
    }

    /// Writes a document, encrypting its content under the current key.
    ///
    /// The revision carried by `document` is compare-and-swapped against
    /// the stored one. If the CAS fails but the stored plaintext digest
    /// still matches what this caller last read, the revision was merely
    /// stale (e.g. a key migration re-encrypted the row) and the write is
    /// retried once against the latest revision. A digest mismatch means a
    /// real concurrent edit and surfaces as [`StoreError::Conflict`].
    pub fn put(&self, document: &Document) -> Result<Document, StoreError> {
        let key = self.keys.ensure_key()?;

        let plaintext = serde_json::to_vec(&document.content)
            .map_err(|e| StoreError::InvalidContent(e.to_string()))?;
        let digest = content_digest(&plaintext);
        let ciphertext = self.encrypt_audited(&key, &document.id, &plaintext)?;

        let revision = match self.storage.put_raw(
            &document.id,
            document.revision.as_ref(),
            &ciphertext,
            &digest,
            unix_now(),
        ) {
            Ok(rev) => rev,
            Err(StorageError::RevisionConflict(_)) => {
                self.retry_stale_put(document, &ciphertext, &digest)?
            }
            Err(e) => return Err(e.into()),
        };

        self.storage.increment_active_key_usage()?;
        debug!(document_id = %document.id, revision = %revision, "document written");

        Ok(Document {
            id: document.id.clone(),
            revision: Some(revision),
            content: document.content.clone(),
            base_digest: Some(digest),
        })
    }

    fn retry_stale_put(
        &self,
        document: &Document,
        ciphertext: &[u8],
        digest: &[u8],
    ) -> Result<Revision, StoreError> {
        let current = self
            .storage
            .fetch_raw(&document.id)?
            .ok_or_else(|| StoreError::Conflict(document.id.clone()))?;

        let unchanged = !current.deleted
            && document
                .base_digest
                .as_deref()
                .is_some_and(|base| base == current.content_digest);
        if !unchanged {
            return Err(StoreError::Conflict(document.id.clone()));
        }

        // One retry only; a second conflict means a live concurrent writer.
        self.storage
            .put_raw(
                &document.id,
                Some(&current.revision),
                ciphertext,
                digest,
                unix_now(),
            )
            .map_err(|e| match e {
                StorageError::RevisionConflict(id) => StoreError::Conflict(id),
                other => StoreError::Storage(other),
            })
    }

    /// Reads and decrypts a document.
    ///
    /// A present-but-unreadable document is [`StoreError::NotDecryptable`]
    /// and files a Corrupted Document record; that is distinct from
    /// [`StoreError::NotFound`].
    pub fn get(&self, id: &str) -> Result<Document, StoreError> {
        let raw = self
            .storage
            .fetch_raw(id)?
            .filter(|d| !d.deleted)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let key = self.keys.ensure_key()?;
        let document = self.decrypt_document(&key, &raw)?;
        self.storage.increment_active_key_usage()?;
        Ok(document)
    }

    /// Reads every live document, skipping (and recording) unreadable
    /// ones. One corrupted document never aborts enumeration of the rest.
    pub fn all(&self) -> Result<Vec<Document>, StoreError> {
        let key = self.keys.ensure_key()?;

        let mut documents = Vec::new();
        for raw in self.storage.all_raw()? {
            match self.decrypt_document(&key, &raw) {
                Ok(doc) => {
                    self.storage.increment_active_key_usage()?;
                    documents.push(doc);
                }
                Err(StoreError::NotDecryptable(_)) => {
                    warn!(document_id = %raw.id, "skipping unreadable document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(documents)
    }

    /// Reads all documents whose content matches a predicate.
    pub fn find<F>(&self, predicate: F) -> Result<Vec<Document>, StoreError>
    where
        F: Fn(&Value) -> bool,
    {
        let mut documents = self.all()?;
        documents.retain(|d| predicate(&d.content));
        Ok(documents)
    }

    /// Tombstones a document. Stale revision is a retryable conflict.
    pub fn delete(&self, id: &str, revision: &Revision) -> Result<(), StoreError> {
        match self.storage.delete_raw(id, revision) {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound(id)) => Err(StoreError::NotFound(id)),
            Err(StorageError::RevisionConflict(id)) => Err(StoreError::Conflict(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Unresolved conflicts awaiting operator or automatic resolution.
    pub fn unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        Ok(self.storage.unresolved_conflicts()?)
    }

    /// Resolves a recorded conflict with a per-field merge.
    ///
    /// The merged document is written through a store bypass that
    /// supersedes both ancestor revisions, so resolution never spawns a
    /// new conflicting edit. The audit record naming the changed fields
    /// and both source revisions is unconditional; it is the only later
    /// reconstruction of what the merge did.
    pub fn resolve_conflict(
        &self,
        record: &ConflictRecord,
        table: &StrategyTable,
    ) -> Result<Document, StoreError> {
        let key = self.keys.ensure_key()?;

        let local = self.decrypt_conflict_side(&key, record, &record.local_document)?;
        self.storage.increment_active_key_usage()?;
        let remote = self.decrypt_conflict_side(&key, record, &record.remote_document)?;
        self.storage.increment_active_key_usage()?;

        let outcome = resolve(&local, &remote, table);
        let kind = match outcome.decision {
            MergeDecision::Local => ResolutionKind::Local,
            MergeDecision::Remote => ResolutionKind::Remote,
            MergeDecision::Merge => ResolutionKind::Merge,
        };

        let plaintext = serde_json::to_vec(&outcome.merged)
            .map_err(|e| StoreError::InvalidContent(e.to_string()))?;
        let digest = content_digest(&plaintext);
        let ciphertext = self.encrypt_audited(&key, &record.document_id, &plaintext)?;
        self.storage.increment_active_key_usage()?;

        let local_revision = Revision::parse(&record.local_revision)?;
        let remote_revision = Revision::parse(&record.remote_revision)?;
        let revision = self.storage.store_resolved(
            &record.document_id,
            &local_revision,
            &remote_revision,
            &ciphertext,
            &digest,
            unix_now(),
        )?;

        self.storage.mark_conflict_resolved(
            &record.document_id,
            &record.local_revision,
            &record.remote_revision,
            kind,
        )?;

        self.audit.record(AuditEvent::new(
            AuditEventKind::ConflictResolution,
            AuditSeverity::Warning,
            "store",
            format!(
                "document {} merged ({}) from local {} and remote {}; changed fields: [{}]",
                record.document_id,
                kind.as_str(),
                record.local_revision,
                record.remote_revision,
                outcome.changed_fields.join(", ")
            ),
            AuditOutcome::Success,
        ));

        Ok(Document {
            id: record.document_id.clone(),
            revision: Some(revision),
            content: outcome.merged,
            base_digest: Some(digest),
        })
    }

    fn decrypt_conflict_side(
        &self,
        key: &SymmetricKey,
        record: &ConflictRecord,
        ciphertext: &[u8],
    ) -> Result<Value, StoreError> {
        let plaintext = decrypt(key, ciphertext).map_err(|e| {
            StoreError::NotDecryptable(format!(
                "conflict side for {}: {}",
                record.document_id, e
            ))
        })?;
        serde_json::from_slice(&plaintext).map_err(|e| StoreError::InvalidContent(e.to_string()))
    }

    fn encrypt_audited(
        &self,
        key: &SymmetricKey,
        id: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, StoreError> {
        match encrypt(key, plaintext) {
            Ok(ciphertext) => {
                self.audit.record(AuditEvent::new(
                    AuditEventKind::Encrypt,
                    AuditSeverity::Info,
                    "store",
                    format!("document {}", id),
                    AuditOutcome::Success,
                ));
                Ok(ciphertext)
            }
            Err(e) => {
                self.audit.record(AuditEvent::new(
                    AuditEventKind::Encrypt,
                    AuditSeverity::Critical,
                    "store",
                    format!("document {}: {}", id, e),
                    AuditOutcome::Failure,
                ));
                Err(StoreError::InvalidContent(e.to_string()))
            }
        }
    }

    fn decrypt_document(
        &self,
        key: &SymmetricKey,
        raw: &RawDocument,
    ) -> Result<Document, StoreError> {
        let plaintext = match decrypt(key, &raw.ciphertext) {
            Ok(p) => {
                self.audit.record(AuditEvent::new(
                    AuditEventKind::Decrypt,
                    AuditSeverity::Info,
                    "store",
                    format!("document {}", raw.id),
                    AuditOutcome::Success,
                ));
                p
            }
            Err(e) => {
                self.audit.record(AuditEvent::new(
                    AuditEventKind::Decrypt,
                    AuditSeverity::Critical,
                    "store",
                    format!("document {}: {}", raw.id, e),
                    AuditOutcome::Failure,
                ));
                // A single failed read cannot tell a wrong key apart from
                // damaged ciphertext; never claim recoverability here.
                self.storage
                    .record_corrupted(&raw.id, raw.encrypted_at, e.kind(), false)?;
                return Err(StoreError::NotDecryptable(raw.id.clone()));
            }
        };

        let content: Value = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::InvalidContent(e.to_string()))?;

        Ok(Document {
            id: raw.id.clone(),
            revision: Some(raw.revision.clone()),
            content,
            base_digest: Some(raw.content_digest.clone()),
        })
    }
}
