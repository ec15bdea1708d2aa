// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key rotation and document re-encryption.
//!
//! A key version moves through `active -> rotating -> retired`. Rotation
//! always backs up the outgoing key before any document is touched by the
//! new one, so a migration that dies partway leaves every document
//! readable under a recoverable key.

use tracing::{info, warn};
use uuid::Uuid;

use super::{BackupManager, KeyError};
use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSeverity, AuditSink};
use crate::crypto::{decrypt, encrypt, SymmetricKey};
use crate::storage::{unix_now, KeyVersion, RotatedBy, Storage, StorageError};

/// When a key must be rotated. Either trigger alone forces rotation.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    /// Maximum key age in seconds.
    pub max_age_secs: u64,
    /// Maximum encrypt/decrypt operations under one key.
    pub max_usage: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy {
            max_age_secs: 30 * 24 * 60 * 60,
            max_usage: 1000,
        }
    }
}

impl RotationPolicy {
    pub fn is_due(&self, version: &KeyVersion, now: u64) -> bool {
        now.saturating_sub(version.created_at) > self.max_age_secs
            || version.usage_count > self.max_usage
    }
}

/// One document that could not be migrated.
#[derive(Debug, Clone)]
pub struct MigrationError {
    pub document_id: String,
    pub reason: String,
}

/// Outcome of a rotation pass.
///
/// Partial failure leaves the system usable: documents listed in `errors`
/// stay encrypted under the previous key until retried.
#[derive(Debug)]
pub struct MigrationReport {
    pub new_key_id: String,
    pub previous_key_id: String,
    pub migrated_count: usize,
    pub errors: Vec<MigrationError>,
}

impl MigrationReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drives key registration and rotation against a store.
pub struct KeyLifecycle<'a> {
    storage: &'a Storage,
    audit: &'a dyn AuditSink,
}

impl<'a> KeyLifecycle<'a> {
    pub fn new(storage: &'a Storage, audit: &'a dyn AuditSink) -> Self {
        KeyLifecycle { storage, audit }
    }

    /// Registers the first key version and activates it.
    pub fn register_initial_key(&self, key: &SymmetricKey) -> Result<KeyVersion, KeyError> {
        let key_id = Uuid::new_v4().to_string();
        let version = KeyVersion {
            key_id: key_id.clone(),
            version: self.storage.max_key_version()? + 1,
            created_at: unix_now(),
            rotated_at: None,
            rotated_by: RotatedBy::Manual,
            key_fingerprint: key.fingerprint(),
            is_active: false,
            usage_count: 0,
        };
        self.storage.insert_key_version(&version)?;
        self.storage.activate_key_version(&key_id)?;

        self.storage
            .get_key_version(&key_id)?
            .ok_or_else(|| KeyError::NotFound(key_id))
    }

    /// Whether the active key has hit a rotation trigger.
    ///
    /// `false` when no key is registered yet; registration is not rotation.
    pub fn rotation_due(&self, policy: &RotationPolicy) -> Result<bool, KeyError> {
        match self.storage.active_key_version()? {
            Some(active) => Ok(policy.is_due(&active, unix_now())),
            None => Ok(false),
        }
    }

    /// Rotates to a new key and re-encrypts every stored document.
    ///
    /// Order matters: the old key is backed up (wrapped under the
    /// passphrase-derived key) before the new version is activated or any
    /// ciphertext changes. A single unreadable document is recorded in the
    /// report and does not abort the run.
    pub fn rotate_and_migrate(
        &self,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
        backup_passphrase: &[u8],
        rotated_by: RotatedBy,
    ) -> Result<MigrationReport, KeyError> {
        let previous = self
            .storage
            .active_key_version()?
            .ok_or(KeyError::Unavailable)?;

        BackupManager::new(self.storage).create_backup(
            &previous.key_id,
            old_key,
            backup_passphrase,
        )?;

        let new_key_id = Uuid::new_v4().to_string();
        self.storage.insert_key_version(&KeyVersion {
            key_id: new_key_id.clone(),
            version: self.storage.max_key_version()? + 1,
            created_at: unix_now(),
            rotated_at: None,
            rotated_by,
            key_fingerprint: new_key.fingerprint(),
            is_active: false,
            usage_count: 0,
        })?;
        self.storage.activate_key_version(&new_key_id)?;

        let mut migrated_count = 0;
        let mut errors = Vec::new();

        for document in self.storage.all_raw()? {
            match self.migrate_document(&document.id, old_key, new_key) {
                Ok(true) => migrated_count += 1,
                // Concurrently rewritten under the now-active key; the
                // writer wins and there is nothing left to migrate.
                Ok(false) => migrated_count += 1,
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "document migration failed");
                    errors.push(MigrationError {
                        document_id: document.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.storage.reset_key_usage(&new_key_id)?;

        let report = MigrationReport {
            new_key_id,
            previous_key_id: previous.key_id,
            migrated_count,
            errors,
        };

        info!(
            new_key_id = %report.new_key_id,
            migrated = report.migrated_count,
            failed = report.errors.len(),
            "key rotation complete"
        );
        self.audit.record(AuditEvent::new(
            AuditEventKind::KeyRotation,
            AuditSeverity::Critical,
            "key_lifecycle",
            format!(
                "rotated {} -> {} ({}): migrated {}, failed {}",
                report.previous_key_id,
                report.new_key_id,
                rotated_by.as_str(),
                report.migrated_count,
                report.errors.len()
            ),
            if report.success() {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            },
        ));

        Ok(report)
    }

    /// Re-encrypts one document. Returns Ok(false) when a concurrent
    /// writer superseded the row mid-migration.
    fn migrate_document(
        &self,
        id: &str,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
    ) -> Result<bool, KeyError> {
        let document = match self.storage.fetch_raw(id)? {
            Some(d) if !d.deleted => d,
            // Deleted or vanished since enumeration
            _ => return Ok(false),
        };

        let plaintext =
            decrypt(old_key, &document.ciphertext).map_err(|e| KeyError::Crypto(e.to_string()))?;
        let ciphertext =
            encrypt(new_key, &plaintext).map_err(|e| KeyError::Crypto(e.to_string()))?;

        match self
            .storage
            .replace_ciphertext(id, &document.revision, &ciphertext, unix_now())
        {
            Ok(_) => Ok(true),
            Err(StorageError::RevisionConflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::crypto::content_digest;

    fn put_plaintext(storage: &Storage, key: &SymmetricKey, id: &str, body: &[u8]) {
        let ciphertext = encrypt(key, body).unwrap();
        storage
            .put_raw(id, None, &ciphertext, &content_digest(body), unix_now())
            .unwrap();
    }

    #[test]
    fn test_rotation_policy_triggers() {
        let policy = RotationPolicy::default();
        let version = KeyVersion {
            key_id: "k1".into(),
            version: 1,
            created_at: 1000,
            rotated_at: None,
            rotated_by: RotatedBy::Manual,
            key_fingerprint: String::new(),
            is_active: true,
            usage_count: 0,
        };

        assert!(!policy.is_due(&version, 1000));
        // Age trigger
        assert!(policy.is_due(&version, 1000 + policy.max_age_secs + 1));
        // Usage trigger
        let worn = KeyVersion {
            usage_count: policy.max_usage + 1,
            ..version
        };
        assert!(policy.is_due(&worn, 1001));
    }

    #[test]
    fn test_rotate_migrates_all_documents() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let lifecycle = KeyLifecycle::new(&storage, &audit);

        let old_key = SymmetricKey::generate();
        let new_key = SymmetricKey::generate();
        lifecycle.register_initial_key(&old_key).unwrap();

        put_plaintext(&storage, &old_key, "doc-1", b"{\"a\":1}");
        put_plaintext(&storage, &old_key, "doc-2", b"{\"b\":2}");

        let report = lifecycle
            .rotate_and_migrate(&old_key, &new_key, b"backup pass", RotatedBy::Manual)
            .unwrap();

        assert!(report.success());
        assert_eq!(report.migrated_count, 2);

        // Everything readable under the new key, nothing under the old
        for id in ["doc-1", "doc-2"] {
            let doc = storage.fetch_raw(id).unwrap().unwrap();
            assert!(decrypt(&new_key, &doc.ciphertext).is_ok());
            assert!(decrypt(&old_key, &doc.ciphertext).is_err());
        }

        // Exactly one active version, usage reset
        let active = storage.active_key_version().unwrap().unwrap();
        assert_eq!(active.key_id, report.new_key_id);
        assert_eq!(active.usage_count, 0);

        assert_eq!(audit.count_of(AuditEventKind::KeyRotation), 1);
    }

    #[test]
    fn test_unreadable_document_reported_not_fatal() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let lifecycle = KeyLifecycle::new(&storage, &audit);

        let old_key = SymmetricKey::generate();
        let new_key = SymmetricKey::generate();
        lifecycle.register_initial_key(&old_key).unwrap();

        put_plaintext(&storage, &old_key, "good", b"fine");
        // Encrypted under an unrelated key: unreadable during migration
        put_plaintext(&storage, &SymmetricKey::generate(), "bad", b"broken");

        let report = lifecycle
            .rotate_and_migrate(&old_key, &new_key, b"pass", RotatedBy::Automatic)
            .unwrap();

        assert!(!report.success());
        assert_eq!(report.migrated_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].document_id, "bad");

        // System stays queryable afterward
        let good = storage.fetch_raw("good").unwrap().unwrap();
        assert!(decrypt(&new_key, &good.ciphertext).is_ok());
    }

    #[test]
    fn test_old_key_recoverable_from_backup_after_rotation() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let lifecycle = KeyLifecycle::new(&storage, &audit);

        let old_key = SymmetricKey::generate();
        let initial = lifecycle.register_initial_key(&old_key).unwrap();

        lifecycle
            .rotate_and_migrate(
                &old_key,
                &SymmetricKey::generate(),
                b"recovery phrase",
                RotatedBy::Manual,
            )
            .unwrap();

        let restored = BackupManager::new(&storage)
            .restore_backup(&initial.key_id, b"recovery phrase")
            .unwrap();
        assert_eq!(restored.as_bytes(), old_key.as_bytes());
    }

    #[test]
    fn test_rotation_due_false_without_registered_key() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let lifecycle = KeyLifecycle::new(&storage, &audit);
        assert!(!lifecycle.rotation_due(&RotationPolicy::default()).unwrap());
    }
}
