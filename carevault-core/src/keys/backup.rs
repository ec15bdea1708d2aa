// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Passphrase-protected key backups.
//!
//! A backup is the data-encryption key wrapped under a key derived from a
//! user-held passphrase. Backups expire after a TTL and are purged lazily
//! when accessed, never by a background timer that could race a restore.

use ring::rand::{SecureRandom, SystemRandom};

use super::KeyError;
use crate::crypto::{decrypt, derive_wrapping_key, encrypt, SymmetricKey};
use crate::storage::{unix_now, KeyBackup, Storage};

/// Default backup lifetime: 90 days.
pub const DEFAULT_BACKUP_TTL_SECS: u64 = 90 * 24 * 60 * 60;

const SALT_LEN: usize = 16;

/// Creates and restores wrapped key backups.
pub struct BackupManager<'a> {
    storage: &'a Storage,
    ttl_secs: u64,
}

impl<'a> BackupManager<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        BackupManager {
            storage,
            ttl_secs: DEFAULT_BACKUP_TTL_SECS,
        }
    }

    pub fn with_ttl(storage: &'a Storage, ttl_secs: u64) -> Self {
        BackupManager { storage, ttl_secs }
    }

    /// Wraps a key under a passphrase-derived key and stores the backup.
    /// Replaces any previous backup for the same key id.
    pub fn create_backup(
        &self,
        key_id: &str,
        key: &SymmetricKey,
        passphrase: &[u8],
    ) -> Result<(), KeyError> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| KeyError::Crypto("salt generation failed".to_string()))?;

        let wrapping_key = derive_wrapping_key(passphrase, &salt)
            .map_err(|e| KeyError::Crypto(e.to_string()))?;
        let wrapped_key = encrypt(&wrapping_key, key.as_bytes())
            .map_err(|e| KeyError::Crypto(e.to_string()))?;

        let now = unix_now();
        self.storage.save_key_backup(&KeyBackup {
            key_id: key_id.to_string(),
            wrapped_key,
            salt: salt.to_vec(),
            created_at: now,
            expires_at: now + self.ttl_secs,
        })?;
        Ok(())
    }

    /// Unwraps a backed-up key.
    ///
    /// An expired backup is purged on access and reported as `Expired`,
    /// distinct from a backup that never existed.
    pub fn restore_backup(
        &self,
        key_id: &str,
        passphrase: &[u8],
    ) -> Result<SymmetricKey, KeyError> {
        let backup = self
            .storage
            .load_key_backup(key_id)?
            .ok_or_else(|| KeyError::NotFound(format!("no backup for key {}", key_id)))?;

        let now = unix_now();
        if now >= backup.expires_at {
            self.storage.delete_key_backup(key_id)?;
            return Err(KeyError::Expired(format!("backup for key {}", key_id)));
        }

        let wrapping_key = derive_wrapping_key(passphrase, &backup.salt)
            .map_err(|e| KeyError::Crypto(e.to_string()))?;
        let key_bytes = decrypt(&wrapping_key, &backup.wrapped_key)
            .map_err(|_| KeyError::Crypto("backup unwrap failed (wrong passphrase?)".to_string()))?;

        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| KeyError::Crypto("backup contains malformed key".to_string()))?;
        Ok(SymmetricKey::from_bytes(key_bytes))
    }
}
