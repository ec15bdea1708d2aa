// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key provider trait.
//!
//! The store never derives, caches or persists key material itself; it
//! asks a [`KeyManager`] for the key on every operation. That keeps the
//! key's lifetime in the caller's hands and out of the store's.

use super::{KeyError, SecureStorage};
use crate::crypto::SymmetricKey;

/// Supplies the active data-encryption key on demand.
pub trait KeyManager: Send + Sync {
    /// Returns the key if one is currently available.
    fn current_key(&self) -> Option<SymmetricKey>;

    /// Returns the key, failing with [`KeyError::Unavailable`] when none
    /// can be produced.
    fn ensure_key(&self) -> Result<SymmetricKey, KeyError> {
        self.current_key().ok_or(KeyError::Unavailable)
    }
}

/// Key manager holding a fixed in-memory key.
pub struct StaticKeyManager {
    key: SymmetricKey,
}

impl StaticKeyManager {
    pub fn new(key: SymmetricKey) -> Self {
        StaticKeyManager { key }
    }
}

impl KeyManager for StaticKeyManager {
    fn current_key(&self) -> Option<SymmetricKey> {
        Some(self.key.clone())
    }
}

/// Key manager backed by a [`SecureStorage`] entry.
///
/// Loads the key fresh on every request rather than holding a copy.
pub struct StoredKeyManager<S: SecureStorage> {
    storage: S,
    entry_name: String,
}

impl<S: SecureStorage> StoredKeyManager<S> {
    pub fn new(storage: S, entry_name: impl Into<String>) -> Self {
        StoredKeyManager {
            storage,
            entry_name: entry_name.into(),
        }
    }

    /// Generates and persists a fresh key if none is stored yet.
    /// Returns the key now in effect.
    pub fn initialize(&self) -> Result<SymmetricKey, KeyError> {
        if let Some(existing) = self.load()? {
            return Ok(existing);
        }
        let key = SymmetricKey::generate();
        self.storage.save_key(&self.entry_name, key.as_bytes())?;
        Ok(key)
    }

    /// Replaces the stored key. Used by rotation.
    pub fn replace(&self, key: &SymmetricKey) -> Result<(), KeyError> {
        self.storage.save_key(&self.entry_name, key.as_bytes())?;
        Ok(())
    }

    fn load(&self) -> Result<Option<SymmetricKey>, KeyError> {
        let bytes = match self.storage.load_key(&self.entry_name)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Crypto("stored key has wrong length".to_string()))?;
        Ok(Some(SymmetricKey::from_bytes(bytes)))
    }
}

impl<S: SecureStorage> KeyManager for StoredKeyManager<S> {
    fn current_key(&self) -> Option<SymmetricKey> {
        self.load().ok().flatten()
    }

    fn ensure_key(&self) -> Result<SymmetricKey, KeyError> {
        self.load()?.ok_or(KeyError::Unavailable)
    }
}
