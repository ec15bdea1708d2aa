// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Secure at-rest storage for key material.
//!
//! Uses OS keychains (macOS Keychain, Linux Secret Service, Windows
//! Credential Manager) when the `secure-storage` feature is on, with an
//! encrypted-file fallback.

use std::path::PathBuf;

use super::KeyError;

/// Trait for secure storage of cryptographic keys.
pub trait SecureStorage: Send + Sync {
    /// Saves a key under a name, replacing any previous value.
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), KeyError>;

    /// Loads a key. Returns None if the name is unknown.
    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError>;

    /// Deletes a key. Deleting a missing key is not an error.
    fn delete_key(&self, name: &str) -> Result<(), KeyError>;

    fn has_key(&self, name: &str) -> Result<bool, KeyError> {
        Ok(self.load_key(name)?.is_some())
    }
}

/// Platform keyring implementation using the `keyring` crate.
/// Available when the `secure-storage` feature is enabled.
#[cfg(feature = "secure-storage")]
pub struct PlatformKeyring {
    service: String,
}

#[cfg(feature = "secure-storage")]
impl PlatformKeyring {
    /// Creates a keyring accessor for a service name (e.g. "carevault").
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[cfg(feature = "secure-storage")]
impl SecureStorage for PlatformKeyring {
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), KeyError> {
        let entry = keyring::Entry::new(&self.service, name)
            .map_err(|e| KeyError::SecureStorage(format!("Keyring error: {}", e)))?;

        entry
            .set_secret(key)
            .map_err(|e| KeyError::SecureStorage(format!("Failed to save to keychain: {}", e)))
    }

    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError> {
        let entry = keyring::Entry::new(&self.service, name)
            .map_err(|e| KeyError::SecureStorage(format!("Keyring error: {}", e)))?;

        match entry.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyError::SecureStorage(format!(
                "Failed to load from keychain: {}",
                e
            ))),
        }
    }

    fn delete_key(&self, name: &str) -> Result<(), KeyError> {
        let entry = keyring::Entry::new(&self.service, name)
            .map_err(|e| KeyError::SecureStorage(format!("Keyring error: {}", e)))?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyError::SecureStorage(format!(
                "Failed to delete from keychain: {}",
                e
            ))),
        }
    }
}

/// File-based key storage, the fallback when no keyring is available.
/// Keys are encrypted at rest under a separate file-encryption key.
pub struct FileKeyStorage {
    path: PathBuf,
    encryption_key: crate::crypto::SymmetricKey,
}

impl FileKeyStorage {
    pub fn new(path: PathBuf, encryption_key: crate::crypto::SymmetricKey) -> Self {
        Self {
            path,
            encryption_key,
        }
    }

    fn key_file_path(&self, name: &str) -> PathBuf {
        // Sanitize the name to prevent path traversal
        let safe_name = name
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        self.path.join(format!("{}.key", safe_name))
    }
}

impl SecureStorage for FileKeyStorage {
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), KeyError> {
        std::fs::create_dir_all(&self.path)
            .map_err(|e| KeyError::SecureStorage(format!("Failed to create directory: {}", e)))?;

        let encrypted = crate::crypto::encrypt(&self.encryption_key, key)
            .map_err(|e| KeyError::SecureStorage(format!("Encryption failed: {}", e)))?;

        let file_path = self.key_file_path(name);
        std::fs::write(&file_path, &encrypted)
            .map_err(|e| KeyError::SecureStorage(format!("Failed to write key file: {}", e)))
    }

    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError> {
        let file_path = self.key_file_path(name);

        if !file_path.exists() {
            return Ok(None);
        }

        let encrypted = std::fs::read(&file_path)
            .map_err(|e| KeyError::SecureStorage(format!("Failed to read key file: {}", e)))?;

        let key = crate::crypto::decrypt(&self.encryption_key, &encrypted)
            .map_err(|e| KeyError::SecureStorage(format!("Decryption failed: {}", e)))?;

        Ok(Some(key))
    }

    fn delete_key(&self, name: &str) -> Result<(), KeyError> {
        let file_path = self.key_file_path(name);

        if file_path.exists() {
            std::fs::remove_file(&file_path).map_err(|e| {
                KeyError::SecureStorage(format!("Failed to delete key file: {}", e))
            })?;
        }

        Ok(())
    }
}

/// In-memory storage for tests.
#[cfg(any(test, feature = "testing"))]
pub struct MemoryKeyStorage {
    keys: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(any(test, feature = "testing"))]
impl Default for MemoryKeyStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self {
            keys: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl SecureStorage for MemoryKeyStorage {
    fn save_key(&self, name: &str, key: &[u8]) -> Result<(), KeyError> {
        self.keys
            .lock()
            .unwrap()
            .insert(name.to_string(), key.to_vec());
        Ok(())
    }

    fn load_key(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError> {
        Ok(self.keys.lock().unwrap().get(name).cloned())
    }

    fn delete_key(&self, name: &str) -> Result<(), KeyError> {
        self.keys.lock().unwrap().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricKey;
    use tempfile::TempDir;

    #[test]
    fn test_memory_storage_save_load_delete() {
        let storage = MemoryKeyStorage::new();
        let key = vec![1, 2, 3, 4, 5];

        storage.save_key("test_key", &key).unwrap();
        assert_eq!(storage.load_key("test_key").unwrap(), Some(key));

        storage.delete_key("test_key").unwrap();
        assert!(!storage.has_key("test_key").unwrap());
        assert_eq!(storage.load_key("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_file_storage_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let encryption_key = SymmetricKey::generate();
        let storage = FileKeyStorage::new(temp_dir.path().to_path_buf(), encryption_key);

        let key = vec![0xDE, 0xAD, 0xBE, 0xEF];
        storage.save_key("storage_key", &key).unwrap();

        assert_eq!(storage.load_key("storage_key").unwrap(), Some(key));
        assert_eq!(storage.load_key("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_file_storage_encrypted_at_rest() {
        let temp_dir = TempDir::new().unwrap();
        let encryption_key = SymmetricKey::generate();
        let storage = FileKeyStorage::new(temp_dir.path().to_path_buf(), encryption_key);

        let secret_key = vec![0x42; 32];
        storage.save_key("secret", &secret_key).unwrap();

        let file_content = std::fs::read(temp_dir.path().join("secret.key")).unwrap();
        assert_ne!(file_content, secret_key);
        assert!(file_content.len() > secret_key.len());

        assert_eq!(storage.load_key("secret").unwrap(), Some(secret_key));
    }

    #[test]
    fn test_file_storage_wrong_encryption_key_fails() {
        let temp_dir = TempDir::new().unwrap();
        let storage1 =
            FileKeyStorage::new(temp_dir.path().to_path_buf(), SymmetricKey::generate());
        let storage2 =
            FileKeyStorage::new(temp_dir.path().to_path_buf(), SymmetricKey::generate());

        storage1.save_key("test", &[1, 2, 3]).unwrap();
        assert!(storage2.load_key("test").is_err());
    }

    #[test]
    fn test_file_storage_path_traversal_prevented() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileKeyStorage::new(temp_dir.path().to_path_buf(), SymmetricKey::generate());

        storage.save_key("../../../etc/passwd", &[1, 2, 3]).unwrap();

        let safe_path = temp_dir.path().join("_________etc_passwd.key");
        assert!(safe_path.exists());
        assert!(!temp_dir.path().parent().unwrap().join("etc").exists());
    }
}
