// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key management: provider trait, secure at-rest storage, rotation
//! lifecycle and passphrase-protected backups.

pub mod backup;
pub mod lifecycle;
pub mod manager;
pub mod secure;

pub use backup::BackupManager;
pub use lifecycle::{KeyLifecycle, MigrationReport, RotationPolicy};
pub use manager::{KeyManager, StaticKeyManager, StoredKeyManager};
pub use secure::{FileKeyStorage, SecureStorage};

#[cfg(feature = "secure-storage")]
pub use secure::PlatformKeyring;

use thiserror::Error;

use crate::storage::StorageError;

/// Errors from key management operations.
#[derive(Debug, Error)]
pub enum KeyError {
    /// No data-encryption key is available. Nothing proceeds without one.
    #[error("No encryption key available")]
    Unavailable,

    /// Backup or wrapped key past its TTL.
    #[error("Expired: {0}")]
    Expired(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Wrapping, unwrapping or derivation failure.
    #[error("Key cryptography failed: {0}")]
    Crypto(String),

    #[error("Secure storage error: {0}")]
    SecureStorage(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
