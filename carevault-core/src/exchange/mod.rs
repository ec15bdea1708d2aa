// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device pairing and key transfer.

pub mod pairing;
pub mod transfer;

pub use pairing::DeviceRegistry;
pub use transfer::{KeyTransfer, DEFAULT_TRANSFER_TTL_SECS};

use thiserror::Error;

use crate::storage::StorageError;

/// Errors from pairing and key transfer operations.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transfer request past its expiry; rejected even if still stored.
    #[error("Transfer request expired: {0}")]
    Expired(String),

    /// Transfer request already consumed once; single-use only.
    #[error("Transfer request already consumed: {0}")]
    AlreadyConsumed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Recipient is not an active paired device.
    #[error("Unknown or inactive device: {0}")]
    UnknownDevice(String),

    #[error("Key wrapping failed: {0}")]
    Crypto(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
