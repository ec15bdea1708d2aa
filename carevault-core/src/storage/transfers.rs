// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key transfer request storage operations.

use rusqlite::params;

use super::{Storage, StorageError};

/// A pending key transfer to a paired device.
///
/// The wrapped key can only be unwrapped by the recipient device's
/// private key; the store never sees the plaintext key material here.
#[derive(Debug, Clone)]
pub struct KeyTransferRequest {
    pub request_id: String,
    pub from_device: String,
    pub to_device: String,
    /// Ephemeral public key prefix + sealed data key.
    pub wrapped_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub created_at: u64,
    pub expires_at: u64,
    pub consumed: bool,
}

impl KeyTransferRequest {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

impl Storage {
    // === Key Transfer Operations ===

    /// Saves a transfer request. Fails if the request id already exists.
    pub fn save_transfer_request(&self, request: &KeyTransferRequest) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO transfer_requests
             (request_id, from_device, to_device, wrapped_key, salt, created_at, expires_at, consumed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.request_id,
                request.from_device,
                request.to_device,
                request.wrapped_key,
                request.salt,
                request.created_at as i64,
                request.expires_at as i64,
                request.consumed as i32,
            ],
        )?;
        Ok(())
    }

    /// Gets a transfer request by id, expired or not. Callers decide how
    /// to surface expiry.
    pub fn get_transfer_request(
        &self,
        request_id: &str,
    ) -> Result<Option<KeyTransferRequest>, StorageError> {
        let result = self.conn().query_row(
            "SELECT request_id, from_device, to_device, wrapped_key, salt, created_at, expires_at, consumed
             FROM transfer_requests WHERE request_id = ?1",
            params![request_id],
            row_to_transfer_request,
        );

        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Marks a transfer request consumed.
    ///
    /// Returns `true` only for the first caller; the guarded update makes
    /// the single-use property hold even under concurrent consumers.
    pub fn consume_transfer_request(&self, request_id: &str) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE transfer_requests SET consumed = 1
             WHERE request_id = ?1 AND consumed = 0",
            params![request_id],
        )?;
        Ok(rows > 0)
    }

    /// Lists unconsumed transfer requests addressed to a device.
    pub fn transfer_requests_for(
        &self,
        to_device: &str,
        now: u64,
    ) -> Result<Vec<KeyTransferRequest>, StorageError> {
        self.purge_expired_transfers(now)?;

        let mut stmt = self.conn().prepare(
            "SELECT request_id, from_device, to_device, wrapped_key, salt, created_at, expires_at, consumed
             FROM transfer_requests
             WHERE to_device = ?1 AND consumed = 0
             ORDER BY created_at",
        )?;

        let rows = stmt.query_map(params![to_device], row_to_transfer_request)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Deletes expired transfer requests. Returns the number removed.
    pub fn purge_expired_transfers(&self, now: u64) -> Result<usize, StorageError> {
        let rows = self.conn().execute(
            "DELETE FROM transfer_requests WHERE expires_at <= ?1",
            params![now as i64],
        )?;
        Ok(rows)
    }
}

/// Converts a database row to a KeyTransferRequest.
fn row_to_transfer_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyTransferRequest> {
    Ok(KeyTransferRequest {
        request_id: row.get(0)?,
        from_device: row.get(1)?,
        to_device: row.get(2)?,
        wrapped_key: row.get(3)?,
        salt: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        expires_at: row.get::<_, i64>(6)? as u64,
        consumed: row.get::<_, i32>(7)? != 0,
    })
}
