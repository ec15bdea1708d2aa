// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Paired device storage operations.

use rusqlite::params;

use super::{unix_now, Storage, StorageError};

/// A device paired for key transfer.
#[derive(Debug, Clone)]
pub struct PairedDevice {
    pub device_id: String,
    pub display_name: String,
    /// Free-form class, e.g. "tablet", "workstation".
    pub device_class: String,
    /// X25519 public key used to wrap keys for this device.
    pub public_key: [u8; 32],
    pub paired_at: u64,
    pub last_sync_at: Option<u64>,
    pub is_active: bool,
}

impl Storage {
    // === Paired Device Operations ===

    /// Registers a device, or updates its metadata if the id is already
    /// known. Re-pairing reactivates the device and refreshes its name,
    /// class and public key, but keeps the original `paired_at`.
    pub fn upsert_device(
        &self,
        device_id: &str,
        display_name: &str,
        device_class: &str,
        public_key: &[u8; 32],
    ) -> Result<PairedDevice, StorageError> {
        let now = unix_now();

        self.conn().execute(
            "INSERT INTO paired_devices
             (device_id, display_name, device_class, public_key, paired_at, last_sync_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 1)
             ON CONFLICT(device_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 device_class = excluded.device_class,
                 public_key = excluded.public_key,
                 is_active = 1",
            params![
                device_id,
                display_name,
                device_class,
                public_key.as_slice(),
                now as i64,
            ],
        )?;

        self.get_device(device_id)?
            .ok_or_else(|| StorageError::NotFound(device_id.to_string()))
    }

    /// Gets a device by id.
    pub fn get_device(&self, device_id: &str) -> Result<Option<PairedDevice>, StorageError> {
        let result = self.conn().query_row(
            "SELECT device_id, display_name, device_class, public_key, paired_at, last_sync_at, is_active
             FROM paired_devices WHERE device_id = ?1",
            params![device_id],
            row_to_device,
        );

        match result {
            Ok(device) => Ok(Some(device)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Lists active devices.
    pub fn active_devices(&self) -> Result<Vec<PairedDevice>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT device_id, display_name, device_class, public_key, paired_at, last_sync_at, is_active
             FROM paired_devices WHERE is_active = 1 ORDER BY paired_at",
        )?;

        let rows = stmt.query_map([], row_to_device)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Removes a device from the active set.
    ///
    /// Keys already transferred to it are not invalidated; revoking those
    /// is a key rotation concern.
    pub fn deactivate_device(&self, device_id: &str) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE paired_devices SET is_active = 0 WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(rows > 0)
    }

    /// Stamps the last successful key transfer/sync for a device.
    pub fn set_device_last_sync(&self, device_id: &str, at: u64) -> Result<(), StorageError> {
        self.conn().execute(
            "UPDATE paired_devices SET last_sync_at = ?1 WHERE device_id = ?2",
            params![at as i64, device_id],
        )?;
        Ok(())
    }
}

/// Converts a database row to a PairedDevice.
fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<PairedDevice> {
    let key_vec: Vec<u8> = row.get(3)?;
    let public_key: [u8; 32] = key_vec.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Blob,
            "invalid public key length".into(),
        )
    })?;

    Ok(PairedDevice {
        device_id: row.get(0)?,
        display_name: row.get(1)?,
        device_class: row.get(2)?,
        public_key,
        paired_at: row.get::<_, i64>(4)? as u64,
        last_sync_at: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
        is_active: row.get::<_, i32>(6)? != 0,
    })
}
