// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key version and key backup storage operations.
//!
//! Key versions are append-only except for two sanctioned mutations:
//! flipping `is_active` (exactly one version is active at a time, enforced
//! here in a single transaction) and bumping `usage_count`.

use rusqlite::params;

use super::{unix_now, Storage, StorageError};

/// What triggered a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatedBy {
    Automatic,
    Manual,
    Migration,
}

impl RotatedBy {
    /// Returns a string representation suitable for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RotatedBy::Automatic => "automatic",
            RotatedBy::Manual => "manual",
            RotatedBy::Migration => "migration",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "automatic" => RotatedBy::Automatic,
            "migration" => RotatedBy::Migration,
            _ => RotatedBy::Manual,
        }
    }
}

/// One version of the data-encryption key.
///
/// Never contains key material: `key_fingerprint` is the first 8 bytes of
/// the key hash, hex-encoded.
#[derive(Debug, Clone)]
pub struct KeyVersion {
    pub key_id: String,
    /// Monotonic version number across all key versions.
    pub version: u64,
    pub created_at: u64,
    /// Set when this version stops being active.
    pub rotated_at: Option<u64>,
    pub rotated_by: RotatedBy,
    pub key_fingerprint: String,
    pub is_active: bool,
    /// Encrypt/decrypt operations performed under this key.
    pub usage_count: u64,
}

/// A wrapped copy of a data-encryption key.
///
/// `wrapped_key` is the key encrypted under a separate wrapping key; the
/// backup is unusable past `expires_at` regardless of storage presence.
#[derive(Debug, Clone)]
pub struct KeyBackup {
    pub key_id: String,
    pub wrapped_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl Storage {
    // === Key Version Operations ===

    /// Inserts a new key version (inactive; activate separately).
    pub fn insert_key_version(&self, version: &KeyVersion) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO key_versions
             (key_id, version, created_at, rotated_at, rotated_by, key_fingerprint, is_active, usage_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                version.key_id,
                version.version as i64,
                version.created_at as i64,
                version.rotated_at.map(|t| t as i64),
                version.rotated_by.as_str(),
                version.key_fingerprint,
                version.is_active as i32,
                version.usage_count as i64,
            ],
        )?;
        Ok(())
    }

    /// Makes one key version the single active one.
    ///
    /// Deactivates every other version (stamping `rotated_at`) and
    /// activates the given one, in one transaction.
    pub fn activate_key_version(&self, key_id: &str) -> Result<(), StorageError> {
        let now = unix_now();

        self.immediate(|| {
            self.conn().execute(
                "UPDATE key_versions SET is_active = 0, rotated_at = ?1
                 WHERE is_active = 1 AND key_id != ?2",
                params![now as i64, key_id],
            )?;
            let rows = self.conn().execute(
                "UPDATE key_versions SET is_active = 1 WHERE key_id = ?1",
                params![key_id],
            )?;
            if rows == 0 {
                return Err(StorageError::NotFound(key_id.to_string()));
            }
            Ok(())
        })
    }

    /// Returns the active key version, if any.
    pub fn active_key_version(&self) -> Result<Option<KeyVersion>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT key_id, version, created_at, rotated_at, rotated_by, key_fingerprint, is_active, usage_count
             FROM key_versions WHERE is_active = 1",
        )?;

        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_key_version(row)?)),
            None => Ok(None),
        }
    }

    /// Gets a key version by id.
    pub fn get_key_version(&self, key_id: &str) -> Result<Option<KeyVersion>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT key_id, version, created_at, rotated_at, rotated_by, key_fingerprint, is_active, usage_count
             FROM key_versions WHERE key_id = ?1",
        )?;

        let mut rows = stmt.query(params![key_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_key_version(row)?)),
            None => Ok(None),
        }
    }

    /// Lists all key versions, newest first.
    pub fn list_key_versions(&self) -> Result<Vec<KeyVersion>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT key_id, version, created_at, rotated_at, rotated_by, key_fingerprint, is_active, usage_count
             FROM key_versions ORDER BY version DESC",
        )?;

        let rows = stmt.query_map([], row_to_key_version)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Returns the highest version number assigned so far (0 when none).
    pub fn max_key_version(&self) -> Result<u64, StorageError> {
        let max: Option<i64> =
            self.conn()
                .query_row("SELECT MAX(version) FROM key_versions", [], |row| {
                    row.get(0)
                })?;
        Ok(max.unwrap_or(0) as u64)
    }

    /// Increments the usage count of the active key version, if one is
    /// registered. Returns the new count (None when no version is active).
    pub fn increment_active_key_usage(&self) -> Result<Option<u64>, StorageError> {
        let rows = self.conn().execute(
            "UPDATE key_versions SET usage_count = usage_count + 1 WHERE is_active = 1",
            [],
        )?;

        if rows == 0 {
            return Ok(None);
        }

        let count: i64 = self.conn().query_row(
            "SELECT usage_count FROM key_versions WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(Some(count as u64))
    }

    /// Resets the usage count for a key version.
    pub fn reset_key_usage(&self, key_id: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "UPDATE key_versions SET usage_count = 0 WHERE key_id = ?1",
            params![key_id],
        )?;
        Ok(())
    }

    // === Key Backup Operations ===

    /// Saves (or replaces) the backup for a key.
    pub fn save_key_backup(&self, backup: &KeyBackup) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO key_backups
             (key_id, wrapped_key, salt, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                backup.key_id,
                backup.wrapped_key,
                backup.salt,
                backup.created_at as i64,
                backup.expires_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Loads the backup for a key, expired or not.
    ///
    /// Expiry policy is the caller's: the lifecycle layer checks
    /// `expires_at` and purges on access, so a restore can distinguish
    /// "expired" from "never existed".
    pub fn load_key_backup(&self, key_id: &str) -> Result<Option<KeyBackup>, StorageError> {
        let result = self.conn().query_row(
            "SELECT key_id, wrapped_key, salt, created_at, expires_at
             FROM key_backups WHERE key_id = ?1",
            params![key_id],
            row_to_key_backup,
        );

        match result {
            Ok(backup) => Ok(Some(backup)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Deletes expired backups. Called lazily from backup accessors,
    /// never from a timer.
    pub fn purge_expired_backups(&self, now: u64) -> Result<usize, StorageError> {
        let rows = self.conn().execute(
            "DELETE FROM key_backups WHERE expires_at < ?1",
            params![now as i64],
        )?;
        Ok(rows)
    }

    /// Lists non-expired backups, purging expired ones on the way.
    pub fn list_key_backups(&self, now: u64) -> Result<Vec<KeyBackup>, StorageError> {
        self.purge_expired_backups(now)?;

        let mut stmt = self.conn().prepare(
            "SELECT key_id, wrapped_key, salt, created_at, expires_at
             FROM key_backups ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_key_backup)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Deletes one backup row.
    pub fn delete_key_backup(&self, key_id: &str) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "DELETE FROM key_backups WHERE key_id = ?1",
            params![key_id],
        )?;
        Ok(rows > 0)
    }
}

/// Converts a database row to a KeyVersion.
fn row_to_key_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyVersion> {
    Ok(KeyVersion {
        key_id: row.get(0)?,
        version: row.get::<_, i64>(1)? as u64,
        created_at: row.get::<_, i64>(2)? as u64,
        rotated_at: row.get::<_, Option<i64>>(3)?.map(|t| t as u64),
        rotated_by: RotatedBy::parse(&row.get::<_, String>(4)?),
        key_fingerprint: row.get(5)?,
        is_active: row.get::<_, i32>(6)? != 0,
        usage_count: row.get::<_, i64>(7)? as u64,
    })
}

/// Converts a database row to a KeyBackup.
fn row_to_key_backup(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyBackup> {
    Ok(KeyBackup {
        key_id: row.get(0)?,
        wrapped_key: row.get(1)?,
        salt: row.get(2)?,
        created_at: row.get::<_, i64>(3)? as u64,
        expires_at: row.get::<_, i64>(4)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(key_id: &str, version: u64, active: bool) -> KeyVersion {
        KeyVersion {
            key_id: key_id.to_string(),
            version,
            created_at: 1000,
            rotated_at: None,
            rotated_by: RotatedBy::Manual,
            key_fingerprint: "aabbccdd11223344".to_string(),
            is_active: active,
            usage_count: 0,
        }
    }

    #[test]
    fn test_exactly_one_active_version() {
        let storage = Storage::in_memory().unwrap();

        storage.insert_key_version(&version("k1", 1, true)).unwrap();
        storage.insert_key_version(&version("k2", 2, false)).unwrap();
        storage.activate_key_version("k2").unwrap();

        let versions = storage.list_key_versions().unwrap();
        let active: Vec<_> = versions.iter().filter(|v| v.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key_id, "k2");

        // Previous version got its rotated_at stamped
        let k1 = storage.get_key_version("k1").unwrap().unwrap();
        assert!(k1.rotated_at.is_some());
    }

    #[test]
    fn test_activate_unknown_key_fails() {
        let storage = Storage::in_memory().unwrap();
        assert!(matches!(
            storage.activate_key_version("missing"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_usage_count_increment_and_reset() {
        let storage = Storage::in_memory().unwrap();
        storage.insert_key_version(&version("k1", 1, true)).unwrap();

        assert_eq!(storage.increment_active_key_usage().unwrap(), Some(1));
        assert_eq!(storage.increment_active_key_usage().unwrap(), Some(2));

        storage.reset_key_usage("k1").unwrap();
        assert_eq!(
            storage.get_key_version("k1").unwrap().unwrap().usage_count,
            0
        );
    }

    #[test]
    fn test_usage_increment_without_active_version_is_none() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.increment_active_key_usage().unwrap(), None);
    }

    #[test]
    fn test_backup_lazy_purge() {
        let storage = Storage::in_memory().unwrap();

        storage
            .save_key_backup(&KeyBackup {
                key_id: "k1".into(),
                wrapped_key: vec![1, 2, 3],
                salt: vec![9; 16],
                created_at: 100,
                expires_at: 200,
            })
            .unwrap();
        storage
            .save_key_backup(&KeyBackup {
                key_id: "k2".into(),
                wrapped_key: vec![4, 5, 6],
                salt: vec![9; 16],
                created_at: 150,
                expires_at: 500,
            })
            .unwrap();

        // Listing at t=300 purges k1 but keeps k2
        let alive = storage.list_key_backups(300).unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].key_id, "k2");
        assert!(storage.load_key_backup("k1").unwrap().is_none());
    }
}
