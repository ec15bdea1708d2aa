// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device pairing.
//!
//! A paired device is identified by its X25519 public key; the secret
//! half never leaves the device that generated it.

use tracing::info;

use super::ExchangeError;
use crate::storage::{PairedDevice, Storage};

/// Manages the set of devices eligible to receive key transfers.
pub struct DeviceRegistry<'a> {
    storage: &'a Storage,
}

impl<'a> DeviceRegistry<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        DeviceRegistry { storage }
    }

    /// Pairs a device, or refreshes its metadata if it is already known.
    /// Re-pairing is idempotent and never duplicates a device.
    pub fn pair(
        &self,
        device_id: &str,
        display_name: &str,
        device_class: &str,
        public_key: &[u8; 32],
    ) -> Result<PairedDevice, ExchangeError> {
        let device =
            self.storage
                .upsert_device(device_id, display_name, device_class, public_key)?;
        info!(device_id, device_class, "device paired");
        Ok(device)
    }

    /// Removes a device from the active set.
    ///
    /// Keys already transferred to it stay valid; revoking them requires
    /// a key rotation.
    pub fn unpair(&self, device_id: &str) -> Result<(), ExchangeError> {
        if !self.storage.deactivate_device(device_id)? {
            return Err(ExchangeError::NotFound(device_id.to_string()));
        }
        info!(device_id, "device unpaired");
        Ok(())
    }

    /// Active devices, oldest pairing first.
    pub fn active(&self) -> Result<Vec<PairedDevice>, ExchangeError> {
        Ok(self.storage.active_devices()?)
    }

    /// Looks up an active device, failing for unknown or unpaired ids.
    pub fn require_active(&self, device_id: &str) -> Result<PairedDevice, ExchangeError> {
        self.storage
            .get_device(device_id)?
            .filter(|d| d.is_active)
            .ok_or_else(|| ExchangeError::UnknownDevice(device_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_unpair_repair() {
        let storage = Storage::in_memory().unwrap();
        let registry = DeviceRegistry::new(&storage);

        registry
            .pair("dev-1", "Ward tablet", "tablet", &[1u8; 32])
            .unwrap();
        assert!(registry.require_active("dev-1").is_ok());

        registry.unpair("dev-1").unwrap();
        assert!(matches!(
            registry.require_active("dev-1"),
            Err(ExchangeError::UnknownDevice(_))
        ));

        // Re-pairing reactivates without duplicating
        registry
            .pair("dev-1", "Ward tablet", "tablet", &[1u8; 32])
            .unwrap();
        assert_eq!(registry.active().unwrap().len(), 1);
    }

    #[test]
    fn test_unpair_unknown_device_fails() {
        let storage = Storage::in_memory().unwrap();
        let registry = DeviceRegistry::new(&storage);
        assert!(matches!(
            registry.unpair("ghost"),
            Err(ExchangeError::NotFound(_))
        ));
    }
}
