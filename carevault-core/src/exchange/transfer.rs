// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Single-use key transfer between paired devices.
//!
//! The sender wraps the data-encryption key under the recipient's public
//! key and files a transfer request with an expiry. Consumption order is
//! deliberate: expiry is checked first, then the consumed flag is flipped
//! with a guarded update, and only then is any unwrap attempted, so a
//! replayed or raced request never reaches the cryptography.

use ring::rand::{SecureRandom, SystemRandom};
use tracing::info;
use uuid::Uuid;

use super::pairing::DeviceRegistry;
use super::ExchangeError;
use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSeverity, AuditSink};
use crate::crypto::{unwrap_key, wrap_key, ExchangeKeyPair, SymmetricKey};
use crate::storage::{unix_now, KeyTransferRequest, Storage};

/// Default transfer request lifetime: 15 minutes.
pub const DEFAULT_TRANSFER_TTL_SECS: u64 = 15 * 60;

const SALT_LEN: usize = 16;

/// Creates and consumes key transfer requests.
pub struct KeyTransfer<'a> {
    storage: &'a Storage,
    audit: &'a dyn AuditSink,
    ttl_secs: u64,
}

impl<'a> KeyTransfer<'a> {
    pub fn new(storage: &'a Storage, audit: &'a dyn AuditSink) -> Self {
        KeyTransfer {
            storage,
            audit,
            ttl_secs: DEFAULT_TRANSFER_TTL_SECS,
        }
    }

    pub fn with_ttl(storage: &'a Storage, audit: &'a dyn AuditSink, ttl_secs: u64) -> Self {
        KeyTransfer {
            storage,
            audit,
            ttl_secs,
        }
    }

    /// Wraps the key for a paired device and files a transfer request.
    pub fn create(
        &self,
        from_device: &str,
        to_device: &str,
        key: &SymmetricKey,
    ) -> Result<KeyTransferRequest, ExchangeError> {
        let recipient = DeviceRegistry::new(self.storage).require_active(to_device)?;

        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| ExchangeError::Crypto("salt generation failed".to_string()))?;

        let wrapped_key = wrap_key(&recipient.public_key, &salt, key)
            .map_err(|e| ExchangeError::Crypto(e.to_string()))?;

        let now = unix_now();
        let request = KeyTransferRequest {
            request_id: Uuid::new_v4().to_string(),
            from_device: from_device.to_string(),
            to_device: to_device.to_string(),
            wrapped_key,
            salt: salt.to_vec(),
            created_at: now,
            expires_at: now + self.ttl_secs,
            consumed: false,
        };
        self.storage.save_transfer_request(&request)?;

        info!(request_id = %request.request_id, to_device, "key transfer created");
        self.audit.record(AuditEvent::new(
            AuditEventKind::KeyTransfer,
            AuditSeverity::Critical,
            "key_exchange",
            format!(
                "transfer {} created from {} to {}",
                request.request_id, from_device, to_device
            ),
            AuditOutcome::Success,
        ));

        Ok(request)
    }

    /// Consumes a transfer request and unwraps the key.
    ///
    /// Expired requests are rejected even while still stored. The consumed
    /// flag flips before the unwrap attempt, so a request admits exactly
    /// one attempt total: a failed unwrap burns it rather than leaving a
    /// stored ciphertext open to repeated key guesses, and the sender must
    /// issue a fresh request.
    pub fn consume(
        &self,
        request_id: &str,
        recipient: &ExchangeKeyPair,
    ) -> Result<SymmetricKey, ExchangeError> {
        let request = self
            .storage
            .get_transfer_request(request_id)?
            .ok_or_else(|| ExchangeError::NotFound(request_id.to_string()))?;

        let now = unix_now();
        if request.is_expired(now) {
            self.audit_consume(request_id, AuditOutcome::Failure, "expired");
            return Err(ExchangeError::Expired(request_id.to_string()));
        }

        // Single-use gate: the guarded update admits exactly one consumer
        if !self.storage.consume_transfer_request(request_id)? {
            self.audit_consume(request_id, AuditOutcome::Failure, "already consumed");
            return Err(ExchangeError::AlreadyConsumed(request_id.to_string()));
        }

        let key = unwrap_key(recipient, &request.salt, &request.wrapped_key).map_err(|e| {
            self.audit_consume(request_id, AuditOutcome::Failure, "unwrap failed");
            ExchangeError::Crypto(e.to_string())
        })?;

        self.storage.set_device_last_sync(&request.to_device, now)?;
        info!(request_id, to_device = %request.to_device, "key transfer consumed");
        self.audit_consume(request_id, AuditOutcome::Success, "consumed");

        Ok(key)
    }

    /// Pending transfers for a device; expired requests are purged first.
    pub fn pending_for(&self, device_id: &str) -> Result<Vec<KeyTransferRequest>, ExchangeError> {
        Ok(self.storage.transfer_requests_for(device_id, unix_now())?)
    }

    fn audit_consume(&self, request_id: &str, outcome: AuditOutcome, detail: &str) {
        self.audit.record(AuditEvent::new(
            AuditEventKind::KeyTransfer,
            AuditSeverity::Critical,
            "key_exchange",
            format!("transfer {}: {}", request_id, detail),
            outcome,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;

    fn paired_recipient(storage: &Storage) -> ExchangeKeyPair {
        let keypair = ExchangeKeyPair::generate();
        DeviceRegistry::new(storage)
            .pair("dev-b", "Tablet", "tablet", &keypair.public_bytes())
            .unwrap();
        keypair
    }

    #[test]
    fn test_transfer_roundtrip() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let transfer = KeyTransfer::new(&storage, &audit);

        let recipient = paired_recipient(&storage);
        let dek = SymmetricKey::generate();

        let request = transfer.create("dev-a", "dev-b", &dek).unwrap();
        let received = transfer.consume(&request.request_id, &recipient).unwrap();

        assert_eq!(received.as_bytes(), dek.as_bytes());
        // Create + consume, both audited
        assert_eq!(audit.count_of(AuditEventKind::KeyTransfer), 2);
    }

    #[test]
    fn test_transfer_is_single_use() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let transfer = KeyTransfer::new(&storage, &audit);

        let recipient = paired_recipient(&storage);
        let request = transfer
            .create("dev-a", "dev-b", &SymmetricKey::generate())
            .unwrap();

        transfer.consume(&request.request_id, &recipient).unwrap();
        assert!(matches!(
            transfer.consume(&request.request_id, &recipient),
            Err(ExchangeError::AlreadyConsumed(_))
        ));
    }

    #[test]
    fn test_expired_transfer_rejected_while_still_stored() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        // TTL of zero expires immediately
        let transfer = KeyTransfer::with_ttl(&storage, &audit, 0);

        let recipient = paired_recipient(&storage);
        let request = transfer
            .create("dev-a", "dev-b", &SymmetricKey::generate())
            .unwrap();

        // Payload still present, but past expiry
        assert!(storage
            .get_transfer_request(&request.request_id)
            .unwrap()
            .is_some());
        assert!(matches!(
            transfer.consume(&request.request_id, &recipient),
            Err(ExchangeError::Expired(_))
        ));
    }

    #[test]
    fn test_transfer_to_unpaired_device_fails() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let transfer = KeyTransfer::new(&storage, &audit);

        assert!(matches!(
            transfer.create("dev-a", "stranger", &SymmetricKey::generate()),
            Err(ExchangeError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_wrong_recipient_keypair_cannot_unwrap() {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        let transfer = KeyTransfer::new(&storage, &audit);

        let recipient = paired_recipient(&storage);
        let request = transfer
            .create("dev-a", "dev-b", &SymmetricKey::generate())
            .unwrap();

        let imposter = ExchangeKeyPair::generate();
        assert!(matches!(
            transfer.consume(&request.request_id, &imposter),
            Err(ExchangeError::Crypto(_))
        ));

        // The failed attempt burned the request; even the intended
        // recipient is too late now
        assert!(matches!(
            transfer.consume(&request.request_id, &recipient),
            Err(ExchangeError::AlreadyConsumed(_))
        ));
    }
}
