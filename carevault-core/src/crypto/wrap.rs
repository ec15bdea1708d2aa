// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asymmetric Key Wrapping
//!
//! Wraps the raw data-encryption key for another device: ephemeral X25519
//! ECDH against the recipient's public key, HKDF to a one-off wrap key,
//! then XChaCha20-Poly1305 over the key material.
//!
//! Wrapped blob format: `ephemeral_public (32 bytes) || ciphertext`
//! (the AEAD nonce travels inside the tagged ciphertext).

use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::encryption::{decrypt, encrypt, SymmetricKey};
use super::kdf::Hkdf;

/// Domain separation for transfer wrap-key derivation.
const KEY_WRAP_INFO: &[u8] = b"Carevault_KeyWrap_v1";

/// Size of the X25519 public key prefix in a wrapped blob.
const EPHEMERAL_PUBLIC_SIZE: usize = 32;

/// Key wrapping error types.
#[derive(Error, Debug)]
pub enum WrapError {
    #[error("Wrapping failed")]
    WrapFailed,
    #[error("Unwrapping failed: wrong recipient key or corrupted blob")]
    UnwrapFailed,
    #[error("Wrapped blob too short")]
    BlobTooShort,
    #[error("Unwrapped key has invalid length")]
    InvalidKeyLength,
}

/// X25519 keypair identifying one device for key transfer.
///
/// The secret half is held only on the owning device and never transmitted.
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl ExchangeKeyPair {
    /// Generates a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        ExchangeKeyPair { secret, public }
    }

    /// Restores a keypair from stored secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        ExchangeKeyPair { secret, public }
    }

    /// Returns the public key bytes (safe to register with the pairing set).
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

/// Wraps a data-encryption key for the holder of `recipient_public`.
///
/// A fresh ephemeral keypair is generated per call, so two wraps of the
/// same key never produce the same blob.
pub fn wrap_key(
    recipient_public: &[u8; 32],
    salt: &[u8],
    dek: &SymmetricKey,
) -> Result<Vec<u8>, WrapError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_public));
    let mut wrap_key_bytes = Hkdf::derive_key(Some(salt), shared.as_bytes(), KEY_WRAP_INFO);
    let wrap_key = SymmetricKey::from_bytes(wrap_key_bytes);
    wrap_key_bytes.zeroize();

    let ciphertext = encrypt(&wrap_key, dek.as_bytes()).map_err(|_| WrapError::WrapFailed)?;

    let mut blob = Vec::with_capacity(EPHEMERAL_PUBLIC_SIZE + ciphertext.len());
    blob.extend_from_slice(ephemeral_public.as_bytes());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Unwraps a key blob using the recipient's own keypair.
pub fn unwrap_key(
    recipient: &ExchangeKeyPair,
    salt: &[u8],
    blob: &[u8],
) -> Result<SymmetricKey, WrapError> {
    if blob.len() <= EPHEMERAL_PUBLIC_SIZE {
        return Err(WrapError::BlobTooShort);
    }

    let ephemeral_public: [u8; 32] = blob[..EPHEMERAL_PUBLIC_SIZE]
        .try_into()
        .map_err(|_| WrapError::BlobTooShort)?;

    let shared = recipient
        .secret
        .diffie_hellman(&PublicKey::from(ephemeral_public));
    let mut wrap_key_bytes = Hkdf::derive_key(Some(salt), shared.as_bytes(), KEY_WRAP_INFO);
    let wrap_key = SymmetricKey::from_bytes(wrap_key_bytes);
    wrap_key_bytes.zeroize();

    let mut plaintext =
        decrypt(&wrap_key, &blob[EPHEMERAL_PUBLIC_SIZE..]).map_err(|_| WrapError::UnwrapFailed)?;

    let key_bytes: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| WrapError::InvalidKeyLength)?;
    plaintext.zeroize();

    Ok(SymmetricKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let recipient = ExchangeKeyPair::generate();
        let dek = SymmetricKey::generate();
        let salt = [9u8; 16];

        let blob = wrap_key(&recipient.public_bytes(), &salt, &dek).unwrap();
        let unwrapped = unwrap_key(&recipient, &salt, &blob).unwrap();

        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn test_wrong_recipient_cannot_unwrap() {
        let recipient = ExchangeKeyPair::generate();
        let eavesdropper = ExchangeKeyPair::generate();
        let dek = SymmetricKey::generate();
        let salt = [9u8; 16];

        let blob = wrap_key(&recipient.public_bytes(), &salt, &dek).unwrap();
        assert!(matches!(
            unwrap_key(&eavesdropper, &salt, &blob),
            Err(WrapError::UnwrapFailed)
        ));
    }

    #[test]
    fn test_wrong_salt_fails() {
        let recipient = ExchangeKeyPair::generate();
        let dek = SymmetricKey::generate();

        let blob = wrap_key(&recipient.public_bytes(), &[1u8; 16], &dek).unwrap();
        assert!(unwrap_key(&recipient, &[2u8; 16], &blob).is_err());
    }

    #[test]
    fn test_wraps_are_randomized() {
        let recipient = ExchangeKeyPair::generate();
        let dek = SymmetricKey::generate();
        let salt = [9u8; 16];

        let a = wrap_key(&recipient.public_bytes(), &salt, &dek).unwrap();
        let b = wrap_key(&recipient.public_bytes(), &salt, &dek).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let recipient = ExchangeKeyPair::generate();
        assert!(matches!(
            unwrap_key(&recipient, &[0u8; 16], &[0u8; 16]),
            Err(WrapError::BlobTooShort)
        ));
    }

    #[test]
    fn test_keypair_restore_from_secret() {
        let original = ExchangeKeyPair::generate();
        let secret_bytes = original.secret.to_bytes();
        let restored = ExchangeKeyPair::from_secret_bytes(secret_bytes);
        assert_eq!(original.public_bytes(), restored.public_bytes());
    }
}
