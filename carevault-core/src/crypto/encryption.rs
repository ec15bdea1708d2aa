// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Symmetric Encryption (XChaCha20-Poly1305)
//!
//! Authenticated encryption with a versioned ciphertext format so the
//! algorithm can be swapped without invalidating stored data.
//!
//! Ciphertext format: `algorithm_tag (1 byte) || nonce (24 bytes) || ciphertext || tag (16 bytes)`

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::Zeroize;

/// Encryption error types.
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: data may be corrupted or wrong key")]
    DecryptionFailed,
    #[error("Ciphertext too short")]
    CiphertextTooShort,
    #[error("Unknown algorithm tag: {0:#04x}")]
    UnknownAlgorithm(u8),
}

impl EncryptionError {
    /// Short stable identifier for persisted records; the `Display` text
    /// may change between releases, this string must not.
    pub fn kind(&self) -> &'static str {
        match self {
            EncryptionError::EncryptionFailed => "encrypt_failure",
            EncryptionError::DecryptionFailed => "auth_tag_failure",
            EncryptionError::CiphertextTooShort => "ciphertext_truncated",
            EncryptionError::UnknownAlgorithm(_) => "unknown_algorithm",
        }
    }
}

/// Algorithm tag for XChaCha20-Poly1305.
const ALG_TAG_XCHACHA20: u8 = 0x01;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
const XCHACHA20_NONCE_SIZE: usize = 24;
/// Authentication tag size.
const TAG_SIZE: usize = 16;

/// Number of key-hash bytes exposed as the fingerprint.
const FINGERPRINT_BYTES: usize = 8;

/// 256-bit symmetric encryption key.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; 32],
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose key bytes in debug output
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl SymmetricKey {
    /// Generates a new random symmetric key.
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let key = ring::rand::generate::<[u8; 32]>(&rng)
            .expect("System RNG should not fail")
            .expose();
        SymmetricKey { bytes: key }
    }

    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SymmetricKey { bytes }
    }

    /// Returns a reference to the key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Returns a non-reversible fingerprint of this key.
    ///
    /// First 8 bytes of the SHA-256 of the key material, hex-encoded.
    /// Safe to persist and log; never the key itself.
    pub fn fingerprint(&self) -> String {
        let hash = digest::digest(&digest::SHA256, &self.bytes);
        hex::encode(&hash.as_ref()[..FINGERPRINT_BYTES])
    }
}

/// Encrypts data using XChaCha20-Poly1305.
///
/// Output format: `0x01 || nonce (24 bytes) || ciphertext || tag (16 bytes)`
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let rng = SystemRandom::new();

    let mut nonce_bytes = [0u8; XCHACHA20_NONCE_SIZE];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = chacha20poly1305::XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(1 + XCHACHA20_NONCE_SIZE + ciphertext.len());
    output.push(ALG_TAG_XCHACHA20);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Decrypts data, dispatching on the algorithm tag.
///
/// A failed authentication tag yields `DecryptionFailed`, never a panic.
pub fn decrypt(key: &SymmetricKey, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if ciphertext.is_empty() {
        return Err(EncryptionError::CiphertextTooShort);
    }

    match ciphertext[0] {
        ALG_TAG_XCHACHA20 => decrypt_xchacha20(key, &ciphertext[1..]),
        other => Err(EncryptionError::UnknownAlgorithm(other)),
    }
}

/// Decrypts XChaCha20-Poly1305 data.
///
/// Input format: `nonce (24 bytes) || ciphertext || tag (16 bytes)`
fn decrypt_xchacha20(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let min_size = XCHACHA20_NONCE_SIZE + TAG_SIZE;
    if data.len() < min_size {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let nonce = chacha20poly1305::XNonce::from_slice(&data[..XCHACHA20_NONCE_SIZE]);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, &data[XCHACHA20_NONCE_SIZE..])
        .map_err(|_| EncryptionError::DecryptionFailed)
}

/// Computes the SHA-256 digest of plaintext document content.
///
/// Stored beside the ciphertext so the store can tell "same content,
/// different revision" apart from a true concurrent edit without ever
/// persisting plaintext.
pub fn content_digest(plaintext: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, plaintext).as_ref().to_vec()
}
