// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HKDF-SHA256 key derivation.
//!
//! Used to turn X25519 shared secrets into symmetric wrap keys with
//! domain separation via the `info` parameter.

use ring::hkdf;
use thiserror::Error;

/// KDF error types.
#[derive(Error, Debug)]
pub enum KdfError {
    #[error("Key derivation failed")]
    DerivationFailed,
}

/// HKDF-SHA256 wrapper.
pub struct Hkdf;

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

impl Hkdf {
    /// Derives a 32-byte key from input keying material.
    ///
    /// `salt` may be `None` (all-zero salt per RFC 5869); `info` provides
    /// domain separation between different key uses.
    pub fn derive_key(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> [u8; 32] {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt.unwrap_or(&[]));
        let prk = salt.extract(ikm);

        let info_slices = [info];
        let okm = prk
            .expand(&info_slices, OkmLen(32))
            .expect("32 bytes is within HKDF-SHA256 output bounds");

        let mut out = [0u8; 32];
        okm.fill(&mut out)
            .expect("output buffer matches requested length");
        out
    }
}
