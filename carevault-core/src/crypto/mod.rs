// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod encryption;
pub mod kdf;
pub mod password_kdf;
pub mod wrap;

pub use encryption::{content_digest, decrypt, encrypt, EncryptionError, SymmetricKey};
pub use kdf::{Hkdf, KdfError};
pub use password_kdf::{derive_wrapping_key, PasswordKdfError};
pub use wrap::{unwrap_key, wrap_key, ExchangeKeyPair, WrapError};
