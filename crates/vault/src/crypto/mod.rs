//! Cryptographic primitives and the field cipher.
//!
//! # Record layout
//!
//! Every protected value is stored as an [`EncryptedFieldRecord`] with the
//! nonce, tag and per-field salt kept in their own columns. The `v1` format
//! tag enables future algorithm migration without breaking stored data.
//!
//! [`EncryptedFieldRecord`]: common::record::EncryptedFieldRecord

pub mod cipher;
pub mod field;

pub use cipher::CipherError;
pub use field::FieldCipher;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag (16 bytes = 128 bits).
pub const TAG_LEN: usize = 16;

/// Byte length of the per-field salt.
pub const SALT_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

fn hmac_over(key: &[u8], parts: &[&[u8]]) -> HmacSha256 {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        unreachable!("HMAC accepts keys of any length");
    };
    for part in parts {
        mac.update(part);
    }
    mac
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hmac_over(key, parts).finalize().into_bytes());
    out
}

/// Constant-time comparison of `expected` against HMAC-SHA256 over `parts`.
pub fn hmac_sha256_verify(key: &[u8], parts: &[&[u8]], expected: &[u8]) -> bool {
    hmac_over(key, parts).verify_slice(expected).is_ok()
}

/// Fill an array from the OS CSPRNG.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// `len` bytes from the OS CSPRNG.
pub fn random_vec(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
