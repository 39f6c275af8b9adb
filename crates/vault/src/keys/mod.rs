//! Key derivation, versioning, rotation and destruction.
//!
//! # Lifecycle
//!
//! 1. At startup the master secret is stretched once with Argon2id into a
//!    master key that lives only in memory.
//! 2. Working keys are derived per tenant and version from the master key, so
//!    any version can be regenerated. Only each tenant's active version and
//!    destroyed versions are persisted, never key bytes.
//! 3. Every subject additionally gets a random subject key, stored only in
//!    wrapped form. Field keys need both, so destroying a subject key
//!    crypto-shreds that subject alone.
//!
//! # Security invariants
//!
//! - Key bytes are never logged, serialised, or included in traces.
//! - Every buffer holding key material is zeroed when dropped.

pub mod manager;
pub mod subject;

pub use manager::{KdfParams, KeyManager, KeyVersionInfo};
pub use subject::SubjectKeyRing;

use common::VaultError;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::KEY_LEN;

/// Shortest accepted master secret, in characters.
pub const MIN_MASTER_SECRET_LEN: usize = 32;

/// Errors produced by the key layer.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The master secret is shorter than [`MIN_MASTER_SECRET_LEN`].
    #[error("master secret must be at least {MIN_MASTER_SECRET_LEN} characters")]
    WeakMasterSecret,

    /// Argon2 rejected its parameters or failed.
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// The version was never created or is out of range.
    #[error("key version {0} is unavailable")]
    Unavailable(u32),

    /// The version was destroyed and will not be re-derived.
    #[error("key version {0} was destroyed")]
    Destroyed(u32),

    /// The subject has no key (never created, or shredded).
    #[error("subject key unavailable")]
    SubjectKeyMissing,

    /// The wrapped subject key failed to unwrap.
    #[error("subject key could not be unwrapped")]
    SubjectKeyCorrupt,
}

impl From<KeyError> for VaultError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::WeakMasterSecret | KeyError::Kdf(_) => VaultError::Config(e.to_string()),
            KeyError::Unavailable(_) | KeyError::Destroyed(_) | KeyError::SubjectKeyMissing => {
                VaultError::KeyUnavailable(e.to_string())
            }
            KeyError::SubjectKeyCorrupt => VaultError::DecryptionFailed,
        }
    }
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone)]
pub struct KeyBytes(Box<[u8; KEY_LEN]>);

impl KeyBytes {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(Box::new(bytes))
    }

    /// Copy a slice into a key buffer.
    ///
    /// Returns `None` if the slice is not [`KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self::new(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("KeyBytes([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bytes_redacted_in_debug() {
        let key = KeyBytes::new([0xFF; KEY_LEN]);
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(KeyBytes::from_slice(&[0u8; 16]).is_none());
        assert!(KeyBytes::from_slice(&[0u8; KEY_LEN]).is_some());
    }

    #[test]
    fn errors_map_to_vault_errors() {
        assert!(matches!(
            VaultError::from(KeyError::Destroyed(3)),
            VaultError::KeyUnavailable(_)
        ));
        assert!(matches!(
            VaultError::from(KeyError::WeakMasterSecret),
            VaultError::Config(_)
        ));
        assert!(matches!(
            VaultError::from(KeyError::SubjectKeyCorrupt),
            VaultError::DecryptionFailed
        ));
    }
}
