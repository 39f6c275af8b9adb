//! AES-256-GCM-SIV sealing and opening with associated data.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant.
//! A repeated random nonce leaks only whether two plaintexts were equal, not
//! the key stream. Each call still draws a fresh 96-bit nonce.
//!
//! **Do NOT substitute plain AES-256-GCM with a fixed nonce.** GCM nonce reuse
//! is catastrophic: it breaks both confidentiality and authentication.

use aes_gcm_siv::{
    aead::{Aead, AeadInPlace, KeyInit, Payload},
    Aes256GcmSiv, Key, Nonce, Tag,
};
use common::VaultError;
use thiserror::Error;
use zeroize::Zeroizing;

use super::{random_array, NONCE_LEN, TAG_LEN};
use crate::keys::KeyBytes;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// A nonce, tag or salt has the wrong length.
    #[error("malformed {0}")]
    Malformed(&'static str),

    /// Authentication failed: wrong key, wrong associated data, or tampering.
    #[error("aead authentication failed")]
    AeadFailure,

    /// Encryption itself failed (unreachable with a valid key and nonce).
    #[error("aead encryption failed")]
    SealFailure,
}

impl From<CipherError> for VaultError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::Malformed(_) | CipherError::AeadFailure => VaultError::DecryptionFailed,
            CipherError::SealFailure => VaultError::Internal(e.to_string()),
        }
    }
}

/// Output of [`seal`]: the tag is detached from the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` under `key`, authenticating `aad`, with a fresh nonce.
///
/// # Errors
///
/// Returns [`CipherError::SealFailure`] on an internal AEAD error.
pub fn seal(key: &KeyBytes, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CipherError> {
    let cipher = build_cipher(key);
    let nonce = random_array::<NONCE_LEN>();

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
        .map_err(|_| CipherError::SealFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok(Sealed {
        nonce,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Authenticate and decrypt a detached-tag ciphertext.
///
/// The plaintext is returned in a zeroizing buffer.
///
/// # Errors
///
/// Returns [`CipherError::Malformed`] if the nonce or tag has the wrong length
/// and [`CipherError::AeadFailure`] if authentication fails.
pub fn open(
    key: &KeyBytes,
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    if nonce.len() != NONCE_LEN {
        return Err(CipherError::Malformed("nonce"));
    }
    if tag.len() != TAG_LEN {
        return Err(CipherError::Malformed("tag"));
    }

    let cipher = build_cipher(key);
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut buffer[..],
            Tag::from_slice(tag),
        )
        .map_err(|_| CipherError::AeadFailure)?;
    Ok(buffer)
}

/// Encrypt with the tag appended to the ciphertext. Used for key wrapping.
pub fn wrap(
    key: &KeyBytes,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CipherError> {
    let nonce = random_array::<NONCE_LEN>();
    let ciphertext = build_cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CipherError::SealFailure)?;
    Ok((nonce, ciphertext))
}

/// Inverse of [`wrap`].
pub fn unwrap(
    key: &KeyBytes,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    if nonce.len() != NONCE_LEN {
        return Err(CipherError::Malformed("nonce"));
    }
    build_cipher(key)
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &KeyBytes) -> Aes256GcmSiv {
    Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;

    fn random_key() -> KeyBytes {
        KeyBytes::new(random_array::<KEY_LEN>())
    }

    #[test]
    fn seal_open_round_trip() {
        let key = random_key();
        let sealed = seal(&key, b"jane@example.com", b"aad").unwrap();
        assert_eq!(sealed.ciphertext.len(), "jane@example.com".len());
        let plain = open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"aad").unwrap();
        assert_eq!(plain.as_slice(), b"jane@example.com");
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = random_key();
        let a = seal(&key, b"same", b"").unwrap();
        let b = seal(&key, b"same", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&random_key(), b"secret", b"").unwrap();
        let result = open(&random_key(), &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"");
        assert!(matches!(result, Err(CipherError::AeadFailure)));
    }

    #[test]
    fn every_single_byte_flip_fails_closed() {
        let key = random_key();
        let sealed = seal(&key, b"tamper me", b"aad").unwrap();

        for i in 0..sealed.ciphertext.len() {
            let mut ct = sealed.ciphertext.clone();
            ct[i] ^= 0x01;
            assert!(open(&key, &sealed.nonce, &ct, &sealed.tag, b"aad").is_err());
        }
        for i in 0..NONCE_LEN {
            let mut nonce = sealed.nonce;
            nonce[i] ^= 0x01;
            assert!(open(&key, &nonce, &sealed.ciphertext, &sealed.tag, b"aad").is_err());
        }
        for i in 0..TAG_LEN {
            let mut tag = sealed.tag;
            tag[i] ^= 0x01;
            assert!(open(&key, &sealed.nonce, &sealed.ciphertext, &tag, b"aad").is_err());
        }
        assert!(open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"aae").is_err());
    }

    #[test]
    fn malformed_lengths_rejected() {
        let key = random_key();
        let sealed = seal(&key, b"x", b"").unwrap();
        assert!(matches!(
            open(&key, &sealed.nonce[..8], &sealed.ciphertext, &sealed.tag, b""),
            Err(CipherError::Malformed("nonce"))
        ));
        assert!(matches!(
            open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag[..4], b""),
            Err(CipherError::Malformed("tag"))
        ));
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let key = random_key();
        let (nonce, wrapped) = wrap(&key, &[7u8; KEY_LEN], b"subject").unwrap();
        assert_eq!(wrapped.len(), KEY_LEN + TAG_LEN);
        let unwrapped = unwrap(&key, &nonce, &wrapped, b"subject").unwrap();
        assert_eq!(unwrapped.as_slice(), &[7u8; KEY_LEN]);
        assert!(unwrap(&key, &nonce, &wrapped, b"other").is_err());
    }

    #[test]
    fn errors_map_to_decryption_failed() {
        assert!(matches!(
            VaultError::from(CipherError::AeadFailure),
            VaultError::DecryptionFailed
        ));
    }
}
