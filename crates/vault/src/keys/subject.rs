//! [`SubjectKeyRing`]: random per-subject keys, persisted only wrapped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::VaultError;
use tokio::sync::Mutex;
use tracing::debug;

use super::{KeyBytes, KeyError, KeyManager};
use crate::cache::TtlLru;
use crate::crypto::{cipher, random_array, KEY_LEN};
use crate::store::{RecordStore, WrappedSubjectKey};

type SubjectId = (String, String);

/// Loads, creates and destroys subject keys.
///
/// Unwrapped keys are cached in a bounded LRU with a time to live; an evicted
/// key is unwrapped again from the store. All store-touching paths run under one
/// async lock, so a concurrent load can never resurrect a key that
/// [`SubjectKeyRing::destroy`] just removed, and two first encryptions for a
/// subject never create two keys.
pub struct SubjectKeyRing {
    store: Arc<dyn RecordStore>,
    keys: Arc<KeyManager>,
    wrap_key: KeyBytes,
    cache: TtlLru<SubjectId, KeyBytes>,
    lock: Mutex<()>,
}

impl SubjectKeyRing {
    /// Keep at most `capacity` unwrapped keys, each for at most `ttl`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        keys: Arc<KeyManager>,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        let wrap_key = keys.purpose_key("subject-key-wrap");
        Self {
            store,
            keys,
            wrap_key,
            cache: TtlLru::new(capacity, ttl),
            lock: Mutex::new(()),
        }
    }

    /// The subject's key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyUnavailable`] when the subject has no key
    /// (never encrypted, or shredded).
    pub async fn get(&self, tenant_id: &str, subject_id: &str) -> Result<KeyBytes, VaultError> {
        let id = (tenant_id.to_owned(), subject_id.to_owned());
        if let Some(key) = self.cache.get(&id) {
            return Ok(key);
        }

        let _guard = self.lock.lock().await;
        if let Some(key) = self.cache.get(&id) {
            return Ok(key);
        }
        match self.store.wrapped_key(tenant_id, subject_id).await? {
            Some(wrapped) => {
                let key = self.unwrap(tenant_id, subject_id, &wrapped)?;
                self.cache.put(id, key.clone());
                Ok(key)
            }
            None => Err(KeyError::SubjectKeyMissing.into()),
        }
    }

    /// The subject's key, creating and persisting one on first use.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
        subject_id: &str,
    ) -> Result<KeyBytes, VaultError> {
        let id = (tenant_id.to_owned(), subject_id.to_owned());
        if let Some(key) = self.cache.get(&id) {
            return Ok(key);
        }

        let _guard = self.lock.lock().await;
        if let Some(key) = self.cache.get(&id) {
            return Ok(key);
        }
        let key = match self.store.wrapped_key(tenant_id, subject_id).await? {
            Some(wrapped) => self.unwrap(tenant_id, subject_id, &wrapped)?,
            None => {
                let key_version = self.keys.current_version(tenant_id).await?;
                let key = KeyBytes::new(random_array::<KEY_LEN>());
                let (nonce, ciphertext) =
                    cipher::wrap(&self.wrap_key, key.as_bytes(), &aad(tenant_id, subject_id))?;
                self.store
                    .put_wrapped_key(
                        tenant_id,
                        subject_id,
                        WrappedSubjectKey {
                            key_version,
                            nonce: nonce.to_vec(),
                            ciphertext,
                            created_at: Utc::now(),
                        },
                    )
                    .await?;
                debug!(tenant = tenant_id, "subject key created");
                key
            }
        };
        self.cache.put(id, key.clone());
        Ok(key)
    }

    /// Remove the subject's key from memory and from the store. Returns
    /// whether a stored key existed.
    pub async fn destroy(&self, tenant_id: &str, subject_id: &str) -> Result<bool, VaultError> {
        let _guard = self.lock.lock().await;
        self.cache.remove(&(tenant_id.to_owned(), subject_id.to_owned()));
        Ok(self.store.delete_wrapped_key(tenant_id, subject_id).await?)
    }

    fn unwrap(
        &self,
        tenant_id: &str,
        subject_id: &str,
        wrapped: &WrappedSubjectKey,
    ) -> Result<KeyBytes, KeyError> {
        let plain = cipher::unwrap(
            &self.wrap_key,
            &wrapped.nonce,
            &wrapped.ciphertext,
            &aad(tenant_id, subject_id),
        )
        .map_err(|_| KeyError::SubjectKeyCorrupt)?;
        KeyBytes::from_slice(&plain).ok_or(KeyError::SubjectKeyCorrupt)
    }
}

fn aad(tenant_id: &str, subject_id: &str) -> Vec<u8> {
    let mut aad = b"pii-vault/subject-key".to_vec();
    for part in [tenant_id, subject_id] {
        aad.extend_from_slice(&(part.len() as u32).to_be_bytes());
        aad.extend_from_slice(part.as_bytes());
    }
    aad
}
