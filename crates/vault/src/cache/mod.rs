//! Bounded, time-limited cache of decrypted plaintext.
//!
//! Entries are keyed by a digest of the stored record together with the
//! tenant and subject it was decrypted for, so a record presented under a
//! different binding never hits. Plaintext is held in [`Zeroizing`] buffers
//! and wiped on expiry, eviction, removal and [`DecryptionCache::clear`].

mod ttl;

pub(crate) use ttl::TtlLru;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::record::EncryptedFieldRecord;
use sha2::{Digest, Sha256};
use tokio::time;
use tracing::debug;
use zeroize::Zeroizing;

/// Digest of a `(tenant, subject)` pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SubjectTag([u8; 32]);

impl SubjectTag {
    fn new(tenant_id: &str, subject_id: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [tenant_id, subject_id] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        Self(digest(hasher))
    }
}

fn digest(hasher: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Digest identifying one decryption, tagged with the subject it belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    record: [u8; 32],
    subject: SubjectTag,
}

impl CacheKey {
    /// SHA-256 over the record's format, key version, salt, nonce, ciphertext
    /// and tag, plus the tenant and subject binding.
    pub fn for_record(tenant_id: &str, subject_id: &str, record: &EncryptedFieldRecord) -> Self {
        let EncryptedFieldRecord::V1(r) = record;
        let subject = SubjectTag::new(tenant_id, subject_id);
        let mut hasher = Sha256::new();
        let mut part = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        };
        part(b"v1");
        part(&r.key_version.to_be_bytes());
        part(&r.salt);
        part(&r.nonce);
        part(&r.ciphertext);
        part(&r.tag);
        part(&subject.0);
        Self {
            record: digest(hasher),
            subject,
        }
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey({})", hex::encode(&self.record[..8]))
    }
}

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// LRU + TTL plaintext cache.
pub struct DecryptionCache {
    entries: TtlLru<CacheKey, Zeroizing<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DecryptionCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: TtlLru::new(capacity, ttl),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Zeroizing<String>> {
        let found = self.entries.get(key);
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, key: CacheKey, plaintext: Zeroizing<String>) {
        self.entries.put(key, plaintext);
    }

    /// Drop one entry. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key)
    }

    /// Drop every entry decrypted for the subject, whichever record it came
    /// from. Returns how many were dropped.
    pub fn evict_subject(&self, tenant_id: &str, subject_id: &str) -> usize {
        let tag = SubjectTag::new(tenant_id, subject_id);
        self.entries.retain(|key| key.subject != tag)
    }

    /// Wipe every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.entries.clear()
    }

    /// Drop entries older than the TTL. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.entries.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Spawn a background task that periodically drops expired plaintext.
pub fn purge_task(cache: Arc<DecryptionCache>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; nothing can have expired yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, "expired plaintext purged from cache");
            }
        }
    })
}
