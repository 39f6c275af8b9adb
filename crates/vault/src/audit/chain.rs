//! [`AuditChain`]: hashing, per-tenant sequencing and verification.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use common::audit::{AuditEvent, AuditEventType, Severity, Signature, GENESIS_HASH};
use common::protocol::{BrokenLink, ChainReport};
use common::VaultError;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{AuditDraft, AuditStore};
use crate::context::Context;
use crate::crypto::{hmac_sha256, hmac_sha256_verify};

/// HMAC key used to sign event hashes.
///
/// Kept separate from every encryption key so that a party able to rewrite
/// audit rows cannot re-sign them.
pub struct AuditSigner {
    key: Zeroizing<Vec<u8>>,
}

impl AuditSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(secret.to_vec()),
        }
    }

    /// Hex HMAC-SHA256 over `hash`.
    pub fn sign(&self, hash: &str) -> String {
        hex::encode(hmac_sha256(&self.key, &[hash.as_bytes()]))
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, hash: &str, signature_hex: &str) -> bool {
        match hex::decode(signature_hex) {
            Ok(sig) => hmac_sha256_verify(&self.key, &[hash.as_bytes()], &sig),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for AuditSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuditSigner([REDACTED])")
    }
}

#[derive(Debug, Clone)]
struct ChainHead {
    next_sequence: u64,
    last_hash: String,
}

/// Append-only, per-tenant hash chain over an [`AuditStore`].
pub struct AuditChain {
    store: Arc<dyn AuditStore>,
    heads: DashMap<String, Arc<Mutex<Option<ChainHead>>>>,
    signer: Option<AuditSigner>,
}

impl AuditChain {
    pub fn new(store: Arc<dyn AuditStore>, signer: Option<AuditSigner>) -> Self {
        Self {
            store,
            heads: DashMap::new(),
            signer,
        }
    }

    /// Whether appended events are signed.
    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Sequence, hash, sign and persist one event for `ctx.tenant_id`.
    ///
    /// Appends for the same tenant are serialised: the tenant lock is held
    /// across the store write, so chain order is call order. Returns the new
    /// event's hash.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Store`] if the store fails; the chain head is left
    /// unchanged in that case.
    pub async fn append(&self, ctx: &Context, draft: AuditDraft) -> Result<String, VaultError> {
        let lock = self
            .heads
            .entry(ctx.tenant_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut head = lock.lock().await;

        let current = match head.as_ref() {
            Some(h) => h.clone(),
            None => self.load_head(&ctx.tenant_id).await?,
        };

        let mut event = AuditEvent {
            id: Uuid::new_v4(),
            sequence: current.next_sequence,
            tenant_id: ctx.tenant_id.clone(),
            event_type: draft.event_type,
            severity: draft.severity,
            subject_id: draft.subject_id,
            description: draft.description,
            correlation_id: ctx.correlation_id,
            metadata: draft.metadata,
            timestamp: Utc::now(),
            previous_hash: current.last_hash,
            hash: String::new(),
            signature: Signature::Unsigned,
        };
        event.hash = compute_hash(&event);
        if let Some(signer) = &self.signer {
            event.signature = Signature::Signed(signer.sign(&event.hash));
        }

        let hash = event.hash.clone();
        let sequence = event.sequence;
        let event_type = event.event_type;
        self.store.append(event).await?;

        *head = Some(ChainHead {
            next_sequence: sequence + 1,
            last_hash: hash.clone(),
        });
        debug!(tenant = %ctx.tenant_id, sequence, event_type = %event_type, "audit event appended");
        Ok(hash)
    }

    /// Re-walk a tenant's chain (optionally a sequence range) and report
    /// corrupt events and broken links.
    ///
    /// The verification itself is appended to the chain: `ChainVerified` when
    /// clean, a critical `ChainIntegrityViolation` otherwise.
    pub async fn verify_chain(
        &self,
        ctx: &Context,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<ChainReport, VaultError> {
        let from = from.unwrap_or(0);
        let events = self.store.range(&ctx.tenant_id, from, to).await?;

        // A range starting mid-chain is anchored on the stored predecessor.
        let anchor = if from == 0 {
            Some(GENESIS_HASH.to_owned())
        } else {
            self.store
                .range(&ctx.tenant_id, from - 1, Some(from - 1))
                .await?
                .into_iter()
                .next()
                .map(|e| e.hash)
        };

        let report = verify_events(
            &ctx.tenant_id,
            &events,
            anchor.as_deref(),
            self.signer.as_ref(),
        );

        let draft = if report.verified {
            AuditDraft::new(AuditEventType::ChainVerified, "audit chain verified")
        } else {
            error!(
                tenant = %ctx.tenant_id,
                corrupt = report.corrupt_events.len(),
                broken = report.broken_links.len(),
                invalid_signatures = report.invalid_signatures.len(),
                "audit chain integrity violation"
            );
            AuditDraft::new(
                AuditEventType::ChainIntegrityViolation,
                "audit chain verification found tampering",
            )
            .severity(Severity::Critical)
            .meta("corrupt_events", report.corrupt_events.len())
            .meta("broken_links", report.broken_links.len())
            .meta("invalid_signatures", report.invalid_signatures.len())
        };
        self.append(
            ctx,
            draft
                .meta("events_checked", report.events_checked)
                .meta("from", from),
        )
        .await?;

        Ok(report)
    }

    async fn load_head(&self, tenant_id: &str) -> Result<ChainHead, VaultError> {
        Ok(match self.store.last(tenant_id).await? {
            Some(last) => ChainHead {
                next_sequence: last.sequence + 1,
                last_hash: last.hash,
            },
            None => ChainHead {
                next_sequence: 0,
                last_hash: GENESIS_HASH.to_owned(),
            },
        })
    }
}

/// Turn a report into an error when the chain is not intact.
pub fn ensure_intact(report: &ChainReport) -> Result<(), VaultError> {
    if report.verified {
        return Ok(());
    }
    Err(VaultError::ChainIntegrityViolation {
        tenant: report.tenant_id.clone(),
        corrupt: report.corrupt_events.len() + report.invalid_signatures.len(),
        broken: report.broken_links.len(),
    })
}

/// SHA-256 (hex) over the canonical JSON of `event`.
///
/// Canonical means compact, keys in lexicographic order (metadata is a
/// sorted map) and timestamps at nanosecond precision. `hash` and
/// `signature` are excluded.
pub fn compute_hash(event: &AuditEvent) -> String {
    // Keys are listed in sorted order so the output does not depend on
    // whether serde_json preserves insertion order.
    let canonical = serde_json::json!({
        "correlation_id": event.correlation_id,
        "description": event.description,
        "event_type": event.event_type,
        "id": event.id,
        "metadata": event.metadata,
        "previous_hash": event.previous_hash,
        "sequence": event.sequence,
        "severity": event.severity,
        "subject_id": event.subject_id,
        "tenant_id": event.tenant_id,
        "timestamp": event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
    });
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

/// Verify a contiguous slice of one tenant's chain.
///
/// `anchor` is the expected `previous_hash` of the first event (genesis for a
/// full walk). An event whose recomputed hash differs from its stored hash is
/// corrupt; an event whose `previous_hash` differs from the recomputed hash of
/// its predecessor is a broken link. With a signer, unsigned events and bad
/// signatures are reported as invalid signatures.
pub fn verify_events(
    tenant_id: &str,
    events: &[AuditEvent],
    anchor: Option<&str>,
    signer: Option<&AuditSigner>,
) -> ChainReport {
    let mut report = ChainReport {
        tenant_id: tenant_id.to_owned(),
        events_checked: events.len(),
        ..ChainReport::default()
    };

    let mut expected_previous = anchor.map(str::to_owned);
    for event in events {
        let recomputed = compute_hash(event);
        if recomputed != event.hash {
            report.corrupt_events.push(event.sequence);
        }

        if let Some(expected) = expected_previous.take() {
            if event.previous_hash != expected {
                report.broken_links.push(BrokenLink {
                    sequence: event.sequence,
                    expected_previous_hash: expected,
                    found_previous_hash: event.previous_hash.clone(),
                });
            }
        }

        match (&event.signature, signer) {
            (Signature::Signed(sig), Some(signer)) => {
                if !signer.verify(&recomputed, sig) {
                    report.invalid_signatures.push(event.sequence);
                }
            }
            (Signature::Signed(_), None) => report.unchecked_signatures.push(event.sequence),
            (Signature::Unsigned, Some(_)) => report.invalid_signatures.push(event.sequence),
            (Signature::Unsigned, None) => {}
        }

        expected_previous = Some(recomputed);
    }

    report.verified = report.corrupt_events.is_empty()
        && report.broken_links.is_empty()
        && report.invalid_signatures.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::{MemoryAuditStore, MockAuditStore};
    use crate::store::StoreError;

    fn chain_with(store: Arc<MemoryAuditStore>, signer: Option<AuditSigner>) -> AuditChain {
        AuditChain::new(store, signer)
    }

    async fn append_n(chain: &AuditChain, ctx: &Context, n: usize) {
        for i in 0..n {
            chain
                .append(
                    ctx,
                    AuditDraft::new(AuditEventType::FieldEncrypted, "field encrypted")
                        .subject(format!("c-{i}"))
                        .meta("key_version", 1),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn append_links_events() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), None);
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 3).await;

        let events = store.range("acme", 0, None).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].previous_hash, GENESIS_HASH);
        assert_eq!(events[1].previous_hash, events[0].hash);
        assert_eq!(events[2].previous_hash, events[1].hash);
        assert_eq!(events[2].sequence, 2);
        assert!(events.iter().all(|e| e.signature == Signature::Unsigned));
    }

    #[tokio::test]
    async fn untouched_chain_verifies() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), None);
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 10).await;

        let report = chain.verify_chain(&ctx, None, None).await.unwrap();
        assert!(report.verified);
        assert_eq!(report.events_checked, 10);
        assert!(report.broken_links.is_empty());
        assert!(report.corrupt_events.is_empty());
        assert!(ensure_intact(&report).is_ok());

        // The verification itself was appended.
        let last = store.last("acme").await.unwrap().unwrap();
        assert_eq!(last.event_type, AuditEventType::ChainVerified);
    }

    #[tokio::test]
    async fn tampered_event_is_corrupt_and_next_link_broken() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), None);
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 5).await;

        assert!(store.rewrite_row("acme", 2, |e| e.description = "nothing happened".into()));

        let report = chain.verify_chain(&ctx, None, Some(4)).await.unwrap();
        assert!(!report.verified);
        assert_eq!(report.corrupt_events, vec![2]);
        assert_eq!(report.broken_links.len(), 1);
        assert_eq!(report.broken_links[0].sequence, 3);
        assert!(matches!(
            ensure_intact(&report),
            Err(VaultError::ChainIntegrityViolation { .. })
        ));

        let last = store.last("acme").await.unwrap().unwrap();
        assert_eq!(last.event_type, AuditEventType::ChainIntegrityViolation);
        assert_eq!(last.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn rehashed_forgery_breaks_the_link() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), None);
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 4).await;

        // Attacker rewrites content and recomputes the row's own hash.
        store.rewrite_row("acme", 1, |e| {
            e.subject_id = Some("someone-else".into());
            e.hash = compute_hash(e);
        });

        let events = store.range("acme", 0, Some(3)).await.unwrap();
        let report = verify_events("acme", &events, Some(GENESIS_HASH), None);
        assert!(report.corrupt_events.is_empty());
        assert_eq!(report.broken_links.len(), 1);
        assert_eq!(report.broken_links[0].sequence, 2);
    }

    #[tokio::test]
    async fn signed_chain_detects_resigned_rows() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), Some(AuditSigner::new(b"audit-signing-secret")));
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 3).await;

        let events = store.range("acme", 0, None).await.unwrap();
        assert!(events.iter().all(|e| e.signature.is_signed()));

        // Rewrite the whole tail consistently, but without the signing key.
        let forger = AuditSigner::new(b"guessed");
        let mut forged = events.clone();
        forged[2].description = "edited".into();
        forged[2].hash = compute_hash(&forged[2]);
        forged[2].signature = Signature::Signed(forger.sign(&forged[2].hash));

        let signer = AuditSigner::new(b"audit-signing-secret");
        let report = verify_events("acme", &forged, Some(GENESIS_HASH), Some(&signer));
        assert!(!report.verified);
        assert_eq!(report.invalid_signatures, vec![2]);
        assert!(report.corrupt_events.is_empty());
    }

    #[tokio::test]
    async fn signatures_unchecked_without_secret() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), Some(AuditSigner::new(b"k")));
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 2).await;

        let events = store.range("acme", 0, None).await.unwrap();
        let report = verify_events("acme", &events, Some(GENESIS_HASH), None);
        assert!(report.verified);
        assert_eq!(report.unchecked_signatures, vec![0, 1]);
    }

    #[tokio::test]
    async fn tenants_have_independent_chains() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), None);
        append_n(&chain, &Context::new("a"), 2).await;
        append_n(&chain, &Context::new("b"), 3).await;
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 3);
        let first_b = store.range("b", 0, Some(0)).await.unwrap();
        assert_eq!(first_b[0].previous_hash, GENESIS_HASH);
    }

    #[tokio::test]
    async fn concurrent_appends_stay_linear() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = Arc::new(chain_with(store.clone(), None));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let chain = chain.clone();
            tasks.push(tokio::spawn(async move {
                append_n(&chain, &Context::new("acme"), 5).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let events = store.range("acme", 0, None).await.unwrap();
        assert_eq!(events.len(), 40);
        let report = verify_events("acme", &events, Some(GENESIS_HASH), None);
        assert!(report.verified);
    }

    #[tokio::test]
    async fn partial_range_is_anchored_on_predecessor() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = chain_with(store.clone(), None);
        let ctx = Context::new("acme");
        append_n(&chain, &ctx, 6).await;

        let report = chain.verify_chain(&ctx, Some(3), Some(5)).await.unwrap();
        assert!(report.verified);
        assert_eq!(report.events_checked, 3);
    }

    #[tokio::test]
    async fn resumes_from_persisted_head() {
        let store = Arc::new(MemoryAuditStore::new());
        let ctx = Context::new("acme");
        append_n(&chain_with(store.clone(), None), &ctx, 2).await;

        // A fresh chain over the same store continues the sequence.
        let chain = chain_with(store.clone(), None);
        append_n(&chain, &ctx, 1).await;
        let events = store.range("acme", 0, None).await.unwrap();
        assert_eq!(events[2].sequence, 2);
        assert_eq!(events[2].previous_hash, events[1].hash);
    }

    #[tokio::test]
    async fn store_failure_is_propagated() {
        let mut store = MockAuditStore::new();
        store.expect_last().returning(|_| Ok(None));
        store
            .expect_append()
            .returning(|_| Err(StoreError::Unavailable("db down".into())));
        let chain = AuditChain::new(Arc::new(store), None);

        let err = chain
            .append(
                &Context::new("acme"),
                AuditDraft::new(AuditEventType::KeyRotated, "rotated"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Store(_)));
    }
}
