//! [`ShreddingEngine`]: executes deletion requests and proves the result.

use std::collections::BTreeSet;
use std::sync::Arc;

use common::audit::{AuditEventType, Severity};
use common::certificate::{DeletionCertificate, DeletionCounts, DeletionMethod, VerificationStatus};
use common::protocol::ShredScope;
use common::VaultError;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::certificate::{method_label, verification_label, CertificateSigner};
use crate::audit::{AuditChain, AuditDraft};
use crate::cache::DecryptionCache;
use crate::context::Context;
use crate::crypto::{random_vec, FieldCipher};
use crate::keys::{KeyManager, SubjectKeyRing};
use crate::store::{FieldSlot, RecordStore, StoredField};

/// Tunables for overwrite and verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShredSettings {
    /// Random-data passes before the final write.
    pub overwrite_passes: u32,
    /// Final write is [`FieldSlot::Tombstone`] rather than [`FieldSlot::Empty`].
    pub tombstone: bool,
    /// Fraction of targets re-checked after deletion.
    pub sample_rate: f64,
}

impl Default for ShredSettings {
    fn default() -> Self {
        Self {
            overwrite_passes: 3,
            tombstone: true,
            sample_rate: 0.1,
        }
    }
}

/// One deletion request for a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub request_id: Uuid,
    pub subject_ids: Vec<String>,
    pub method: DeletionMethod,
    pub scope: ShredScope,
}

impl DeletionRequest {
    pub fn new(subject_ids: Vec<String>, method: DeletionMethod) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            subject_ids,
            method,
            scope: ShredScope::default(),
        }
    }

    pub fn scope(mut self, scope: ShredScope) -> Self {
        self.scope = scope;
        self
    }
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub subject_id: String,
    /// Stored fields that held data when the target was processed.
    pub fields: usize,
    /// Random overwrite passes that finished. Zero for a plain crypto-shred.
    pub passes_completed: u32,
    pub completed: bool,
    pub error: Option<String>,
}

impl TargetReport {
    fn done(subject_id: &str, fields: usize) -> Self {
        Self {
            subject_id: subject_id.to_owned(),
            fields,
            passes_completed: 0,
            completed: true,
            error: None,
        }
    }

    fn failed(subject_id: &str, error: &VaultError) -> Self {
        Self {
            subject_id: subject_id.to_owned(),
            fields: 0,
            passes_completed: 0,
            completed: false,
            error: Some(error.to_string()),
        }
    }

    fn skipped(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_owned(),
            fields: 0,
            passes_completed: 0,
            completed: false,
            error: Some("cancelled".into()),
        }
    }
}

/// Per-target outcome of one deletion method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionResult {
    pub targets: Vec<TargetReport>,
    /// The cancellation token fired before every target completed.
    pub cancelled: bool,
}

impl DeletionResult {
    pub fn counts(&self) -> DeletionCounts {
        let deleted = self.targets.iter().filter(|t| t.completed).count();
        DeletionCounts {
            processed: self.targets.len(),
            deleted,
            failed: self.targets.len() - deleted,
        }
    }
}

/// Result of post-deletion sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub sampled: Vec<String>,
    /// Sampled targets that still hold recoverable or unfinished data.
    pub residual: Vec<String>,
}

impl VerificationResult {
    pub fn is_clean(&self) -> bool {
        self.residual.is_empty()
    }
}

/// Everything a completed request produced.
#[derive(Debug, Clone)]
pub struct DeletionOutcome {
    pub certificate: DeletionCertificate,
    pub result: DeletionResult,
    pub verification: VerificationResult,
}

impl DeletionOutcome {
    /// # Errors
    ///
    /// Returns [`VaultError::DeletionVerificationFailed`] unless the
    /// certificate is [`VerificationStatus::Verified`].
    pub fn ensure_verified(&self) -> Result<(), VaultError> {
        match self.certificate.verification {
            VerificationStatus::Verified => Ok(()),
            VerificationStatus::Partial => Err(VaultError::DeletionVerificationFailed {
                sampled: self.verification.sampled.len(),
                residual: self.verification.residual.len(),
            }),
        }
    }
}

/// Runs crypto-shred, secure overwrite and hybrid deletions.
///
/// Failures of one target are recorded in its [`TargetReport`] and do not
/// stop the remaining targets.
pub struct ShreddingEngine {
    store: Arc<dyn RecordStore>,
    keys: Arc<KeyManager>,
    subjects: Arc<SubjectKeyRing>,
    cipher: Arc<FieldCipher>,
    cache: Arc<DecryptionCache>,
    audit: Arc<AuditChain>,
    signer: CertificateSigner,
    settings: ShredSettings,
}

impl ShreddingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        keys: Arc<KeyManager>,
        subjects: Arc<SubjectKeyRing>,
        cipher: Arc<FieldCipher>,
        cache: Arc<DecryptionCache>,
        audit: Arc<AuditChain>,
        signer: CertificateSigner,
        settings: ShredSettings,
    ) -> Self {
        Self {
            store,
            keys,
            subjects,
            cipher,
            cache,
            audit,
            signer,
            settings,
        }
    }

    pub fn signer(&self) -> &CertificateSigner {
        &self.signer
    }

    /// Run `request` to completion: delete, sample, certify.
    pub async fn execute(
        &self,
        ctx: &Context,
        request: DeletionRequest,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome, VaultError> {
        let targets = dedup(request.subject_ids);
        if targets.is_empty() {
            return Err(VaultError::InvalidRequest(
                "deletion needs at least one subject".into(),
            ));
        }

        let result = match request.method {
            DeletionMethod::CryptoShred => self.shred(ctx, &targets, request.scope).await,
            DeletionMethod::SecureOverwrite => self.secure_overwrite(ctx, &targets, cancel).await,
            DeletionMethod::Hybrid => self.hybrid(ctx, &targets, request.scope, cancel).await,
        };
        let verification = self
            .verify(ctx, &targets, self.settings.sample_rate)
            .await?;

        let counts = result.counts();
        let status = if verification.is_clean() && counts.failed == 0 {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Partial
        };
        let certificate = self.signer.issue(
            &ctx.tenant_id,
            request.request_id,
            targets,
            request.method,
            counts,
            status,
        );
        self.store.save_certificate(certificate.clone()).await?;

        self.audit
            .append(
                ctx,
                AuditDraft::new(
                    AuditEventType::DeletionCertificateIssued,
                    "deletion certificate issued",
                )
                .meta("certificate_id", certificate.certificate_id)
                .meta("deletion_request_id", request.request_id)
                .meta("method", method_label(request.method))
                .meta("processed", counts.processed)
                .meta("deleted", counts.deleted)
                .meta("failed", counts.failed)
                .meta("verification", verification_label(status)),
            )
            .await?;

        info!(
            tenant = %ctx.tenant_id,
            correlation_id = %ctx.correlation_id,
            certificate_id = %certificate.certificate_id,
            method = method_label(request.method),
            processed = counts.processed,
            deleted = counts.deleted,
            failed = counts.failed,
            verification = verification_label(status),
            "deletion request completed"
        );

        Ok(DeletionOutcome {
            certificate,
            result,
            verification,
        })
    }

    /// Destroy the key material behind each target's fields, evict cached
    /// plaintext and null the stored ciphertext.
    pub async fn shred(
        &self,
        ctx: &Context,
        targets: &[String],
        scope: ShredScope,
    ) -> DeletionResult {
        let mut result = DeletionResult::default();
        for subject_id in targets {
            let report = match self.shred_one(ctx, subject_id, scope, true).await {
                Ok(fields) => TargetReport::done(subject_id, fields),
                Err(e) => {
                    warn!(tenant = %ctx.tenant_id, error = %e, "crypto-shred failed for target");
                    TargetReport::failed(subject_id, &e)
                }
            };
            result.targets.push(report);
        }
        result
    }

    /// Overwrite every stored field of each target with random bytes, then
    /// write the final tombstone or empty value.
    pub async fn secure_overwrite(
        &self,
        ctx: &Context,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> DeletionResult {
        let mut result = DeletionResult::default();
        for subject_id in targets {
            if cancel.is_cancelled() {
                result.cancelled = true;
                result.targets.push(TargetReport::skipped(subject_id));
                continue;
            }
            let report = match self.overwrite_one(ctx, subject_id, cancel).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(
                        tenant = %ctx.tenant_id,
                        error = %e,
                        "secure overwrite failed for target"
                    );
                    TargetReport::failed(subject_id, &e)
                }
            };
            if !report.completed && cancel.is_cancelled() {
                result.cancelled = true;
            }
            result.targets.push(report);
        }
        result
    }

    /// Crypto-shred then overwrite. A target only counts as deleted when
    /// both halves succeed.
    pub async fn hybrid(
        &self,
        ctx: &Context,
        targets: &[String],
        scope: ShredScope,
        cancel: &CancellationToken,
    ) -> DeletionResult {
        let mut result = DeletionResult::default();
        for subject_id in targets {
            if cancel.is_cancelled() {
                result.cancelled = true;
                result.targets.push(TargetReport::skipped(subject_id));
                continue;
            }
            // The overwrite pass replaces the field values, so the shred half
            // leaves them in place.
            let shredded = self.shred_one(ctx, subject_id, scope, false).await;
            let overwritten = self.overwrite_one(ctx, subject_id, cancel).await;

            let report = match (shredded, overwritten) {
                (Ok(_), Ok(report)) => report,
                (Err(e), Ok(report)) => TargetReport {
                    completed: false,
                    error: Some(e.to_string()),
                    ..report
                },
                (_, Err(e)) => TargetReport::failed(subject_id, &e),
            };
            if report.error.is_some() {
                warn!(tenant = %ctx.tenant_id, "hybrid deletion incomplete for target");
            }
            if !report.completed && cancel.is_cancelled() {
                result.cancelled = true;
            }
            result.targets.push(report);
        }
        result
    }

    /// Re-check a random sample of `ceil(n × sample_rate)` targets (at least
    /// one) for residual data.
    pub async fn verify(
        &self,
        ctx: &Context,
        targets: &[String],
        sample_rate: f64,
    ) -> Result<VerificationResult, VaultError> {
        if targets.is_empty() {
            return Ok(VerificationResult::default());
        }
        let sampled: Vec<String> = {
            let mut rng = rand::thread_rng();
            targets
                .choose_multiple(&mut rng, sample_size(targets.len(), sample_rate))
                .cloned()
                .collect()
        };

        let mut residual = Vec::new();
        for subject_id in &sampled {
            if self.has_residual(&ctx.tenant_id, subject_id).await? {
                residual.push(subject_id.clone());
            }
        }

        let mut draft = AuditDraft::new(AuditEventType::DeletionVerified, "deletion verified")
            .meta("sampled", sampled.len())
            .meta("residual", residual.len())
            .meta("sample_rate", sample_rate);
        if !residual.is_empty() {
            warn!(
                tenant = %ctx.tenant_id,
                sampled = sampled.len(),
                residual = residual.len(),
                "residual data found after deletion"
            );
            draft = draft.severity(Severity::High);
        }
        self.audit.append(ctx, draft).await?;

        Ok(VerificationResult { sampled, residual })
    }

    /// Returns the number of fields that held protected data.
    async fn shred_one(
        &self,
        ctx: &Context,
        subject_id: &str,
        scope: ShredScope,
        null_fields: bool,
    ) -> Result<usize, VaultError> {
        let tenant_id = ctx.tenant_id.as_str();
        let protected: Vec<StoredField> = self
            .store
            .fields(tenant_id, subject_id)
            .await?
            .into_iter()
            .filter(|f| matches!(f.slot, FieldSlot::Protected(_)))
            .collect();

        let mut versions = BTreeSet::new();
        for field in &protected {
            if let FieldSlot::Protected(p) = &field.slot {
                versions.insert(p.record.key_version());
            }
        }
        // Older ciphertexts a caller still holds are cached under their own
        // keys; drop everything cached for the subject.
        self.cache.evict_subject(tenant_id, subject_id);

        match scope {
            ShredScope::Subject => {
                let existed = self.subjects.destroy(tenant_id, subject_id).await?;
                self.audit
                    .append(
                        ctx,
                        AuditDraft::new(
                            AuditEventType::SubjectKeyDestroyed,
                            "subject key destroyed",
                        )
                        .subject(subject_id)
                        .meta("existed", existed),
                    )
                    .await?;
            }
            ShredScope::KeyVersions => {
                let versions: Vec<u32> = versions.iter().copied().collect();
                self.keys.destroy_versions(&versions, ctx).await?;
                // Other subjects' plaintext under these versions is gone too.
                // Cache keys do not reveal their tenant, so everything goes.
                self.cache.clear();
            }
        }

        if null_fields {
            for field in &protected {
                self.store
                    .put_field(
                        tenant_id,
                        subject_id,
                        StoredField {
                            slot: FieldSlot::Empty,
                            ..field.clone()
                        },
                    )
                    .await?;
            }
            self.store.put_name_hash(tenant_id, subject_id, None).await?;
        }

        self.audit
            .append(
                ctx,
                AuditDraft::new(AuditEventType::SubjectShredded, "subject crypto-shredded")
                    .subject(subject_id)
                    .meta("fields", protected.len())
                    .meta("scope", scope_label(scope))
                    .meta(
                        "key_versions",
                        versions
                            .iter()
                            .map(u32::to_string)
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
            )
            .await?;
        Ok(protected.len())
    }

    async fn overwrite_one(
        &self,
        ctx: &Context,
        subject_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TargetReport, VaultError> {
        let tenant_id = ctx.tenant_id.as_str();
        let fields: Vec<StoredField> = self
            .store
            .fields(tenant_id, subject_id)
            .await?
            .into_iter()
            .filter(|f| matches!(f.slot, FieldSlot::Protected(_) | FieldSlot::Scrambled(_)))
            .collect();

        self.cache.evict_subject(tenant_id, subject_id);

        let passes = self.settings.overwrite_passes;
        let mut passes_completed = 0;
        for pass in 1..=passes {
            if cancel.is_cancelled() {
                break;
            }
            for field in &fields {
                let len = match &field.slot {
                    FieldSlot::Protected(p) => p.record.ciphertext_len(),
                    FieldSlot::Scrambled(bytes) => bytes.len(),
                    FieldSlot::Tombstone | FieldSlot::Empty => 0,
                };
                self.store
                    .put_field(
                        tenant_id,
                        subject_id,
                        StoredField {
                            slot: FieldSlot::Scrambled(random_vec(len.max(1))),
                            ..field.clone()
                        },
                    )
                    .await?;
            }
            passes_completed = pass;
        }

        let completed = passes_completed == passes && !cancel.is_cancelled();
        if completed {
            let last = if self.settings.tombstone {
                FieldSlot::Tombstone
            } else {
                FieldSlot::Empty
            };
            for field in &fields {
                self.store
                    .put_field(
                        tenant_id,
                        subject_id,
                        StoredField {
                            slot: last.clone(),
                            ..field.clone()
                        },
                    )
                    .await?;
            }
            self.store.put_name_hash(tenant_id, subject_id, None).await?;
        }

        self.audit
            .append(
                ctx,
                AuditDraft::new(AuditEventType::SecureOverwrite, "secure overwrite")
                    .subject(subject_id)
                    .meta("fields", fields.len())
                    .meta("passes", passes)
                    .meta("passes_completed", passes_completed)
                    .meta("completed", completed),
            )
            .await?;

        Ok(TargetReport {
            subject_id: subject_id.to_owned(),
            fields: fields.len(),
            passes_completed,
            completed,
            error: (!completed).then(|| "cancelled".to_owned()),
        })
    }

    /// Stored ciphertext that still opens, or an overwrite that never
    /// reached its final write.
    async fn has_residual(&self, tenant_id: &str, subject_id: &str) -> Result<bool, VaultError> {
        for field in self.store.fields(tenant_id, subject_id).await? {
            match &field.slot {
                FieldSlot::Scrambled(_) => return Ok(true),
                FieldSlot::Protected(p) => {
                    if self
                        .cipher
                        .still_decrypts(tenant_id, subject_id, &p.record)
                        .await
                    {
                        return Ok(true);
                    }
                }
                FieldSlot::Tombstone | FieldSlot::Empty => {}
            }
        }
        Ok(false)
    }
}

fn sample_size(targets: usize, rate: f64) -> usize {
    let n = (targets as f64 * rate).ceil();
    if n.is_finite() && n >= 1.0 {
        (n as usize).min(targets)
    } else {
        1
    }
}

fn dedup(subject_ids: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    subject_ids
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn scope_label(scope: ShredScope) -> &'static str {
    match scope {
        ShredScope::Subject => "subject",
        ShredScope::KeyVersions => "key_versions",
    }
}
