//! [`FieldCipher`]: audited encryption and decryption of single field values.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::audit::AuditEventType;
use common::record::{EncryptedFieldRecord, FieldRecordV1, FieldType};
use common::VaultError;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use zeroize::Zeroizing;

use super::cipher::{self, CipherError};
use super::{hmac_sha256, random_array, SALT_LEN};
use crate::audit::{AuditChain, AuditDraft};
use crate::cache::{CacheKey, DecryptionCache};
use crate::context::Context;
use crate::keys::{KeyBytes, KeyManager, SubjectKeyRing};

/// Encrypts and decrypts field values for one subject at a time.
///
/// The per-field key is `HMAC(version_key, "field" ‖ subject_key ‖ salt)`, so
/// reading a field needs the key version named in the record *and* the
/// subject's key. The associated data binds the record format, tenant,
/// subject, field type and key version.
pub struct FieldCipher {
    keys: Arc<KeyManager>,
    subjects: Arc<SubjectKeyRing>,
    cache: Arc<DecryptionCache>,
    audit: Arc<AuditChain>,
}

impl FieldCipher {
    pub fn new(
        keys: Arc<KeyManager>,
        subjects: Arc<SubjectKeyRing>,
        cache: Arc<DecryptionCache>,
        audit: Arc<AuditChain>,
    ) -> Self {
        Self {
            keys,
            subjects,
            cache,
            audit,
        }
    }

    /// Encrypt one value under the active key version.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EmptyPlaintext`] for empty or whitespace-only
    /// input.
    pub async fn encrypt(
        &self,
        ctx: &Context,
        subject_id: &str,
        plaintext: &str,
        field_type: FieldType,
    ) -> Result<EncryptedFieldRecord, VaultError> {
        if plaintext.trim().is_empty() {
            return Err(VaultError::EmptyPlaintext);
        }
        let started = Instant::now();
        let (version, version_key) = self.keys.current_key(&ctx.tenant_id).await?;
        let subject_key = self.subjects.get_or_create(&ctx.tenant_id, subject_id).await?;

        let record = seal_record(
            &version_key,
            version,
            &subject_key,
            &ctx.tenant_id,
            subject_id,
            field_type,
            plaintext.as_bytes(),
        )?;

        self.audit
            .append(ctx, encrypted_event(subject_id, field_type, version, started))
            .await?;
        Ok(EncryptedFieldRecord::V1(record))
    }

    /// Encrypt several values for one subject in parallel.
    ///
    /// Sealing runs on the blocking pool; audit events are appended afterwards
    /// in input order, regardless of which seal finished first.
    pub async fn encrypt_batch(
        &self,
        ctx: &Context,
        subject_id: &str,
        items: Vec<(FieldType, String)>,
    ) -> Result<Vec<EncryptedFieldRecord>, VaultError> {
        if items.iter().any(|(_, value)| value.trim().is_empty()) {
            return Err(VaultError::EmptyPlaintext);
        }
        let started = Instant::now();
        let (version, version_key) = self.keys.current_key(&ctx.tenant_id).await?;
        let subject_key = self.subjects.get_or_create(&ctx.tenant_id, subject_id).await?;

        let handles: Vec<(FieldType, JoinHandle<Result<FieldRecordV1, CipherError>>)> = items
            .into_iter()
            .map(|(field_type, value)| {
                let value = Zeroizing::new(value);
                let version_key = version_key.clone();
                let subject_key = subject_key.clone();
                let tenant_id = ctx.tenant_id.clone();
                let subject = subject_id.to_owned();
                let handle = tokio::task::spawn_blocking(move || {
                    seal_record(
                        &version_key,
                        version,
                        &subject_key,
                        &tenant_id,
                        &subject,
                        field_type,
                        value.as_bytes(),
                    )
                });
                (field_type, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        let mut field_types = Vec::with_capacity(handles.len());
        for (field_type, handle) in handles {
            let record = handle
                .await
                .map_err(|e| VaultError::Internal(format!("seal task failed: {e}")))??;
            records.push(EncryptedFieldRecord::V1(record));
            field_types.push(field_type);
        }

        for field_type in field_types {
            self.audit
                .append(ctx, encrypted_event(subject_id, field_type, version, started))
                .await?;
        }
        Ok(records)
    }

    /// Decrypt a record, serving from the cache when possible.
    ///
    /// Failures are audited before the error is returned: a missing or
    /// destroyed key as `KeyAccessDenied`, anything else as
    /// `DecryptionFailed`.
    pub async fn decrypt(
        &self,
        ctx: &Context,
        subject_id: &str,
        record: &EncryptedFieldRecord,
    ) -> Result<Zeroizing<String>, VaultError> {
        let started = Instant::now();
        let EncryptedFieldRecord::V1(r) = record;
        let cache_key = CacheKey::for_record(&ctx.tenant_id, subject_id, record);

        // Neither a destroyed version nor a shredded subject is ever served
        // from memory.
        if self.keys.is_destroyed(&ctx.tenant_id, r.key_version).await? {
            self.cache.remove(&cache_key);
        } else if let Some(plaintext) = self.cache.get(&cache_key) {
            if self.subjects.get(&ctx.tenant_id, subject_id).await.is_ok() {
                self.audit
                    .append(
                        ctx,
                        decrypted_event(subject_id, r.field_type, r.key_version, started)
                            .meta("cache_hit", true),
                    )
                    .await?;
                return Ok(plaintext);
            }
            self.cache.remove(&cache_key);
        }

        match self.open_record(&ctx.tenant_id, subject_id, r).await {
            Ok(plaintext) => {
                self.cache.put(cache_key, plaintext.clone());
                self.audit
                    .append(
                        ctx,
                        decrypted_event(subject_id, r.field_type, r.key_version, started)
                            .meta("cache_hit", false),
                    )
                    .await?;
                Ok(plaintext)
            }
            Err(e) => {
                self.audit_failure(ctx, subject_id, r, &e).await;
                Err(e)
            }
        }
    }

    /// Whether `record` still opens for the subject. Bypasses the cache and
    /// the audit chain; used to look for residual data after a deletion.
    pub(crate) async fn still_decrypts(
        &self,
        tenant_id: &str,
        subject_id: &str,
        record: &EncryptedFieldRecord,
    ) -> bool {
        let EncryptedFieldRecord::V1(r) = record;
        self.open_record(tenant_id, subject_id, r).await.is_ok()
    }

    async fn open_record(
        &self,
        tenant_id: &str,
        subject_id: &str,
        r: &FieldRecordV1,
    ) -> Result<Zeroizing<String>, VaultError> {
        if r.salt.len() != SALT_LEN {
            return Err(CipherError::Malformed("salt").into());
        }
        let version_key = self.keys.key(tenant_id, r.key_version).await?;
        let subject_key = self.subjects.get(tenant_id, subject_id).await?;

        let field_key = field_key(&version_key, &subject_key, &r.salt);
        let aad = associated_data(tenant_id, subject_id, r.field_type, r.key_version);
        let plain = cipher::open(&field_key, &r.nonce, &r.ciphertext, &r.tag, &aad)?;

        // Non-UTF-8 plaintext cannot have come from `encrypt`.
        std::str::from_utf8(&plain)
            .map(|s| Zeroizing::new(s.to_owned()))
            .map_err(|_| VaultError::DecryptionFailed)
    }

    async fn audit_failure(
        &self,
        ctx: &Context,
        subject_id: &str,
        r: &FieldRecordV1,
        failure: &VaultError,
    ) {
        let (event_type, description) = match failure {
            VaultError::KeyUnavailable(_) => {
                (AuditEventType::KeyAccessDenied, "key unavailable for decryption")
            }
            VaultError::DecryptionFailed => {
                (AuditEventType::DecryptionFailed, "field decryption failed")
            }
            _ => return,
        };
        warn!(
            tenant = %ctx.tenant_id,
            correlation_id = %ctx.correlation_id,
            key_version = r.key_version,
            field_type = %r.field_type,
            reason = failure.code(),
            "decryption refused"
        );

        let draft = AuditDraft::new(event_type, description)
            .subject(subject_id)
            .meta("field_type", r.field_type)
            .meta("key_version", r.key_version)
            .meta("reason", failure.code());
        if let Err(e) = self.audit.append(ctx, draft).await {
            error!(error = %e, "failed to audit decryption failure");
        }
    }
}

fn seal_record(
    version_key: &KeyBytes,
    version: u32,
    subject_key: &KeyBytes,
    tenant_id: &str,
    subject_id: &str,
    field_type: FieldType,
    plaintext: &[u8],
) -> Result<FieldRecordV1, CipherError> {
    let salt = random_array::<SALT_LEN>();
    let field_key = field_key(version_key, subject_key, &salt);
    let aad = associated_data(tenant_id, subject_id, field_type, version);
    let sealed = cipher::seal(&field_key, plaintext, &aad)?;

    Ok(FieldRecordV1 {
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce.to_vec(),
        tag: sealed.tag.to_vec(),
        salt: salt.to_vec(),
        key_version: version,
        field_type,
        encrypted_at: Utc::now(),
    })
}

fn field_key(version_key: &KeyBytes, subject_key: &KeyBytes, salt: &[u8]) -> KeyBytes {
    KeyBytes::new(hmac_sha256(
        version_key.as_bytes(),
        &[b"field", subject_key.as_bytes(), salt],
    ))
}

fn associated_data(
    tenant_id: &str,
    subject_id: &str,
    field_type: FieldType,
    key_version: u32,
) -> Vec<u8> {
    let mut aad = b"pii-vault/v1".to_vec();
    for part in [tenant_id, subject_id, field_type.as_str()] {
        aad.extend_from_slice(&(part.len() as u32).to_be_bytes());
        aad.extend_from_slice(part.as_bytes());
    }
    aad.extend_from_slice(&key_version.to_be_bytes());
    aad
}

fn encrypted_event(
    subject_id: &str,
    field_type: FieldType,
    version: u32,
    started: Instant,
) -> AuditDraft {
    AuditDraft::new(AuditEventType::FieldEncrypted, "field encrypted")
        .subject(subject_id)
        .meta("field_type", field_type)
        .meta("key_version", version)
        .meta("duration_us", started.elapsed().as_micros())
}

fn decrypted_event(
    subject_id: &str,
    field_type: FieldType,
    version: u32,
    started: Instant,
) -> AuditDraft {
    AuditDraft::new(AuditEventType::FieldDecrypted, "field decrypted")
        .subject(subject_id)
        .meta("field_type", field_type)
        .meta("key_version", version)
        .meta("duration_us", started.elapsed().as_micros())
}
