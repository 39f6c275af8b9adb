//! [`Vault`]: the service object handlers and background tasks share.
//!
//! Built once at start-up from [`Config`]; owns every component behind an
//! `Arc` and exposes the operations of the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use common::audit::AuditEventType;
use common::protocol::{
    ChainReport, Combine, MatchMode, NameQuery, ProtectNameResponse, QueryField,
};
use common::record::{EncryptedFieldRecord, FieldType, ProtectedField};
use common::VaultError;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::{AuditChain, AuditDraft, AuditSigner, AuditStore, MemoryAuditStore};
use crate::cache::{CacheStats, DecryptionCache};
use crate::config::Config;
use crate::context::Context;
use crate::crypto::FieldCipher;
use crate::keys::{KdfParams, KeyManager, SubjectKeyRing};
use crate::search::{SearchIndex, SearchSettings};
use crate::shred::{
    CertificateSigner, DeletionOutcome, DeletionRequest, ShredSettings, ShreddingEngine,
};
use crate::store::{FieldSlot, MemoryRecordStore, RecordStore, StoredField};

/// The PII vault.
pub struct Vault {
    store: Arc<dyn RecordStore>,
    audit: Arc<AuditChain>,
    keys: Arc<KeyManager>,
    cache: Arc<DecryptionCache>,
    cipher: Arc<FieldCipher>,
    index: Arc<SearchIndex>,
    shredder: ShreddingEngine,
    key_retention: u32,
}

impl Vault {
    /// Vault over in-process stores.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::with_stores(
            cfg,
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryAuditStore::new()),
        )
    }

    /// Vault over the given record and audit stores.
    ///
    /// # Errors
    ///
    /// Fails if the master key cannot be derived or a setting is invalid.
    pub fn with_stores(
        cfg: &Config,
        store: Arc<dyn RecordStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self> {
        let audit_signer = cfg
            .audit_signing_secret
            .as_ref()
            .map(|s| AuditSigner::new(s.expose().as_bytes()));
        let audit = Arc::new(AuditChain::new(audit_store, audit_signer));

        let keys = Arc::new(
            KeyManager::new(
                cfg.master_secret.expose(),
                &cfg.install_id,
                KdfParams {
                    time_cost: cfg.kdf_time_cost,
                    memory_kib: cfg.kdf_memory_kib,
                },
                cfg.active_key_version,
                store.clone(),
                audit.clone(),
            )
            .context("failed to derive master key")?,
        );
        let subjects = Arc::new(SubjectKeyRing::new(
            store.clone(),
            keys.clone(),
            cfg.subject_key_cache_capacity,
            Duration::from_secs(cfg.subject_key_cache_ttl_secs),
        ));
        let cache = Arc::new(DecryptionCache::new(
            cfg.cache_capacity,
            Duration::from_secs(cfg.cache_ttl_secs),
        ));
        let cipher = Arc::new(FieldCipher::new(
            keys.clone(),
            subjects.clone(),
            cache.clone(),
            audit.clone(),
        ));

        let index = Arc::new(SearchIndex::new(
            keys.purpose_key("search-pepper"),
            &cfg.install_id,
            SearchSettings {
                iterations: cfg.search_hash_iterations,
                default_country_code: cfg.default_country_code.clone(),
                max_tokens: cfg.max_search_tokens,
                partial_fields: cfg.partial_search_field_types()?,
            },
        ));

        let signer = match &cfg.certificate_signing_secret {
            Some(secret) => {
                CertificateSigner::new(secret.expose().as_bytes(), cfg.certificate_validity_days)
            }
            None => CertificateSigner::new(
                keys.purpose_key("certificate-signing").as_bytes(),
                cfg.certificate_validity_days,
            ),
        };
        let shredder = ShreddingEngine::new(
            store.clone(),
            keys.clone(),
            subjects,
            cipher.clone(),
            cache.clone(),
            audit.clone(),
            signer,
            ShredSettings {
                overwrite_passes: cfg.overwrite_passes,
                tombstone: cfg.overwrite_tombstone,
                sample_rate: cfg.verification_sample_rate,
            },
        );

        info!(
            initial_key_version = keys.initial_version(),
            audit_signed = audit.is_signing(),
            "vault initialised"
        );

        Ok(Self {
            store,
            audit,
            keys,
            cache,
            cipher,
            index,
            shredder,
            key_retention: cfg.key_retention,
        })
    }

    /// The tenant's active key version.
    pub async fn current_key_version(&self, tenant_id: &str) -> Result<u32, VaultError> {
        self.keys.current_version(tenant_id).await
    }

    /// Tenants whose key state is loaded in this process.
    pub fn key_tenants(&self) -> usize {
        self.keys.loaded_tenants()
    }

    pub fn cache(&self) -> &Arc<DecryptionCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn search_index(&self) -> &SearchIndex {
        &self.index
    }

    pub fn certificate_signer(&self) -> &CertificateSigner {
        self.shredder.signer()
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Encrypt `value`, derive its lookup hashes and store both as column
    /// `field_name` of the subject.
    pub async fn protect_field(
        &self,
        ctx: &Context,
        subject_id: &str,
        field_name: &str,
        field_type: FieldType,
        value: &str,
    ) -> Result<ProtectedField, VaultError> {
        if value.trim().is_empty() {
            return Err(VaultError::EmptyPlaintext);
        }
        // Hash first: a value the index rejects is never encrypted.
        let search = {
            let index = self.index.clone();
            let value = Zeroizing::new(value.to_owned());
            blocking(move || index.protect(field_type, &value)).await?
        };
        let record = self
            .cipher
            .encrypt(ctx, subject_id, value, field_type)
            .await?;

        let field = ProtectedField { record, search };
        self.store
            .put_field(
                &ctx.tenant_id,
                subject_id,
                StoredField {
                    field_name: field_name.to_owned(),
                    field_type,
                    slot: FieldSlot::Protected(field.clone()),
                },
            )
            .await?;
        Ok(field)
    }

    /// Store first and last name columns plus the full-name hash.
    pub async fn protect_name(
        &self,
        ctx: &Context,
        subject_id: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<ProtectNameResponse, VaultError> {
        if first_name.trim().is_empty() || last_name.trim().is_empty() {
            return Err(VaultError::EmptyPlaintext);
        }
        let (first_search, last_search, full_name_hash) = {
            let index = self.index.clone();
            let first = Zeroizing::new(first_name.to_owned());
            let last = Zeroizing::new(last_name.to_owned());
            blocking(move || {
                Ok((
                    index.protect(FieldType::FirstName, &first)?,
                    index.protect(FieldType::LastName, &last)?,
                    index.full_name_hash(&first, &last)?,
                ))
            })
            .await?
        };

        let mut records = self
            .cipher
            .encrypt_batch(
                ctx,
                subject_id,
                vec![
                    (FieldType::FirstName, first_name.to_owned()),
                    (FieldType::LastName, last_name.to_owned()),
                ],
            )
            .await?
            .into_iter();
        let (Some(first_record), Some(last_record)) = (records.next(), records.next()) else {
            return Err(VaultError::Internal("batch returned too few records".into()));
        };

        let first = ProtectedField {
            record: first_record,
            search: first_search,
        };
        let last = ProtectedField {
            record: last_record,
            search: last_search,
        };
        for (name, field_type, field) in [
            ("first_name", FieldType::FirstName, &first),
            ("last_name", FieldType::LastName, &last),
        ] {
            self.store
                .put_field(
                    &ctx.tenant_id,
                    subject_id,
                    StoredField {
                        field_name: name.to_owned(),
                        field_type,
                        slot: FieldSlot::Protected(field.clone()),
                    },
                )
                .await?;
        }
        self.store
            .put_name_hash(&ctx.tenant_id, subject_id, Some(full_name_hash.clone()))
            .await?;

        Ok(ProtectNameResponse {
            first_name: first,
            last_name: last,
            full_name_hash,
        })
    }

    /// Decrypt a record the caller holds.
    pub async fn reveal_field(
        &self,
        ctx: &Context,
        subject_id: &str,
        record: &EncryptedFieldRecord,
    ) -> Result<Zeroizing<String>, VaultError> {
        self.cipher.decrypt(ctx, subject_id, record).await
    }

    /// Load column `field_name` of the subject and decrypt it.
    pub async fn reveal_stored(
        &self,
        ctx: &Context,
        subject_id: &str,
        field_name: &str,
    ) -> Result<Zeroizing<String>, VaultError> {
        let field = self
            .store
            .field(&ctx.tenant_id, subject_id, field_name)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("field {field_name}")))?;
        match &field.slot {
            FieldSlot::Protected(p) => self.cipher.decrypt(ctx, subject_id, &p.record).await,
            FieldSlot::Scrambled(_) => Err(VaultError::DecryptionFailed),
            FieldSlot::Tombstone | FieldSlot::Empty => {
                Err(VaultError::NotFound(format!("field {field_name} holds no value")))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Subjects of the tenant matching the query fields and the full name,
    /// all of them or any one per `combine`.
    pub async fn search(
        &self,
        ctx: &Context,
        fields: Vec<QueryField>,
        full_name: Option<NameQuery>,
        combine: Combine,
    ) -> Result<Vec<String>, VaultError> {
        let partial = fields.iter().filter(|f| f.mode == MatchMode::Partial).count();
        let field_count = fields.len();
        let by_name = full_name.is_some();

        let candidates = {
            let index = self.index.clone();
            blocking(move || index.match_query(&fields, full_name.as_ref(), combine)).await?
        };
        let subjects = self.store.find_subjects(&ctx.tenant_id, &candidates).await?;

        self.audit
            .append(
                ctx,
                AuditDraft::new(AuditEventType::SearchPerformed, "search performed")
                    .meta("fields", field_count)
                    .meta("partial_fields", partial)
                    .meta("full_name", by_name)
                    .meta("combine", combine_label(combine))
                    .meta("matches", subjects.len()),
            )
            .await?;
        Ok(subjects)
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Rotate the context tenant's key version.
    pub async fn rotate_keys(&self, ctx: &Context) -> Result<u32, VaultError> {
        self.keys.rotate(ctx).await
    }

    /// Retire the context tenant's cached versions, keeping `keep_latest` or
    /// the configured retention.
    pub async fn retire_keys(
        &self,
        ctx: &Context,
        keep_latest: Option<u32>,
    ) -> Result<Vec<u32>, VaultError> {
        let keep = keep_latest.unwrap_or(self.key_retention).max(1);
        self.keys.retire(keep, ctx).await
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    pub async fn delete_subjects(
        &self,
        ctx: &Context,
        request: DeletionRequest,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome, VaultError> {
        self.shredder.execute(ctx, request, cancel).await
    }

    // -----------------------------------------------------------------------
    // Audit and cache
    // -----------------------------------------------------------------------

    pub async fn verify_audit_chain(
        &self,
        ctx: &Context,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<ChainReport, VaultError> {
        self.audit.verify_chain(ctx, from, to).await
    }

    /// Wipe every cached plaintext. Returns how many entries were dropped.
    pub async fn clear_cache(&self, ctx: &Context) -> Result<usize, VaultError> {
        let cleared = self.cache.clear();
        self.audit
            .append(
                ctx,
                AuditDraft::new(AuditEventType::CacheCleared, "decryption cache cleared")
                    .meta("entries", cleared),
            )
            .await?;
        Ok(cleared)
    }
}

fn combine_label(combine: Combine) -> &'static str {
    match combine {
        Combine::All => "all",
        Combine::Any => "any",
    }
}

/// Run CPU-heavy index work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, VaultError>
where
    F: FnOnce() -> Result<T, VaultError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Internal(format!("blocking task failed: {e}")))?
}

/// Spawn a background task that, on `interval`, rotates every known tenant's
/// key version and then retires versions outside the retention window.
pub fn rotation_task(vault: Arc<Vault>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; the start-up version is fresh.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let tenants = match vault.keys.tenants().await {
                Ok(tenants) => tenants,
                Err(e) => {
                    warn!(error = %e, "scheduled key rotation could not list tenants");
                    continue;
                }
            };
            for tenant in tenants {
                let ctx = Context::with_correlation(tenant, Uuid::new_v4());
                rotate_tenant(&vault, &ctx).await;
            }
        }
    })
}

async fn rotate_tenant(vault: &Vault, ctx: &Context) {
    match vault.rotate_keys(ctx).await {
        Ok(version) => {
            info!(tenant = %ctx.tenant_id, version, "scheduled key rotation complete");
            if let Err(e) = vault.retire_keys(ctx, None).await {
                warn!(tenant = %ctx.tenant_id, error = %e, "key retirement after rotation failed");
            }
        }
        Err(e) => warn!(
            tenant = %ctx.tenant_id,
            error = %e,
            "scheduled key rotation failed; keeping current version"
        ),
    }
}
