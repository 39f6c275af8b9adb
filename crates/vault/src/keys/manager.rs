//! [`KeyManager`]: master key stretching and per-tenant versioned working keys.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use common::audit::AuditEventType;
use common::VaultError;
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{KeyBytes, KeyError, MIN_MASTER_SECRET_LEN};
use crate::audit::{AuditChain, AuditDraft};
use crate::context::Context;
use crate::crypto::{hmac_sha256, KEY_LEN};
use crate::store::{KeyVersionState, RecordStore};

/// Argon2id cost parameters for stretching the master secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub time_cost: u32,
    pub memory_kib: u32,
}

/// Public description of a key version. Carries no key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyVersionInfo {
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

enum VersionSlot {
    Live {
        key: KeyBytes,
        created_at: DateTime<Utc>,
    },
    /// Evicted from memory; re-derivable from the master key.
    Retired { created_at: DateTime<Utc> },
    /// Refused forever; persisted in the tenant's key state.
    Destroyed,
}

/// One tenant's key versions.
///
/// The active version is published through [`ArcSwap`] so the hot path reads
/// it without locking. `update` serialises the persisted state changes of
/// rotation and destruction.
struct TenantKeys {
    tenant_id: String,
    active: ArcSwap<KeyVersionInfo>,
    versions: RwLock<BTreeMap<u32, VersionSlot>>,
    update: Mutex<()>,
}

impl TenantKeys {
    fn current_version(&self) -> u32 {
        self.active.load().version
    }

    fn destroyed(&self) -> Vec<u32> {
        self.versions
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, VersionSlot::Destroyed))
            .map(|(v, _)| *v)
            .collect()
    }

    fn key(&self, master: &[u8; KEY_LEN], version: u32) -> Result<KeyBytes, KeyError> {
        if version == 0 || version > self.current_version() {
            return Err(KeyError::Unavailable(version));
        }

        {
            let versions = self.versions.read();
            match versions.get(&version) {
                Some(VersionSlot::Live { key, .. }) => return Ok(key.clone()),
                Some(VersionSlot::Destroyed) => return Err(KeyError::Destroyed(version)),
                _ => {}
            }
        }

        let mut versions = self.versions.write();
        let created_at = match versions.get(&version) {
            Some(VersionSlot::Live { key, .. }) => return Ok(key.clone()),
            Some(VersionSlot::Destroyed) => return Err(KeyError::Destroyed(version)),
            Some(VersionSlot::Retired { created_at }) => *created_at,
            None => Utc::now(),
        };
        let key = derive_version_key(master, &self.tenant_id, version);
        versions.insert(
            version,
            VersionSlot::Live {
                key: key.clone(),
                created_at,
            },
        );
        debug!(tenant = %self.tenant_id, version, "key version re-derived");
        Ok(key)
    }
}

/// Derives, caches, rotates, retires and destroys versioned working keys.
///
/// Every tenant has its own version sequence and its own derived keys, so
/// destroying a version only ever affects the tenant that destroyed it. A
/// tenant's active version and destroyed versions live in the record store
/// and are loaded on the tenant's first use.
pub struct KeyManager {
    master: Zeroizing<[u8; KEY_LEN]>,
    initial_version: u32,
    store: Arc<dyn RecordStore>,
    tenants: DashMap<String, Arc<TenantKeys>>,
    load_lock: Mutex<()>,
    audit: Arc<AuditChain>,
}

impl KeyManager {
    /// Stretch `master_secret`. Tenants without persisted state start at
    /// `initial_version`.
    ///
    /// Versions below a tenant's active version are re-derived on demand,
    /// which lets a restarted process keep reading data written before the
    /// restart.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::WeakMasterSecret`] for secrets shorter than
    /// [`MIN_MASTER_SECRET_LEN`] characters and [`KeyError::Kdf`] if Argon2
    /// rejects `params`.
    pub fn new(
        master_secret: &str,
        install_id: &str,
        params: KdfParams,
        initial_version: u32,
        store: Arc<dyn RecordStore>,
        audit: Arc<AuditChain>,
    ) -> Result<Self, KeyError> {
        if master_secret.chars().count() < MIN_MASTER_SECRET_LEN {
            return Err(KeyError::WeakMasterSecret);
        }

        let salt = Sha256::new()
            .chain_update(b"pii-vault/master-salt/")
            .chain_update(install_id.as_bytes())
            .finalize();
        let argon_params = Params::new(params.memory_kib, params.time_cost, 1, Some(KEY_LEN))
            .map_err(|e| KeyError::Kdf(e.to_string()))?;
        let mut master = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
            .hash_password_into(master_secret.as_bytes(), &salt, master.as_mut())
            .map_err(|e| KeyError::Kdf(e.to_string()))?;

        Ok(Self {
            master,
            initial_version: initial_version.max(1),
            store,
            tenants: DashMap::new(),
            load_lock: Mutex::new(()),
            audit,
        })
    }

    /// Version a tenant without persisted state starts at.
    pub fn initial_version(&self) -> u32 {
        self.initial_version
    }

    /// The tenant's active version number.
    pub async fn current_version(&self, tenant_id: &str) -> Result<u32, VaultError> {
        Ok(self.tenant(tenant_id).await?.current_version())
    }

    /// The tenant's active version and when it became active.
    pub async fn active(&self, tenant_id: &str) -> Result<KeyVersionInfo, VaultError> {
        Ok(**self.tenant(tenant_id).await?.active.load())
    }

    /// The tenant's working key for `version`, re-deriving it if it was
    /// retired.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyUnavailable`] for version 0, versions newer
    /// than the active one, and destroyed versions.
    pub async fn key(&self, tenant_id: &str, version: u32) -> Result<KeyBytes, VaultError> {
        Ok(self.tenant(tenant_id).await?.key(&self.master, version)?)
    }

    /// The tenant's active version together with its key.
    pub async fn current_key(&self, tenant_id: &str) -> Result<(u32, KeyBytes), VaultError> {
        let tenant = self.tenant(tenant_id).await?;
        let version = tenant.current_version();
        Ok((version, tenant.key(&self.master, version)?))
    }

    /// Versions whose key bytes are currently held in memory.
    pub async fn live_versions(&self, tenant_id: &str) -> Result<Vec<u32>, VaultError> {
        Ok(self
            .tenant(tenant_id)
            .await?
            .versions
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, VersionSlot::Live { .. }))
            .map(|(v, _)| *v)
            .collect())
    }

    pub async fn is_destroyed(&self, tenant_id: &str, version: u32) -> Result<bool, VaultError> {
        Ok(matches!(
            self.tenant(tenant_id).await?.versions.read().get(&version),
            Some(VersionSlot::Destroyed)
        ))
    }

    /// Tenants with persisted or loaded key state, sorted.
    pub async fn tenants(&self) -> Result<Vec<String>, VaultError> {
        let mut all: BTreeSet<String> = self.store.key_state_tenants().await?.into_iter().collect();
        all.extend(self.tenants.iter().map(|t| t.key().clone()));
        Ok(all.into_iter().collect())
    }

    /// Tenants whose key state is loaded in this process.
    pub fn loaded_tenants(&self) -> usize {
        self.tenants.len()
    }

    /// Derive a domain-separated key from the master key.
    ///
    /// Used for keys that are not versioned: the search pepper, the subject
    /// key wrapping key and the fallback certificate-signing key.
    pub fn purpose_key(&self, label: &str) -> KeyBytes {
        KeyBytes::new(hmac_sha256(
            self.master.as_ref(),
            &[b"pii-vault/purpose/", label.as_bytes()],
        ))
    }

    /// Create version N+1 for the context's tenant and make it active.
    ///
    /// Existing data is not re-encrypted; older versions stay readable.
    pub async fn rotate(&self, ctx: &Context) -> Result<u32, VaultError> {
        let tenant = self.tenant(&ctx.tenant_id).await?;
        let next = {
            let _update = tenant.update.lock().await;
            let next = tenant.current_version() + 1;
            let activated_at = Utc::now();
            self.persist(&tenant, next, activated_at, tenant.destroyed())
                .await?;
            self.activate(&tenant, next, activated_at);
            next
        };

        info!(tenant = %ctx.tenant_id, version = next, "key rotated");
        self.audit_rotation(ctx, next).await?;
        Ok(next)
    }

    /// Zero and evict every cached version of the context's tenant older
    /// than the newest `keep_latest`.
    ///
    /// The active version is always kept. Retired versions are re-derived on
    /// demand; see [`KeyManager::destroy_versions`] for irreversible removal.
    pub async fn retire(&self, keep_latest: u32, ctx: &Context) -> Result<Vec<u32>, VaultError> {
        let tenant = self.tenant(&ctx.tenant_id).await?;
        let floor = tenant.current_version().saturating_sub(keep_latest.max(1));
        let retired: Vec<u32> = {
            let mut versions = tenant.versions.write();
            let mut retired = Vec::new();
            for (version, slot) in versions.range_mut(..=floor) {
                if let VersionSlot::Live { created_at, .. } = slot {
                    // Replacing the slot drops, and thereby zeroes, the key.
                    *slot = VersionSlot::Retired {
                        created_at: *created_at,
                    };
                    retired.push(*version);
                }
            }
            retired
        };

        if !retired.is_empty() {
            info!(tenant = %ctx.tenant_id, versions = ?retired, "key versions retired");
            self.audit
                .append(
                    ctx,
                    AuditDraft::new(AuditEventType::KeysRetired, "key versions retired")
                        .meta("versions", join_versions(&retired))
                        .meta("keep_latest", keep_latest),
                )
                .await?;
        }
        Ok(retired)
    }

    /// Irreversibly refuse `versions` of the context's tenant. Destroying the
    /// active version rotates to a fresh one so new encryptions keep working.
    ///
    /// The destruction is persisted before it takes effect in memory; a
    /// failed store write destroys nothing.
    pub async fn destroy_versions(
        &self,
        versions: &[u32],
        ctx: &Context,
    ) -> Result<Vec<u32>, VaultError> {
        let tenant = self.tenant(&ctx.tenant_id).await?;
        let (destroyed, rotated_to) = {
            let _update = tenant.update.lock().await;
            let current = tenant.current_version();
            let already: BTreeSet<u32> = tenant.destroyed().into_iter().collect();
            let mut destroyed = Vec::new();
            for &version in versions {
                if version == 0
                    || version > current
                    || already.contains(&version)
                    || destroyed.contains(&version)
                {
                    continue;
                }
                destroyed.push(version);
            }
            if destroyed.is_empty() {
                return Ok(destroyed);
            }

            let rotated_to = destroyed.contains(&current).then_some(current + 1);
            let all: BTreeSet<u32> = already.iter().chain(&destroyed).copied().collect();
            let active = **tenant.active.load();
            let (next, activated_at) = match rotated_to {
                Some(next) => (next, Utc::now()),
                None => (active.version, active.created_at),
            };
            self.persist(&tenant, next, activated_at, all.into_iter().collect())
                .await?;

            {
                let mut map = tenant.versions.write();
                for &version in &destroyed {
                    map.insert(version, VersionSlot::Destroyed);
                }
            }
            if rotated_to.is_some() {
                self.activate(&tenant, next, activated_at);
            }
            (destroyed, rotated_to)
        };

        warn!(tenant = %ctx.tenant_id, versions = ?destroyed, "key versions destroyed");
        self.audit
            .append(
                ctx,
                AuditDraft::new(
                    AuditEventType::KeyVersionsDestroyed,
                    "key versions destroyed",
                )
                .meta("versions", join_versions(&destroyed)),
            )
            .await?;

        if let Some(next) = rotated_to {
            info!(tenant = %ctx.tenant_id, version = next, "key rotated");
            self.audit_rotation(ctx, next).await?;
        }
        Ok(destroyed)
    }

    /// The tenant's key state, loading it from the store on first use.
    ///
    /// A tenant starts at the higher of the configured initial version and its
    /// persisted active version, moved past any destroyed version.
    async fn tenant(&self, tenant_id: &str) -> Result<Arc<TenantKeys>, VaultError> {
        if let Some(tenant) = self.tenants.get(tenant_id) {
            return Ok(tenant.value().clone());
        }

        let _load = self.load_lock.lock().await;
        if let Some(tenant) = self.tenants.get(tenant_id) {
            return Ok(tenant.value().clone());
        }

        let persisted = self.store.key_state(tenant_id).await?;
        let destroyed: BTreeSet<u32> = persisted
            .as_ref()
            .map(|s| s.destroyed.iter().copied().collect())
            .unwrap_or_default();
        let mut active = persisted
            .as_ref()
            .map_or(self.initial_version, |s| s.active.max(self.initial_version));
        while destroyed.contains(&active) {
            active += 1;
        }
        let activated_at = match &persisted {
            Some(s) if s.active == active => s.activated_at,
            _ => Utc::now(),
        };

        let state = KeyVersionState {
            active,
            activated_at,
            destroyed: destroyed.iter().copied().collect(),
        };
        if persisted.as_ref() != Some(&state) {
            self.store.put_key_state(tenant_id, state).await?;
        }

        let mut versions: BTreeMap<u32, VersionSlot> = destroyed
            .iter()
            .map(|&v| (v, VersionSlot::Destroyed))
            .collect();
        versions.insert(
            active,
            VersionSlot::Live {
                key: derive_version_key(&self.master, tenant_id, active),
                created_at: activated_at,
            },
        );

        let tenant = Arc::new(TenantKeys {
            tenant_id: tenant_id.to_owned(),
            active: ArcSwap::from_pointee(KeyVersionInfo {
                version: active,
                created_at: activated_at,
            }),
            versions: RwLock::new(versions),
            update: Mutex::new(()),
        });
        self.tenants.insert(tenant_id.to_owned(), tenant.clone());
        debug!(
            tenant = tenant_id,
            version = active,
            destroyed = destroyed.len(),
            "tenant key state loaded"
        );
        Ok(tenant)
    }

    async fn persist(
        &self,
        tenant: &TenantKeys,
        active: u32,
        activated_at: DateTime<Utc>,
        destroyed: Vec<u32>,
    ) -> Result<(), VaultError> {
        let state = KeyVersionState {
            active,
            activated_at,
            destroyed,
        };
        Ok(self.store.put_key_state(&tenant.tenant_id, state).await?)
    }

    fn activate(&self, tenant: &TenantKeys, version: u32, created_at: DateTime<Utc>) {
        let mut versions = tenant.versions.write();
        versions.insert(
            version,
            VersionSlot::Live {
                key: derive_version_key(&self.master, &tenant.tenant_id, version),
                created_at,
            },
        );
        tenant.active.store(Arc::new(KeyVersionInfo {
            version,
            created_at,
        }));
    }

    async fn audit_rotation(&self, ctx: &Context, version: u32) -> Result<(), VaultError> {
        self.audit
            .append(
                ctx,
                AuditDraft::new(AuditEventType::KeyRotated, "key version rotated")
                    .meta("key_version", version)
                    .meta("previous_version", version - 1),
            )
            .await?;
        Ok(())
    }
}

/// `HMAC(master, "version/" ‖ len ‖ tenant ‖ be32(version))`.
fn derive_version_key(master: &[u8; KEY_LEN], tenant_id: &str, version: u32) -> KeyBytes {
    KeyBytes::new(hmac_sha256(
        master,
        &[
            b"version/",
            &(tenant_id.len() as u32).to_be_bytes(),
            tenant_id.as_bytes(),
            &version.to_be_bytes(),
        ],
    ))
}

fn join_versions(versions: &[u32]) -> String {
    versions
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::{AuditStore, MemoryAuditStore};
    use crate::store::MemoryRecordStore;

    pub(crate) const TEST_SECRET: &str = "correct horse battery staple, twice over";

    pub(crate) fn fast_params() -> KdfParams {
        KdfParams {
            time_cost: 1,
            memory_kib: 64,
        }
    }

    pub(crate) fn test_manager(audit: Arc<AuditChain>) -> KeyManager {
        test_manager_on(Arc::new(MemoryRecordStore::new()), audit)
    }

    /// A manager whose key state lives in `store`.
    pub(crate) fn test_manager_on(
        store: Arc<dyn RecordStore>,
        audit: Arc<AuditChain>,
    ) -> KeyManager {
        KeyManager::new(TEST_SECRET, "install-test", fast_params(), 1, store, audit).unwrap()
    }

    fn audit() -> (Arc<MemoryAuditStore>, Arc<AuditChain>) {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = Arc::new(AuditChain::new(store.clone(), None));
        (store, chain)
    }

    fn bytes(key: Result<KeyBytes, VaultError>) -> [u8; KEY_LEN] {
        *key.unwrap().as_bytes()
    }

    #[test]
    fn rejects_short_master_secret() {
        let (_, chain) = audit();
        let store = Arc::new(MemoryRecordStore::new());
        let result = KeyManager::new("short", "install", fast_params(), 1, store, chain);
        assert!(matches!(result, Err(KeyError::WeakMasterSecret)));
    }

    #[test]
    fn rejects_invalid_kdf_params() {
        let (_, chain) = audit();
        let params = KdfParams {
            time_cost: 0,
            memory_kib: 64,
        };
        let store = Arc::new(MemoryRecordStore::new());
        let result = KeyManager::new(TEST_SECRET, "install", params, 1, store, chain);
        assert!(matches!(result, Err(KeyError::Kdf(_))));
    }

    #[tokio::test]
    async fn derivation_is_deterministic_per_install_and_tenant() {
        let (_, chain) = audit();
        let a = test_manager(chain.clone());
        let b = test_manager(chain.clone());
        assert_eq!(bytes(a.key("acme", 1).await), bytes(b.key("acme", 1).await));
        assert_ne!(bytes(a.key("acme", 1).await), bytes(a.key("other", 1).await));

        let store = Arc::new(MemoryRecordStore::new());
        let other =
            KeyManager::new(TEST_SECRET, "other-install", fast_params(), 1, store, chain).unwrap();
        assert_ne!(bytes(a.key("acme", 1).await), bytes(other.key("acme", 1).await));
    }

    #[tokio::test]
    async fn unknown_versions_are_unavailable() {
        let (_, chain) = audit();
        let km = test_manager(chain);
        assert!(matches!(km.key("acme", 0).await, Err(VaultError::KeyUnavailable(_))));
        assert!(matches!(km.key("acme", 2).await, Err(VaultError::KeyUnavailable(_))));
    }

    #[tokio::test]
    async fn rotate_creates_new_active_version() {
        let (store, chain) = audit();
        let km = test_manager(chain);
        let ctx = Context::new("acme");
        let v1 = bytes(km.key("acme", 1).await);
        let before = km.active("acme").await.unwrap();

        assert_eq!(km.rotate(&ctx).await.unwrap(), 2);
        assert_eq!(km.current_version("acme").await.unwrap(), 2);
        assert_eq!(km.active("acme").await.unwrap().version, 2);
        assert!(km.active("acme").await.unwrap().created_at >= before.created_at);
        let (version, v2) = km.current_key("acme").await.unwrap();
        assert_eq!(version, 2);
        assert_ne!(&v1, v2.as_bytes());
        // Old version still available.
        assert_eq!(bytes(km.key("acme", 1).await), v1);
        // Other tenants keep their own sequence.
        assert_eq!(km.current_version("other").await.unwrap(), 1);

        let last = store.last("acme").await.unwrap().unwrap();
        assert_eq!(last.event_type, AuditEventType::KeyRotated);
        assert_eq!(last.metadata["key_version"], "2");
    }

    #[tokio::test]
    async fn retire_evicts_but_rederives() {
        let (_, chain) = audit();
        let km = test_manager(chain);
        let ctx = Context::new("acme");
        let v1 = bytes(km.key("acme", 1).await);
        km.rotate(&ctx).await.unwrap();
        km.rotate(&ctx).await.unwrap();

        let retired = km.retire(1, &ctx).await.unwrap();
        assert_eq!(retired, vec![1, 2]);
        assert_eq!(km.live_versions("acme").await.unwrap(), vec![3]);

        // Cache-clear policy: the master key can regenerate it.
        assert_eq!(bytes(km.key("acme", 1).await), v1);
        assert_eq!(km.live_versions("acme").await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn retire_never_evicts_active() {
        let (_, chain) = audit();
        let km = test_manager(chain);
        let retired = km.retire(0, &Context::new("acme")).await.unwrap();
        assert!(retired.is_empty());
        assert_eq!(km.live_versions("acme").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn destroyed_versions_are_never_rederived() {
        let (_, chain) = audit();
        let km = test_manager(chain);
        let ctx = Context::new("acme");
        km.rotate(&ctx).await.unwrap();

        let destroyed = km.destroy_versions(&[1, 1, 9], &ctx).await.unwrap();
        assert_eq!(destroyed, vec![1]);
        assert!(km.is_destroyed("acme", 1).await.unwrap());
        assert!(matches!(km.key("acme", 1).await, Err(VaultError::KeyUnavailable(_))));
        assert_eq!(km.current_version("acme").await.unwrap(), 2);
        assert!(km.destroy_versions(&[1], &ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn destroying_a_version_leaves_other_tenants_alone() {
        let (_, chain) = audit();
        let km = test_manager(chain);
        let other_v1 = bytes(km.key("other", 1).await);

        km.destroy_versions(&[1], &Context::new("acme")).await.unwrap();
        assert!(km.is_destroyed("acme", 1).await.unwrap());
        assert!(!km.is_destroyed("other", 1).await.unwrap());
        assert_eq!(bytes(km.key("other", 1).await), other_v1);
        assert_eq!(km.current_version("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn destroying_active_version_rotates() {
        let (store, chain) = audit();
        let km = test_manager(chain);
        km.destroy_versions(&[1], &Context::new("acme")).await.unwrap();
        assert_eq!(km.current_version("acme").await.unwrap(), 2);
        assert!(km.current_key("acme").await.is_ok());

        let events = store.range("acme", 0, None).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![AuditEventType::KeyVersionsDestroyed, AuditEventType::KeyRotated]
        );
    }

    #[tokio::test]
    async fn destroyed_versions_survive_a_restart() {
        let (_, chain) = audit();
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let first = test_manager_on(records.clone(), chain.clone());
        let ctx = Context::new("acme");
        first.rotate(&ctx).await.unwrap();
        first.destroy_versions(&[1], &ctx).await.unwrap();

        let restarted = test_manager_on(records, chain);
        assert!(restarted.is_destroyed("acme", 1).await.unwrap());
        assert!(matches!(restarted.key("acme", 1).await, Err(VaultError::KeyUnavailable(_))));
        assert_eq!(restarted.current_version("acme").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn active_version_survives_a_restart() {
        let (_, chain) = audit();
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let first = test_manager_on(records.clone(), chain.clone());
        let ctx = Context::new("acme");
        first.rotate(&ctx).await.unwrap();
        first.rotate(&ctx).await.unwrap();
        let v3 = bytes(first.key("acme", 3).await);

        let restarted = test_manager_on(records.clone(), chain.clone());
        assert_eq!(restarted.current_version("acme").await.unwrap(), 3);
        assert_eq!(bytes(restarted.key("acme", 3).await), v3);
        assert_eq!(restarted.tenants().await.unwrap(), vec!["acme"]);
        assert_eq!(restarted.loaded_tenants(), 1);

        // A destroyed active version is skipped, not resurrected.
        restarted.destroy_versions(&[3], &ctx).await.unwrap();
        let again = test_manager_on(records, chain);
        assert_eq!(again.current_version("acme").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn configured_initial_version_is_a_floor() {
        let (_, chain) = audit();
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let first = test_manager_on(records.clone(), chain.clone());
        let v1 = bytes(first.key("acme", 1).await);

        let raised =
            KeyManager::new(TEST_SECRET, "install-test", fast_params(), 3, records, chain).unwrap();
        assert_eq!(raised.initial_version(), 3);
        assert_eq!(raised.current_version("acme").await.unwrap(), 3);
        assert_eq!(bytes(raised.key("acme", 1).await), v1);
    }

    #[tokio::test]
    async fn purpose_keys_are_domain_separated() {
        let (_, chain) = audit();
        let km = test_manager(chain);
        assert_ne!(
            km.purpose_key("search").as_bytes(),
            km.purpose_key("certificates").as_bytes()
        );
        assert_ne!(km.purpose_key("search").as_bytes(), &bytes(km.key("acme", 1).await));
    }
}
