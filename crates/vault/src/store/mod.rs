//! Record store interface.
//!
//! The relational store that persists encrypted blobs and hash columns is an
//! external collaborator. This module fixes the contract the engine needs from
//! it and ships [`MemoryRecordStore`] for single-process deployments and tests.
//!
//! Store errors are propagated to the caller unchanged; retry policy belongs
//! to whoever drives the vault.

pub mod memory;

pub use memory::MemoryRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::certificate::DeletionCertificate;
use common::record::{FieldType, ProtectedField};
use common::VaultError;
use thiserror::Error;

use crate::search::CandidateSet;

/// Errors reported by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or failed the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The write conflicts with what is already stored.
    #[error("store conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        VaultError::Store(e.to_string())
    }
}

/// Contents of one stored PII column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSlot {
    /// Encrypted value and its lookup hashes.
    Protected(ProtectedField),
    /// Random bytes written by an unfinished overwrite pass.
    Scrambled(Vec<u8>),
    /// The field existed and was erased.
    Tombstone,
    /// No value.
    Empty,
}

/// A named PII column of one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredField {
    pub field_name: String,
    pub field_type: FieldType,
    pub slot: FieldSlot,
}

/// A subject key sealed under a key version.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedSubjectKey {
    pub key_version: u32,
    pub nonce: Vec<u8>,
    /// Ciphertext with the tag appended.
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for WrappedSubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedSubjectKey")
            .field("key_version", &self.key_version)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Key-version state of one tenant. Holds no key material; the keys
/// themselves are re-derived from the master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersionState {
    pub active: u32,
    pub activated_at: DateTime<Utc>,
    /// Versions that must never be derived again, ascending.
    pub destroyed: Vec<u32>,
}

/// Persistence the vault relies on, keyed by `(tenant, subject)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the column `field.field_name` of a subject.
    async fn put_field(
        &self,
        tenant_id: &str,
        subject_id: &str,
        field: StoredField,
    ) -> Result<(), StoreError>;

    async fn field(
        &self,
        tenant_id: &str,
        subject_id: &str,
        field_name: &str,
    ) -> Result<Option<StoredField>, StoreError>;

    /// All columns of a subject, ordered by name.
    async fn fields(&self, tenant_id: &str, subject_id: &str)
        -> Result<Vec<StoredField>, StoreError>;

    /// Set or clear the subject's full-name lookup hash.
    async fn put_name_hash(
        &self,
        tenant_id: &str,
        subject_id: &str,
        hash: Option<String>,
    ) -> Result<(), StoreError>;

    /// Subjects with at least one protected column matching `candidates`
    /// (exact hash or any token) or a matching full-name hash, sorted.
    async fn find_subjects(
        &self,
        tenant_id: &str,
        candidates: &CandidateSet,
    ) -> Result<Vec<String>, StoreError>;

    async fn wrapped_key(
        &self,
        tenant_id: &str,
        subject_id: &str,
    ) -> Result<Option<WrappedSubjectKey>, StoreError>;

    async fn put_wrapped_key(
        &self,
        tenant_id: &str,
        subject_id: &str,
        key: WrappedSubjectKey,
    ) -> Result<(), StoreError>;

    /// Remove a wrapped key. Returns whether one existed.
    async fn delete_wrapped_key(&self, tenant_id: &str, subject_id: &str)
        -> Result<bool, StoreError>;

    async fn save_certificate(&self, certificate: DeletionCertificate) -> Result<(), StoreError>;

    async fn key_state(&self, tenant_id: &str) -> Result<Option<KeyVersionState>, StoreError>;

    /// Replace the tenant's key-version state. Must be durable before it
    /// returns: destroyed versions stay destroyed across restarts.
    async fn put_key_state(
        &self,
        tenant_id: &str,
        state: KeyVersionState,
    ) -> Result<(), StoreError>;

    /// Tenants with persisted key-version state, sorted.
    async fn key_state_tenants(&self) -> Result<Vec<String>, StoreError>;
}
