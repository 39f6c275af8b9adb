//! [`MemoryRecordStore`]: in-process [`RecordStore`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use common::certificate::DeletionCertificate;
use parking_lot::RwLock;

use super::{
    FieldSlot, KeyVersionState, RecordStore, StoreError, StoredField, WrappedSubjectKey,
};
use crate::search::CandidateSet;

#[derive(Debug, Default)]
struct SubjectRow {
    fields: BTreeMap<String, StoredField>,
    name_hash: Option<String>,
    wrapped_key: Option<WrappedSubjectKey>,
}

/// Thread-safe in-memory record store.
///
/// Reads take a shared lock; writes take the exclusive lock briefly.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: RwLock<HashMap<(String, String), SubjectRow>>,
    certificates: RwLock<Vec<DeletionCertificate>>,
    key_states: RwLock<BTreeMap<String, KeyVersionState>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Certificates saved so far, oldest first.
    pub fn certificates(&self) -> Vec<DeletionCertificate> {
        self.certificates.read().clone()
    }
}

fn key(tenant_id: &str, subject_id: &str) -> (String, String) {
    (tenant_id.to_owned(), subject_id.to_owned())
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put_field(
        &self,
        tenant_id: &str,
        subject_id: &str,
        field: StoredField,
    ) -> Result<(), StoreError> {
        self.rows
            .write()
            .entry(key(tenant_id, subject_id))
            .or_default()
            .fields
            .insert(field.field_name.clone(), field);
        Ok(())
    }

    async fn field(
        &self,
        tenant_id: &str,
        subject_id: &str,
        field_name: &str,
    ) -> Result<Option<StoredField>, StoreError> {
        Ok(self
            .rows
            .read()
            .get(&key(tenant_id, subject_id))
            .and_then(|row| row.fields.get(field_name).cloned()))
    }

    async fn fields(
        &self,
        tenant_id: &str,
        subject_id: &str,
    ) -> Result<Vec<StoredField>, StoreError> {
        Ok(self
            .rows
            .read()
            .get(&key(tenant_id, subject_id))
            .map(|row| row.fields.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_name_hash(
        &self,
        tenant_id: &str,
        subject_id: &str,
        hash: Option<String>,
    ) -> Result<(), StoreError> {
        self.rows
            .write()
            .entry(key(tenant_id, subject_id))
            .or_default()
            .name_hash = hash;
        Ok(())
    }

    async fn find_subjects(
        &self,
        tenant_id: &str,
        candidates: &CandidateSet,
    ) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.read();
        let subjects: BTreeSet<String> = rows
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .filter(|(_, row)| {
                let protected = row.fields.values().filter_map(|f| match &f.slot {
                    FieldSlot::Protected(p) => Some((
                        p.search.exact.as_str(),
                        p.search.tokens.iter().map(String::as_str),
                    )),
                    _ => None,
                });
                candidates.matches(row.name_hash.as_deref(), protected)
            })
            .map(|((_, subject), _)| subject.clone())
            .collect();
        Ok(subjects.into_iter().collect())
    }

    async fn wrapped_key(
        &self,
        tenant_id: &str,
        subject_id: &str,
    ) -> Result<Option<WrappedSubjectKey>, StoreError> {
        Ok(self
            .rows
            .read()
            .get(&key(tenant_id, subject_id))
            .and_then(|row| row.wrapped_key.clone()))
    }

    async fn put_wrapped_key(
        &self,
        tenant_id: &str,
        subject_id: &str,
        wrapped: WrappedSubjectKey,
    ) -> Result<(), StoreError> {
        self.rows
            .write()
            .entry(key(tenant_id, subject_id))
            .or_default()
            .wrapped_key = Some(wrapped);
        Ok(())
    }

    async fn delete_wrapped_key(
        &self,
        tenant_id: &str,
        subject_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .write()
            .get_mut(&key(tenant_id, subject_id))
            .and_then(|row| row.wrapped_key.take())
            .is_some())
    }

    async fn save_certificate(&self, certificate: DeletionCertificate) -> Result<(), StoreError> {
        self.certificates.write().push(certificate);
        Ok(())
    }

    async fn key_state(&self, tenant_id: &str) -> Result<Option<KeyVersionState>, StoreError> {
        Ok(self.key_states.read().get(tenant_id).cloned())
    }

    async fn put_key_state(
        &self,
        tenant_id: &str,
        state: KeyVersionState,
    ) -> Result<(), StoreError> {
        self.key_states.write().insert(tenant_id.to_owned(), state);
        Ok(())
    }

    async fn key_state_tenants(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.key_states.read().keys().cloned().collect())
    }
}
