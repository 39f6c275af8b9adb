//! [`AuditStore`]: append-only persistence for audit chains.

use std::collections::HashMap;

use async_trait::async_trait;
use common::audit::AuditEvent;
use parking_lot::RwLock;

use crate::store::StoreError;

/// Append-only event storage, one ordered chain per tenant.
///
/// There is deliberately no update or delete operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist `event` at the end of its tenant's chain.
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError>;

    /// The most recent event for `tenant_id`, if any.
    async fn last(&self, tenant_id: &str) -> Result<Option<AuditEvent>, StoreError>;

    /// Events with `from <= sequence <= to` (or to the end when `to` is `None`),
    /// in sequence order.
    async fn range(
        &self,
        tenant_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<AuditEvent>, StoreError>;
}

/// In-process [`AuditStore`].
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    chains: RwLock<HashMap<String, Vec<AuditEvent>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for `tenant_id`.
    pub fn len(&self, tenant_id: &str) -> usize {
        self.chains.read().get(tenant_id).map_or(0, Vec::len)
    }

    /// Rewrite a stored row in place, bypassing the chain.
    ///
    /// Models an attacker with direct write access to the audit table; used by
    /// tamper-detection tests. Returns `false` if the row does not exist.
    pub fn rewrite_row(
        &self,
        tenant_id: &str,
        sequence: u64,
        rewrite: impl FnOnce(&mut AuditEvent),
    ) -> bool {
        let mut chains = self.chains.write();
        let Some(event) = chains
            .get_mut(tenant_id)
            .and_then(|chain| chain.iter_mut().find(|e| e.sequence == sequence))
        else {
            return false;
        };
        rewrite(event);
        true
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        let mut chains = self.chains.write();
        let chain = chains.entry(event.tenant_id.clone()).or_default();
        let expected = chain.len() as u64;
        if event.sequence != expected {
            return Err(StoreError::Conflict(format!(
                "audit sequence {} does not follow {} stored event(s)",
                event.sequence, expected
            )));
        }
        chain.push(event);
        Ok(())
    }

    async fn last(&self, tenant_id: &str) -> Result<Option<AuditEvent>, StoreError> {
        Ok(self
            .chains
            .read()
            .get(tenant_id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn range(
        &self,
        tenant_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let chains = self.chains.read();
        let Some(chain) = chains.get(tenant_id) else {
            return Ok(Vec::new());
        };
        Ok(chain
            .iter()
            .filter(|e| e.sequence >= from && to.map_or(true, |to| e.sequence <= to))
            .cloned()
            .collect())
    }
}
