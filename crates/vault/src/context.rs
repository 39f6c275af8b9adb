//! Per-operation caller context.

use uuid::Uuid;

/// Tenant that owns install-wide operations such as key rotation.
pub const SYSTEM_TENANT: &str = "_system";

/// Who an operation runs for and how to correlate its audit events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub tenant_id: String,
    pub correlation_id: Uuid,
}

impl Context {
    /// Context with a fresh correlation id.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self::with_correlation(tenant_id, Uuid::new_v4())
    }

    pub fn with_correlation(tenant_id: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            correlation_id,
        }
    }

    /// Context for install-wide operations, audited under [`SYSTEM_TENANT`].
    pub fn system(correlation_id: Uuid) -> Self {
        Self::with_correlation(SYSTEM_TENANT, correlation_id)
    }
}
