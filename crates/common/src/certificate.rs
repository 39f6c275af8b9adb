//! Deletion certificate shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the target data was erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionMethod {
    CryptoShred,
    SecureOverwrite,
    Hybrid,
}

/// Outcome of post-deletion sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// No sampled target held residual data.
    Verified,
    /// At least one sampled target still held data.
    Partial,
}

/// Per-request deletion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCounts {
    pub processed: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Signed, immutable proof that a deletion request was carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCertificate {
    pub certificate_id: Uuid,
    pub tenant_id: String,
    pub deletion_request_id: Uuid,
    pub subject_ids: Vec<String>,
    pub method: DeletionMethod,
    pub counts: DeletionCounts,
    pub verification: VerificationStatus,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// HMAC-SHA256 (hex) over every other field.
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serde_names() {
        assert_eq!(
            serde_json::to_value(DeletionMethod::CryptoShred).unwrap(),
            "crypto_shred"
        );
        assert_eq!(
            serde_json::from_value::<DeletionMethod>("hybrid".into()).unwrap(),
            DeletionMethod::Hybrid
        );
    }

    #[test]
    fn counts_default_to_zero() {
        let c = DeletionCounts::default();
        assert_eq!(c.processed + c.deleted + c.failed, 0);
    }
}
