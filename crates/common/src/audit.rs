//! Compliance audit event shapes.
//!
//! An [`AuditEvent`] is one link in a tenant's hash chain. Hash computation
//! and verification live in the vault crate; this module only fixes the
//! persisted shape.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `previous_hash` of the first event in every tenant chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Security-relevant operations recorded in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    FieldEncrypted,
    FieldDecrypted,
    DecryptionFailed,
    KeyRotated,
    KeysRetired,
    KeyAccessDenied,
    KeyVersionsDestroyed,
    SubjectKeyDestroyed,
    SubjectShredded,
    SecureOverwrite,
    DeletionVerified,
    DeletionCertificateIssued,
    SearchPerformed,
    CacheCleared,
    ChainVerified,
    ChainIntegrityViolation,
}

impl AuditEventType {
    /// Severity assigned when the caller does not override it.
    pub fn default_severity(&self) -> Severity {
        match self {
            AuditEventType::FieldEncrypted
            | AuditEventType::FieldDecrypted
            | AuditEventType::SearchPerformed
            | AuditEventType::ChainVerified => Severity::Low,
            AuditEventType::KeyRotated
            | AuditEventType::KeysRetired
            | AuditEventType::CacheCleared
            | AuditEventType::DeletionVerified
            | AuditEventType::DeletionCertificateIssued => Severity::Medium,
            AuditEventType::DecryptionFailed
            | AuditEventType::KeyAccessDenied
            | AuditEventType::KeyVersionsDestroyed
            | AuditEventType::SubjectKeyDestroyed
            | AuditEventType::SubjectShredded
            | AuditEventType::SecureOverwrite => Severity::High,
            AuditEventType::ChainIntegrityViolation => Severity::Critical,
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Matches the serde representation.
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Optional HMAC over the event hash.
///
/// Two explicit variants so an unsigned chain can never be mistaken for a
/// signed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Signature {
    Unsigned,
    Signed(String),
}

impl Signature {
    pub fn is_signed(&self) -> bool {
        matches!(self, Signature::Signed(_))
    }
}

/// One entry in a tenant's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Position in the tenant chain, starting at 0.
    pub sequence: u64,
    pub tenant_id: String,
    pub event_type: AuditEventType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub description: String,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// `hash` of the preceding event, or [`GENESIS_HASH`].
    pub previous_hash: String,
    /// SHA-256 (hex) over the canonical content, including `previous_hash`.
    pub hash: String,
    pub signature: Signature,
}
