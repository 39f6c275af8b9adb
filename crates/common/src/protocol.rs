//! Request and response types exchanged over the HTTP API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certificate::{DeletionCertificate, DeletionMethod};
use crate::record::{EncryptedFieldRecord, FieldType, ProtectedField};

// ---------------------------------------------------------------------------
// Field endpoints
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/fields/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub tenant_id: String,
    pub subject_id: String,
    /// Column name under which the record store keeps the field.
    pub field_name: String,
    pub field_type: FieldType,
    pub value: String,
}

/// Response body for `POST /v1/fields/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub field: ProtectedField,
}

/// Request body for `POST /v1/fields/decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub tenant_id: String,
    pub subject_id: String,
    pub record: EncryptedFieldRecord,
}

/// Request body for `POST /v1/fields/reveal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRequest {
    pub tenant_id: String,
    pub subject_id: String,
    pub field_name: String,
}

/// Request body for `POST /v1/names/encrypt`.
///
/// Stores `first_name` and `last_name` columns plus an order-independent
/// full-name hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectNameRequest {
    pub tenant_id: String,
    pub subject_id: String,
    pub first_name: String,
    pub last_name: String,
}

/// Response body for `POST /v1/names/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectNameResponse {
    pub first_name: ProtectedField,
    pub last_name: ProtectedField,
    pub full_name_hash: String,
}

/// Response body for both decrypt and reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub value: String,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Whether a query field must match exactly or by token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Partial,
}

/// How the criteria of one query combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
    /// A subject must satisfy every field, word and name given.
    #[default]
    All,
    /// One satisfied criterion is enough.
    Any,
}

/// One field of a search query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryField {
    pub field_type: FieldType,
    pub value: String,
    #[serde(default)]
    pub mode: MatchMode,
}

/// A full-name lookup; the two parts may be given in either order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameQuery {
    pub first: String,
    pub last: String,
}

/// Request body for `POST /v1/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub fields: Vec<QueryField>,
    #[serde(default)]
    pub full_name: Option<NameQuery>,
    #[serde(default)]
    pub combine: Combine,
}

/// Response body for `POST /v1/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matching subjects, sorted.
    pub subject_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/keys/rotate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateRequest {
    pub tenant_id: String,
}

/// Response body for `POST /v1/keys/rotate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateResponse {
    pub version: u32,
}

/// Request body for `POST /v1/keys/retire`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetireRequest {
    pub tenant_id: String,
    /// Versions to keep cached; the configured retention when absent.
    #[serde(default)]
    pub keep_latest: Option<u32>,
}

/// Response body for `POST /v1/keys/retire`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetireResponse {
    pub retired: Vec<u32>,
    pub current_version: u32,
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

/// Which key material a crypto-shred destroys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShredScope {
    /// Destroy the per-subject key. Other subjects are unaffected.
    #[default]
    Subject,
    /// Destroy every key version the targets' fields reference.
    KeyVersions,
}

/// Request body for `POST /v1/deletions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequestBody {
    pub tenant_id: String,
    /// Upstream request id; generated when absent.
    #[serde(default)]
    pub request_id: Option<Uuid>,
    pub subject_ids: Vec<String>,
    pub method: DeletionMethod,
    #[serde(default)]
    pub scope: ShredScope,
}

/// Response body for `POST /v1/deletions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResponse {
    pub certificate: DeletionCertificate,
    pub sampled: usize,
    pub residual: usize,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// A link whose `previous_hash` does not match its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub sequence: u64,
    pub expected_previous_hash: String,
    pub found_previous_hash: String,
}

/// Response body for `GET /v1/audit/{tenant}/verify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub tenant_id: String,
    pub verified: bool,
    pub events_checked: usize,
    /// Sequences whose stored hash does not match their content.
    pub corrupt_events: Vec<u64>,
    pub broken_links: Vec<BrokenLink>,
    /// Sequences whose signature failed to verify.
    pub invalid_signatures: Vec<u64>,
    /// Sequences carrying a signature that could not be checked (no secret configured).
    pub unchecked_signatures: Vec<u64>,
}

/// Query string of `GET /v1/audit/{tenant}/verify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyChainQuery {
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub to: Option<u64>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Response body for `POST /v1/cache/clear`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub cleared: usize,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"decryption_failed"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Tenants whose key versions are loaded.
    pub key_tenants: usize,
    /// Decrypted values currently cached.
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_mode_defaults_to_exact() {
        let q: QueryField =
            serde_json::from_value(json!({"field_type": "first_name", "value": "Jane"})).unwrap();
        assert_eq!(q.mode, MatchMode::Exact);
    }

    #[test]
    fn search_request_accepts_name_only() {
        let req: SearchRequest = serde_json::from_value(json!({
            "tenant_id": "acme",
            "full_name": {"first": "Doe", "last": "Jane"}
        }))
        .unwrap();
        assert!(req.fields.is_empty());
        assert_eq!(req.full_name.unwrap().first, "Doe");
        assert_eq!(req.combine, Combine::All);
    }

    #[test]
    fn search_combine_is_snake_case() {
        let req: SearchRequest = serde_json::from_value(json!({
            "tenant_id": "acme",
            "fields": [{"field_type": "email", "value": "a@b.co"}],
            "combine": "any"
        }))
        .unwrap();
        assert_eq!(req.combine, Combine::Any);
    }

    #[test]
    fn deletion_request_defaults() {
        let body: DeletionRequestBody = serde_json::from_value(json!({
            "tenant_id": "acme",
            "subject_ids": ["c-1"],
            "method": "crypto_shred"
        }))
        .unwrap();
        assert!(body.request_id.is_none());
        assert_eq!(body.scope, ShredScope::Subject);
    }

    #[test]
    fn error_response_new() {
        let e = ErrorResponse::new("decryption_failed", "decryption failed");
        assert_eq!(e.code, "decryption_failed");
        assert!(e.message.contains("failed"));
    }
}
