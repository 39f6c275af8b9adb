//! Common error types shared across crates.

use thiserror::Error;

/// Top-level error type surfaced by every vault operation.
///
/// Variants map to HTTP status codes returned to callers:
/// - caller errors ([`VaultError::EmptyPlaintext`], [`VaultError::EmptyOrInvalidSearchInput`],
///   [`VaultError::InvalidRequest`]) → 400
/// - [`VaultError::NotFound`] → 404
/// - [`VaultError::DecryptionFailed`] → 422
/// - [`VaultError::KeyUnavailable`] → 410
/// - [`VaultError::ChainIntegrityViolation`], [`VaultError::DeletionVerificationFailed`] → 409
/// - [`VaultError::Store`] → 503
/// - [`VaultError::Config`], [`VaultError::Internal`] → 500
#[derive(Debug, Error)]
pub enum VaultError {
    /// The caller asked to encrypt an empty or whitespace-only value.
    #[error("plaintext must not be empty")]
    EmptyPlaintext,

    /// Authentication-tag mismatch or a malformed record. Never partial.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The key version (or subject key) needed for this record is gone.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// A search value was empty or could not be normalised for its field type.
    #[error("empty or invalid search input: {0}")]
    EmptyOrInvalidSearchInput(String),

    /// A request was well-formed JSON but not acceptable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The addressed stored field does not exist or holds no value.
    #[error("not found: {0}")]
    NotFound(String),

    /// Audit chain verification found corrupt events or broken links.
    #[error(
        "audit chain integrity violation for tenant {tenant}: \
         {corrupt} corrupt event(s), {broken} broken link(s)"
    )]
    ChainIntegrityViolation {
        tenant: String,
        corrupt: usize,
        broken: usize,
    },

    /// Post-deletion sampling found residual recoverable data.
    #[error(
        "deletion verification failed: \
         {residual} of {sampled} sampled target(s) still hold data"
    )]
    DeletionVerificationFailed { sampled: usize, residual: usize },

    /// The external record or audit store failed. Propagated, never retried.
    #[error("store error: {0}")]
    Store(String),

    /// The engine was constructed with invalid settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            VaultError::EmptyPlaintext
            | VaultError::EmptyOrInvalidSearchInput(_)
            | VaultError::InvalidRequest(_) => 400,
            VaultError::NotFound(_) => 404,
            VaultError::DecryptionFailed => 422,
            VaultError::KeyUnavailable(_) => 410,
            VaultError::ChainIntegrityViolation { .. }
            | VaultError::DeletionVerificationFailed { .. } => 409,
            VaultError::Store(_) => 503,
            VaultError::Config(_) | VaultError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::EmptyPlaintext => "empty_plaintext",
            VaultError::DecryptionFailed => "decryption_failed",
            VaultError::KeyUnavailable(_) => "key_unavailable",
            VaultError::EmptyOrInvalidSearchInput(_) => "invalid_search_input",
            VaultError::InvalidRequest(_) => "invalid_request",
            VaultError::NotFound(_) => "not_found",
            VaultError::ChainIntegrityViolation { .. } => "chain_integrity_violation",
            VaultError::DeletionVerificationFailed { .. } => "deletion_verification_failed",
            VaultError::Store(_) => "store_unavailable",
            VaultError::Config(_) => "configuration_error",
            VaultError::Internal(_) => "internal_error",
        }
    }

    /// Whether this failure must be recorded as a security incident.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed
                | VaultError::KeyUnavailable(_)
                | VaultError::ChainIntegrityViolation { .. }
        )
    }
}
