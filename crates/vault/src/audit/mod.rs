//! Tamper-evident, per-tenant audit chain.
//!
//! Every cipher, key and deletion operation appends an event here. Each event
//! commits to its predecessor through `previous_hash`, so editing, removing or
//! reordering stored rows is detected by [`AuditChain::verify_chain`].
//!
//! # Module invariants
//!
//! - [`AuditChain::append`] is the only way into a chain; appends for one
//!   tenant are serialised.
//! - Event descriptions and metadata never carry plaintext or key material.

pub mod chain;
pub mod store;

pub use chain::{compute_hash, ensure_intact, verify_events, AuditChain, AuditSigner};
pub use store::{AuditStore, MemoryAuditStore};

use std::collections::BTreeMap;

use common::audit::{AuditEventType, Severity};

/// Content of an event before it is sequenced, hashed and signed.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub subject_id: Option<String>,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl AuditDraft {
    pub fn new(event_type: AuditEventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            subject_id: None,
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}
