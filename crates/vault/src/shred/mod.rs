//! Crypto-shredding deletion engine.
//!
//! # Methods
//!
//! - **Crypto-shred**: destroy the key material protecting a subject's fields,
//!   then null the stored ciphertext. Ciphertext copies kept anywhere else
//!   (backups, replicas, exports) become unreadable because the key is gone.
//! - **Secure overwrite**: several passes of random bytes over each stored
//!   field, then a tombstone or an empty value. Cancellable between passes.
//! - **Hybrid**: both; a target only counts as deleted when both succeed.
//!
//! Every completed request is sampled for residual data and issues a signed
//! [`DeletionCertificate`](common::certificate::DeletionCertificate).

pub mod certificate;
pub mod engine;

pub use certificate::CertificateSigner;
pub use engine::{
    DeletionOutcome, DeletionRequest, DeletionResult, ShredSettings, ShreddingEngine,
    TargetReport, VerificationResult,
};
