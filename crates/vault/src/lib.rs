//! `pii-vault`: field-level encryption, blind search, crypto-shredding and a
//! tamper-evident audit trail for customer contact data.
//!
//! [`Vault`] is the entry point; the `pii-vault` binary wraps it in an HTTP
//! API (see [`server`]).

pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod crypto;
pub mod keys;
pub mod search;
pub mod server;
pub mod service;
pub mod shred;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use context::Context;
pub use service::Vault;
