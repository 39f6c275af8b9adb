//! Common types, protocol definitions, and errors shared across `pii-vault` crates.

pub mod audit;
pub mod certificate;
pub mod error;
pub mod protocol;
pub mod record;

pub use error::VaultError;
