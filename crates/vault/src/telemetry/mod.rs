//! Structured logging and optional OpenTelemetry span export.
//!
//! # Telemetry invariants
//!
//! - **No PII or key material** in any span attribute or log field. Events
//!   carry tenant ids, subject ids, field types, key versions and counts only.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   overrides it when set.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
