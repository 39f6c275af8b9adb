//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::service::Vault;

/// Application state shared across all request handlers.
///
/// Cheap to clone: the vault is behind an `Arc` and tokens share their state.
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
    /// Fires on process shutdown; long-running deletions observe a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(vault: Arc<Vault>, shutdown: CancellationToken) -> Self {
        Self { vault, shutdown }
    }
}

#[cfg(test)]
impl AppState {
    /// State over in-memory stores with fast KDF settings.
    pub(crate) fn for_tests() -> Self {
        let cfg = crate::config::tests::valid_config();
        let vault = Vault::from_config(&cfg).expect("test vault");
        Self::new(Arc::new(vault), CancellationToken::new())
    }
}
