//! Axum HTTP(S) server, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Bind the listener, with TLS (rustls) when a certificate is configured,
//!   and drain on shutdown.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod tls;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use state::AppState;

/// Serve the API until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the TLS material cannot be loaded or the port cannot
/// be bound.
pub async fn run(cfg: &Config, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let router = router::build(state);
    let addr: SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    match (&cfg.tls_cert_path, &cfg.tls_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = tokio::fs::read(cert_path)
                .await
                .with_context(|| format!("failed to read TLS certificate {cert_path}"))?;
            let key_pem = tokio::fs::read(key_path)
                .await
                .with_context(|| format!("failed to read TLS private key {key_path}"))?;
            let tls_config = tls::build_server_config(&cert_pem, &key_pem)?;
            info!(addr = %addr, tls = true, "listening");
            tls::serve(listener, router, tls_config, shutdown).await
        }
        _ => {
            info!(addr = %addr, tls = false, "listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("HTTP server failed")
        }
    }
}
