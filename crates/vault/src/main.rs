//! `pii-vault` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Derive the master key and build the [`Vault`].
//! 4. Spawn background tasks: cache purge, key rotation.
//! 5. Build the Axum router and serve until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vault::server::{self, state::AppState};
use vault::{cache, service, telemetry, Config, Vault};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        tls = cfg.tls_enabled(),
        "pii-vault starting"
    );

    // -----------------------------------------------------------------------
    // 3. Vault
    // -----------------------------------------------------------------------
    // Argon2id can take seconds; run it on the blocking pool.
    let vault = {
        let cfg = cfg.clone();
        tokio::task::spawn_blocking(move || Vault::from_config(&cfg))
            .await
            .context("vault initialisation task failed")??
    };
    let vault = Arc::new(vault);

    // -----------------------------------------------------------------------
    // 4. Background tasks
    // -----------------------------------------------------------------------
    let _cache_purge = cache::purge_task(
        vault.cache().clone(),
        Duration::from_secs(cfg.cache_purge_interval_secs),
    );
    let _key_rotation = cfg
        .key_rotation_interval_secs
        .map(|secs| service::rotation_task(vault.clone(), Duration::from_secs(secs)));

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let state = AppState::new(vault, shutdown.clone());
    server::run(&cfg, state, shutdown).await?;

    info!("pii-vault stopped");
    telemetry::shutdown_telemetry();
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    token.cancel();
}
