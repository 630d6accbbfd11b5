//! Registry daemon entry point.

use anyhow::{Context, Result};

use swarmdir_core::config::SwarmdirConfig;
use swarmdird::{RegistryServer, RegistryState, TransferSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SwarmdirConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = SwarmdirConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SwarmdirConfig::default()
    });

    if let Some(arg) = std::env::args().nth(1) {
        config.network.port = arg
            .parse()
            .with_context(|| format!("invalid port argument {arg:?}"))?;
    }
    tracing::info!(
        port = config.network.port,
        chunk_size = config.transfer.chunk_size,
        send_turn_timeout_secs = config.transfer.send_turn_timeout_secs,
        "swarmdird starting"
    );

    let state = RegistryState::new(TransferSettings::from(&config.transfer));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let server = RegistryServer::bind(
        (config.network.listen_addr.as_str(), config.network.port),
        state.clone(),
        shutdown_tx.subscribe(),
    )
    .await?;
    let server_task = tokio::spawn(server.run());

    let api_port = config.network.api_port;
    if api_port != 0 {
        let api_state = swarmdir_api::ApiState::new(state.registry.clone(), state.file_sizes.clone());
        tokio::spawn(async move {
            if let Err(e) = swarmdir_api::serve(api_state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = server_task        => tracing::error!("registry listener exited: {:?}", r),
    }

    Ok(())
}
