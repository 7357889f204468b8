//! tandemd: chat and file relay daemon.

use anyhow::{Context, Result};

use tandem_core::config::TandemConfig;
use tandem_services::{Relay, RelaySettings};

mod listener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TandemConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = TandemConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TandemConfig::default()
    });

    // Optional port argument overrides everything else.
    if let Some(arg) = std::env::args().nth(1) {
        config.network.port = arg
            .parse()
            .with_context(|| format!("invalid port {arg:?}"))?;
    }

    let settings = RelaySettings::from_config(&config);
    tracing::info!(
        bind = %config.network.bind_addr,
        port = config.network.port,
        profile = ?settings.profile,
        stamp_file_sender = settings.stamp_file_sender,
        announce_departures = settings.announce_departures,
        "tandemd starting"
    );

    let tcp = listener::bind(&config.network.bind_addr, config.network.port)
        .context("failed to acquire listening socket")?;

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

    // ── Serve ────────────────────────────────────────────────────────────────

    let relay = Relay::new(settings);
    relay.run(tcp, shutdown_tx.subscribe()).await?;

    tracing::info!("shutting down");
    Ok(())
}
