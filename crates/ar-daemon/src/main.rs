//! armada daemon — control-plane RPC surface plus the background machines.

use anyhow::{Context, Result};
use ar_core::config::Config;
use ar_daemon::Daemon;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is a development convenience; absence is fine.
    let _ = dotenv::dotenv();

    ar_daemon::logging::init_logging("info");

    let config = Config::load().context("failed to load configuration")?;
    info!(
        environment = %config.environment,
        store_path = %config.store.path,
        "armada daemon starting"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    let daemon = Daemon::new(config).await?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        shutdown.trigger();
    });

    daemon.run_with_listener(listener).await
}
