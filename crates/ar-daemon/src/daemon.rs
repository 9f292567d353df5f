//! The long-running process: scheduled-task dispatcher, hourly retention
//! cron, and the axum server, all stopping together on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ar_bridge::{build_router, ApiState};
use ar_core::config::Config;
use ar_engine::Engine;
use ar_store::StoreDb;
use tokio::sync::watch;
use tracing::{info, warn};

/// How often the dispatcher polls for due scheduled tasks.
pub const DISPATCH_POLL_MS: u64 = 250;

/// Retention cron period.
pub const SWEEP_PERIOD_SECS: u64 = 3600;

/// Triggers a coordinated stop of every daemon loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Daemon {
    engine: Engine,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
}

impl Daemon {
    /// Open the store and assemble the engine. Refuses to start when the
    /// config would bypass auth outside development.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let store = if config.store.path == ":memory:" {
            StoreDb::open_in_memory().await
        } else {
            StoreDb::open(&config.store.path).await
        }
        .context("failed to open store")?;

        let engine = Engine::new(store, config.auth.disabled);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self { engine, config, shutdown_tx })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown_tx.clone() }
    }

    /// Run until shutdown: serve the RPC surface and keep the background
    /// machines fed.
    pub async fn run_with_listener(self, listener: tokio::net::TcpListener) -> Result<()> {
        if self.config.auth.disabled {
            warn!("authentication is DISABLED (development bypass)");
        }

        spawn_dispatcher(self.engine.clone(), self.shutdown_tx.subscribe());
        spawn_retention_cron(self.engine.clone(), self.shutdown_tx.subscribe());

        let state = Arc::new(ApiState::new(self.engine.clone()));
        let app = build_router(state);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(addr = %listener.local_addr()?, "API server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
                info!("shutdown signal received");
            })
            .await
            .context("server error")?;
        Ok(())
    }
}

/// Poll the durable task queue and route due callbacks into the engine.
fn spawn_dispatcher(engine: Engine, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(DISPATCH_POLL_MS));
        info!(poll_ms = DISPATCH_POLL_MS, "scheduled-task dispatcher started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match engine.dispatch_due_tasks().await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(count, "dispatched scheduled tasks"),
                        Err(error) => warn!(%error, "dispatcher tick failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("dispatcher stopping");
                    return;
                }
            }
        }
    });
}

/// Hourly retention sweep. Continuations are handled by the sweeper itself
/// through the scheduler; this loop only plants the periodic seed.
fn spawn_retention_cron(engine: Engine, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_PERIOD_SECS));
        interval.tick().await; // the first tick fires immediately; skip it
        info!(period_secs = SWEEP_PERIOD_SECS, "retention cron started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match engine.run_retention_sweep("cron.hourly", None).await {
                        Ok(report) => info!(
                            deleted = report.deleted,
                            projects = report.projects_visited,
                            continued = report.continued,
                            "hourly retention sweep"
                        ),
                        Err(error) => warn!(%error, "retention sweep failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("retention cron stopping");
                    return;
                }
            }
        }
    });
}
