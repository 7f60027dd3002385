//! callpal-daemon: Background daemon that places phone calls for the user
//!
//! This daemon runs alongside the CallPal app and provides:
//! - Intent extraction and call placement through the CallPal backend
//! - Transcript polling with an explicit call lifecycle state machine
//! - Calm and power UX modes with their own timing rules
//! - IPC server for the app to drive calls and receive live updates
//!
//! Scope:
//! - At most one active call at a time
//! - Transcripts are polled, not streamed
//! - Call history lives only as long as the current session

mod backend;
mod config;
mod controller;
mod events;
mod flow;
mod ipc;
mod lifecycle;
mod poller;
mod state;
mod summary;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{CallBackend, HttpBackend};
use crate::config::Config;
use crate::controller::CallController;
use crate::events::CallEvent;
use crate::flow::CallDesk;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "callpal-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        api_url = %config.api_url,
        default_mode = %config.default_mode,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    let backend: Arc<dyn CallBackend> = Arc::new(
        HttpBackend::new(&config.api_url, config.http_timeout)
            .context("failed to create backend client")?,
    );

    // Call lifecycle -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<CallEvent>(64);

    // The controller owns the call session
    let (controller, handle) = CallController::new(Arc::clone(&backend), event_tx.clone());
    let desk = CallDesk::new(backend, handle, config.default_mode);

    let server = Server::new(&config.socket_path, desk, event_tx.clone())?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the call controller (polling and timers)
        _ = controller.run() => {
            info!("call controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log call events as they happen
        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "call event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "call event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("call event logger exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("callpal-daemon stopped");

    Ok(())
}
