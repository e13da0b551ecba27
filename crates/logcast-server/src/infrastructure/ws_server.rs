//! Listener, broadcaster task, and shutdown order.
//!
//! This module is responsible for:
//!
//! 1. Binding the single TCP listener that serves both the viewer page and
//!    the WebSocket endpoint.
//! 2. Serving the [`router`] on it, one [`SessionSet`] session per viewer.
//! 3. Running the [`Broadcaster`] that moves records from the hand-off queue
//!    to every registered viewer.
//! 4. Shutting all of that down in order when the shutdown signal flips.
//!
//! # Shutdown order
//!
//! 1. Stop accepting connections.
//! 2. Close the hand-off queue; the broadcaster returns without flushing
//!    what is still buffered.
//! 3. Tell the viewer sessions to send their close frames.  They get
//!    `shutdown_grace` to do so, then the remaining ones are aborted.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use logcast_core::{BroadcastStats, Broadcaster, QueueCloser, RecordReceiver, ViewerRegistry};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::domain::ServerConfig;
use crate::infrastructure::http::{router, AppState};
use crate::infrastructure::viewer_session::SessionSet;

/// A bound, not yet running server.
///
/// Binding is separate from running so callers (and tests) can learn the
/// actual port before connections start, e.g. after binding port 0.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    queue: RecordReceiver,
    registry: ViewerRegistry,
}

impl Server {
    /// Validates `config` and binds the listener on `config.bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the address cannot
    /// be bound (port in use, missing permission).
    pub async fn bind(config: ServerConfig, queue: RecordReceiver) -> anyhow::Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound listener address")?;

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            queue,
            registry: ViewerRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the live viewer set.
    pub fn registry(&self) -> ViewerRegistry {
        self.registry.clone()
    }

    /// Serves until `shutdown` reads `true` (or its sender is dropped), then
    /// shuts down in order and returns the broadcaster's totals.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<BroadcastStats> {
        let Server {
            listener,
            local_addr,
            config,
            queue,
            registry,
        } = self;

        let queue_closer = queue.closer();
        let broadcaster = tokio::spawn(
            Broadcaster::new(queue, registry.clone())
                .with_format(config.wire_format)
                .run(),
        );

        let sessions = SessionSet::new();
        let app = router(AppState::new(Arc::clone(&config), registry, sessions.clone()));
        let serve = tokio::spawn(
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_requested(shutdown.clone()))
            .into_future(),
        );

        info!(
            addr = %local_addr,
            ws_path = %config.ws_path,
            format = %config.wire_format,
            "log viewer listening on http://{local_addr}/"
        );

        shutdown_requested(shutdown).await;
        info!("shutdown requested; stopping listener");

        let stats = stop_broadcaster(queue_closer, broadcaster).await;
        sessions.close();
        sessions.drain(config.shutdown_grace).await;
        stop_listener(serve, &config).await;

        info!(
            rounds = stats.rounds,
            delivered = stats.delivered,
            "log viewer stopped"
        );
        Ok(stats)
    }
}

/// Binds and runs a server in one call.
pub async fn run_server(
    config: ServerConfig,
    queue: RecordReceiver,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<BroadcastStats> {
    Server::bind(config, queue).await?.run(shutdown).await
}

/// Resolves once the flag reads `true` or its sender is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn stop_broadcaster(closer: QueueCloser, broadcaster: JoinHandle<BroadcastStats>) -> BroadcastStats {
    closer.close();
    let dropped = closer.dropped();
    if dropped > 0 {
        warn!(dropped, "records were dropped because the hand-off queue was full");
    }
    match broadcaster.await {
        Ok(stats) => stats,
        Err(e) => {
            error!("broadcaster task failed: {e}");
            BroadcastStats::default()
        }
    }
}

/// Waits for in-flight page requests after the listener stopped accepting.
async fn stop_listener(serve: JoinHandle<std::io::Result<()>>, config: &ServerConfig) {
    let abort = serve.abort_handle();
    match timeout(config.shutdown_grace, serve).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("listener failed: {e}"),
        Ok(Err(e)) => error!("listener task failed: {e}"),
        Err(_) => {
            warn!("HTTP requests still open after the grace period; aborting");
            abort.abort();
        }
    }
}
