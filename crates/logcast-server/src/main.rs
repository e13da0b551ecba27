//! logcast: live log viewer server, entry point.
//!
//! Starts the HTTP/WebSocket listener and streams this process's own log
//! output to every connected browser tab.  Open `http://<bind>/` to watch.
//!
//! # Usage
//!
//! ```text
//! logcast [OPTIONS]
//!
//! Options:
//!   --config <FILE>            TOML config file
//!   --bind <ADDR>              Listener address [default: 127.0.0.1:8080]
//!   --ws-path <PATH>           WebSocket endpoint [default: /ws]
//!   --page <FILE>              Serve this HTML file instead of the built-in page
//!   --queue-capacity <N>       Hand-off queue capacity [default: 1024]
//!   --viewer-buffer <N>        Per-viewer buffer [default: 256]
//!   --handshake-timeout <SECS> [default: 10]
//!   --write-timeout <SECS>     [default: 5]
//!   --shutdown-grace <SECS>    [default: 2]
//!   --format <text|json>       Wire format [default: text]
//!   --log-level <FILTER>       Filter when RUST_LOG is unset [default: info]
//!   --demo <SECS>              Emit a demo log line every SECS (0 = off)
//! ```
//!
//! # Environment variable overrides
//!
//! Every flag can also be set with a `LOGCAST_*` variable (`LOGCAST_BIND`,
//! `LOGCAST_WS_PATH`, `LOGCAST_FORMAT`, ...).  Precedence, highest first:
//! flag, environment variable, config file, built-in default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use logcast_core::{handoff_queue, RecordSender, WireFormat};
use logcast_server::application::{spawn_demo_flow, ViewerLogLayer};
use logcast_server::domain::{FileConfig, ServerConfig};
use logcast_server::infrastructure::Server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Live log viewer.
///
/// Every flag is optional; unset flags fall back to the config file and then
/// to the built-in defaults.
#[derive(Debug, Default, Parser)]
#[command(
    name = "logcast",
    about = "Streams this process's log output to browsers over WebSocket",
    version
)]
struct Cli {
    /// TOML config file.
    #[arg(long, env = "LOGCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    ///
    /// Use `0.0.0.0:PORT` to accept viewers from other machines.
    #[arg(long, env = "LOGCAST_BIND")]
    bind: Option<SocketAddr>,

    /// Path that accepts WebSocket upgrades.
    #[arg(long, env = "LOGCAST_WS_PATH")]
    ws_path: Option<String>,

    /// HTML file served at `/`, read on every request.
    #[arg(long, env = "LOGCAST_PAGE")]
    page: Option<PathBuf>,

    /// Records buffered between the application and the broadcaster.
    #[arg(long, env = "LOGCAST_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    /// Frames buffered per viewer before it starts missing records.
    #[arg(long, env = "LOGCAST_VIEWER_BUFFER")]
    viewer_buffer: Option<usize>,

    /// Seconds allowed for a request head and WebSocket handshake.
    #[arg(long, env = "LOGCAST_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,

    /// Seconds allowed for one outbound frame before the viewer is dropped.
    #[arg(long, env = "LOGCAST_WRITE_TIMEOUT")]
    write_timeout: Option<u64>,

    /// Seconds viewers get to close cleanly at shutdown.
    #[arg(long, env = "LOGCAST_SHUTDOWN_GRACE")]
    shutdown_grace: Option<u64>,

    /// Wire format of each frame: `text` or `json`.
    #[arg(long, env = "LOGCAST_FORMAT")]
    format: Option<WireFormat>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "LOGCAST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit a demo log line every this many seconds; `0` turns it off.
    #[arg(long, env = "LOGCAST_DEMO")]
    demo: Option<u64>,
}

impl Cli {
    /// Resolves defaults, the config file, and these flags into one
    /// validated [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => FileConfig::load(path)
                .and_then(|file| file.apply_to(ServerConfig::default()))
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(ws_path) = self.ws_path {
            config.ws_path = ws_path;
        }
        if let Some(page) = self.page {
            config.page_path = Some(page);
        }
        if let Some(n) = self.queue_capacity {
            config.queue_capacity = n;
        }
        if let Some(n) = self.viewer_buffer {
            config.viewer_buffer = n;
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.write_timeout {
            config.write_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_grace {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(format) = self.format {
            config.wire_format = format;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(secs) = self.demo {
            config.demo_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

/// Installs the global subscriber: console output plus the viewer layer, both
/// behind the same filter.
fn init_tracing(log_level: &str, records: RecordSender) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level filter '{log_level}'"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ViewerLogLayer::new(records))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI flags, environment, and config file are resolved into a
///    [`ServerConfig`].
/// 2. The hand-off queue is created and its sender handed to the tracing
///    layer, so from here on every log line also reaches viewers.
/// 3. The listener is bound and the server task started.
/// 4. The demo thread starts if configured.
/// 5. Ctrl+C flips the shutdown signal; the server drains and returns.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    let (records, queue) = handoff_queue(config.queue_capacity);
    init_tracing(&config.log_level, records)?;

    info!(
        bind = %config.bind_addr,
        ws_path = %config.ws_path,
        format = %config.wire_format,
        "logcast starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let demo_interval = config.demo_interval;
    let server = Server::bind(config, queue).await?;
    let mut server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    let demo = match demo_interval {
        Some(interval) => Some(
            spawn_demo_flow(interval, shutdown_rx.clone())
                .context("failed to start demo log thread")?,
        ),
        None => None,
    };

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C; initiating graceful shutdown"),
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    let outcome = tokio::select! {
        _ = ctrl_c => {
            shutdown_tx.send_replace(true);
            (&mut server_task).await
        }
        finished = &mut server_task => {
            shutdown_tx.send_replace(true);
            finished
        }
    };

    if let Some(handle) = demo {
        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            warn!("demo log thread did not exit cleanly");
        }
    }

    let stats = outcome.context("server task panicked")??;
    info!(
        rounds = stats.rounds,
        delivered = stats.delivered,
        lagged = stats.lagged,
        "logcast stopped"
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
