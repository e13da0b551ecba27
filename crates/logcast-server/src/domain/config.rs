//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is assembled at startup from three layers, highest priority first:
//!
//! 1. command-line flags (or their `LOGCAST_*` environment variables),
//! 2. an optional TOML file given with `--config`,
//! 3. the built-in defaults in [`ServerConfig::default`].
//!
//! The domain layer only defines the shapes and the merge/validate rules; the
//! file itself is read by [`FileConfig::load`] and the flags are parsed in
//! `main.rs`.
//!
//! # File format
//!
//! ```toml
//! bind = "0.0.0.0:8080"
//! ws_path = "/ws"
//! page_path = "/etc/logcast/viewer.html"
//! queue_capacity = 4096
//! viewer_buffer = 512
//! handshake_timeout_secs = 10
//! write_timeout_secs = 5
//! shutdown_grace_secs = 2
//! wire_format = "json"
//! log_level = "debug"
//! demo_interval_secs = 1
//! ```
//!
//! Every key is optional.  Unknown keys are rejected so typos surface early.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use logcast_core::{WireFormat, DEFAULT_QUEUE_CAPACITY, DEFAULT_VIEWER_BUFFER};
use serde::Deserialize;
use thiserror::Error;

/// Error type for loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// All runtime configuration for the log viewer server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Path that accepts WebSocket upgrades from viewers.
    pub ws_path: String,

    /// HTML page served at `/`.  `None` serves the built-in viewer page.
    pub page_path: Option<PathBuf>,

    /// Records buffered between producers and the broadcaster before new
    /// records are dropped.
    pub queue_capacity: usize,

    /// Payloads buffered per viewer before that viewer starts missing records.
    pub viewer_buffer: usize,

    /// Upper bound on answering one HTTP request, including the WebSocket
    /// upgrade response.
    pub handshake_timeout: Duration,

    /// Upper bound on one outbound frame write; a viewer that cannot accept a
    /// frame within this time is disconnected.
    pub write_timeout: Duration,

    /// How long viewer sessions get to send their close frames at shutdown
    /// before they are aborted.
    pub shutdown_grace: Duration,

    /// Encoding of each record on the wire.
    pub wire_format: WireFormat,

    /// Default `tracing` filter directive when `RUST_LOG` is not set.
    pub log_level: String,

    /// Emit a synthetic log line at this interval (demo mode).
    pub demo_interval: Option<Duration>,
}

impl Default for ServerConfig {
    /// | Field             | Default          |
    /// |-------------------|------------------|
    /// | bind_addr         | `127.0.0.1:8080` |
    /// | ws_path           | `/ws`            |
    /// | page_path         | built-in page    |
    /// | queue_capacity    | 1024             |
    /// | viewer_buffer     | 256              |
    /// | handshake_timeout | 10 seconds       |
    /// | write_timeout     | 5 seconds        |
    /// | shutdown_grace    | 2 seconds        |
    /// | wire_format       | `text`           |
    /// | log_level         | `info`           |
    /// | demo_interval     | disabled         |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            ws_path: "/ws".to_string(),
            page_path: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            viewer_buffer: DEFAULT_VIEWER_BUFFER,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            wire_format: WireFormat::Text,
            log_level: "info".to_string(),
            demo_interval: None,
        }
    }
}

impl ServerConfig {
    /// Checks the settings that would otherwise fail confusingly at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::invalid("ws_path", "must start with '/'"));
        }
        if let Some(bad) = self.ws_path.chars().find(|c| !is_path_char(*c)) {
            return Err(ConfigError::invalid(
                "ws_path",
                format!("character {bad:?} is not allowed (use letters, digits, '/', '-', '_', '.', '~')"),
            ));
        }
        if self.ws_path == "/" || self.ws_path == "/index.html" {
            return Err(ConfigError::invalid(
                "ws_path",
                "collides with the viewer page route",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be at least 1"));
        }
        if self.viewer_buffer == 0 {
            return Err(ConfigError::invalid("viewer_buffer", "must be at least 1"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::invalid("handshake_timeout", "must be non-zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::invalid("write_timeout", "must be non-zero"));
        }
        if self.demo_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::invalid("demo_interval", "must be non-zero"));
        }
        Ok(())
    }
}

/// Characters accepted in `ws_path`.  The path becomes both a router path and
/// a string in the viewer page's script, so anything with meaning in either
/// is rejected.
fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~')
}

// ── TOML file layer ───────────────────────────────────────────────────────────

/// Contents of the optional TOML config file.  Absent keys keep the value
/// from the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub ws_path: Option<String>,
    pub page_path: Option<PathBuf>,
    pub queue_capacity: Option<usize>,
    pub viewer_buffer: Option<usize>,
    pub handshake_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub wire_format: Option<String>,
    pub log_level: Option<String>,
    /// `0` disables demo mode even if a lower layer enabled it.
    pub demo_interval_secs: Option<u64>,
}

impl FileConfig {
    /// Reads and parses the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlays the keys present in this file onto `base`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `bind` is not a socket address or
    /// `wire_format` is unknown.
    pub fn apply_to(self, mut base: ServerConfig) -> Result<ServerConfig, ConfigError> {
        if let Some(bind) = self.bind {
            base.bind_addr = bind
                .parse()
                .map_err(|_| ConfigError::invalid("bind", format!("'{bind}' is not ip:port")))?;
        }
        if let Some(ws_path) = self.ws_path {
            base.ws_path = ws_path;
        }
        if let Some(page_path) = self.page_path {
            base.page_path = Some(page_path);
        }
        if let Some(n) = self.queue_capacity {
            base.queue_capacity = n;
        }
        if let Some(n) = self.viewer_buffer {
            base.viewer_buffer = n;
        }
        if let Some(secs) = self.handshake_timeout_secs {
            base.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.write_timeout_secs {
            base.write_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_grace_secs {
            base.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(format) = self.wire_format {
            base.wire_format = format
                .parse()
                .map_err(|reason: String| ConfigError::invalid("wire_format", reason))?;
        }
        if let Some(level) = self.log_level {
            base.log_level = level;
        }
        if let Some(secs) = self.demo_interval_secs {
            base.demo_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(base)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
