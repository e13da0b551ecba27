//! Domain layer for logcast-server.
//!
//! Pure types with no network I/O: the server configuration, its TOML file
//! overlay, and the rules that decide whether a merged configuration is
//! usable.
//!
//! Nothing in here touches `tokio` or sockets, apart from
//! [`FileConfig::load`] which reads the config file it is asked to.

pub mod config;

pub use config::{ConfigError, FileConfig, ServerConfig};
