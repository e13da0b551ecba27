//! Infrastructure layer for logcast-server.
//!
//! Everything that touches a socket or the filesystem at request time.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and serving the HTTP routes
//! - Upgrading viewer requests to WebSocket sessions
//! - Running one task per viewer, plus the broadcaster task
//! - Ordered shutdown when the shutdown signal flips
//!
//! # What does NOT belong here?
//!
//! - Rendering log events into records (that is the application layer)
//! - Config rules (that is the domain layer)

pub mod http;
pub mod viewer_session;
pub mod ws_server;

pub use http::{router, AppState, PageSource};
pub use viewer_session::{handle_viewer, CloseReason, SessionLimits, SessionSet};
pub use ws_server::{run_server, Server};
