//! logcast-server library crate.
//!
//! Serves a live view of this process's own log output to any number of
//! browser tabs.  Log events are captured by a `tracing` layer, pushed through
//! the hand-off queue from `logcast-core`, and fanned out as WebSocket text
//! frames.
//!
//! # Architecture
//!
//! ```text
//! tracing event (any thread)
//!         │  ViewerLogLayer::on_event
//!         ▼
//! hand-off queue ──► Broadcaster ──► ViewerHandle ──► viewer task ──► browser
//!                                        (one per viewer)
//! [logcast-server]
//!   ├── domain/           ServerConfig, FileConfig, validation
//!   ├── application/      ViewerLogLayer, demo log flow
//!   └── infrastructure/
//!         ├── http/           axum routes: page and upgrade
//!         ├── viewer_session/ one WebSocket viewer, upgrade to close
//!         └── ws_server/      listener, broadcaster, shutdown order
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no network I/O and no async.
//! - `application` depends on `domain` and `logcast-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `axum`.

/// Domain layer: configuration and its validation.
pub mod domain;

/// Application layer: log capture and the demo producer.
pub mod application;

/// Infrastructure layer: listener, HTTP responses, viewer sessions.
pub mod infrastructure;
