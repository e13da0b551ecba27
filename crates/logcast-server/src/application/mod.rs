//! Application layer for logcast-server.
//!
//! Everything that produces log records: the `tracing` layer that renders
//! events and enqueues them, and the optional demo flow that generates
//! traffic.  Neither knows about sockets; they only see a
//! [`RecordSender`](logcast_core::RecordSender) or the global tracing
//! dispatcher.

pub mod demo;
pub mod log_layer;

pub use demo::spawn_demo_flow;
pub use log_layer::{render_line, ViewerLogLayer};
