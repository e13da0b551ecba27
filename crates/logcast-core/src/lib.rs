//! # logcast-core
//!
//! The transport-independent heart of logcast: moving log records from any
//! thread in the process to every connected live viewer, in order, without
//! letting a slow viewer slow down the code that logs.
//!
//! ```text
//! producer threads ──► queue ──► broadcaster ──► registry snapshot ──► viewer buffers
//!                                                     ▲
//!                       connection handlers ──────────┘ (register / unregister)
//! ```
//!
//! - **`record`** – [`LogRecord`], the immutable value that travels the pipe,
//!   and [`WireFormat`], which turns it into a text frame.
//! - **`queue`** – the bounded hand-off queue.  Synchronous, never-blocking
//!   `enqueue` on the producer side; async `dequeue` on the consumer side;
//!   explicit close for shutdown.
//! - **`registry`** – [`ViewerRegistry`], the live set of viewers, and the
//!   [`Registration`] guard that guarantees a viewer is removed however its
//!   handler exits.
//! - **`broadcaster`** – the single task that drains the queue and fans out.
//! - **`session`** – the per-connection lifecycle state machine.
//!
//! Nothing here touches sockets; `logcast-server` supplies the WebSocket side.

pub mod broadcaster;
pub mod queue;
pub mod record;
pub mod registry;
pub mod session;

pub use broadcaster::{BroadcastStats, Broadcaster, RoundOutcome, BROADCASTER_TARGET};
pub use queue::{
    handoff_queue, EnqueueError, QueueCloser, RecordReceiver, RecordSender,
    DEFAULT_QUEUE_CAPACITY,
};
pub use record::{LogRecord, WireFormat};
pub use registry::{
    Registration, ViewerHandle, ViewerId, ViewerRegistry, ViewerSendError,
    DEFAULT_VIEWER_BUFFER,
};
pub use session::{StateError, ViewerState};
