//! Broadcaster: drains the hand-off queue and fans each record out to every
//! registered viewer.
//!
//! # One round
//!
//! 1. `dequeue()` the next record (end-of-stream ends the task).
//! 2. Snapshot the registry.
//! 3. Encode the record once and `try_deliver` the shared payload to each
//!    viewer in the snapshot.
//!
//! Delivery into a viewer's outbound buffer never waits, so one stalled
//! socket cannot hold back the others or the producers.  A viewer whose buffer
//! is full misses that record; a viewer whose channel is closed is skipped.
//! Neither is removed here: unregistering is the connection handler's job.
//!
//! # Logging
//!
//! Everything this module logs uses [`BROADCASTER_TARGET`].  A tracing layer
//! that feeds the hand-off queue must skip that target, otherwise each round's
//! diagnostics would become new records and the broadcaster would feed itself.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::queue::RecordReceiver;
use crate::record::{LogRecord, WireFormat};
use crate::registry::{ViewerRegistry, ViewerSendError};

/// `tracing` target of every event emitted by the broadcaster.
pub const BROADCASTER_TARGET: &str = module_path!();

/// What happened to one record in one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Viewers whose outbound buffer accepted the payload.
    pub delivered: usize,
    /// Viewers skipped because their buffer was full.
    pub lagged: usize,
    /// Viewers skipped because their connection is already closing.
    pub closed: usize,
}

/// Totals over the broadcaster's lifetime, returned by [`Broadcaster::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub rounds: u64,
    pub delivered: u64,
    pub lagged: u64,
    pub closed: u64,
}

impl BroadcastStats {
    fn absorb(&mut self, outcome: RoundOutcome) {
        self.rounds += 1;
        self.delivered += outcome.delivered as u64;
        self.lagged += outcome.lagged as u64;
        self.closed += outcome.closed as u64;
    }
}

/// The single consumer of the hand-off queue.
///
/// # Example
///
/// ```rust
/// use logcast_core::{handoff_queue, Broadcaster, ViewerRegistry};
///
/// # tokio_test::block_on(async {
/// let (tx, rx) = handoff_queue(16);
/// let closer = rx.closer();
/// let task = tokio::spawn(Broadcaster::new(rx, ViewerRegistry::new()).run());
/// closer.close();
/// let stats = task.await.unwrap();
/// assert_eq!(stats.rounds, 0);
/// # drop(tx);
/// # });
/// ```
#[derive(Debug)]
pub struct Broadcaster {
    queue: RecordReceiver,
    registry: ViewerRegistry,
    format: WireFormat,
}

impl Broadcaster {
    pub fn new(queue: RecordReceiver, registry: ViewerRegistry) -> Self {
        Self {
            queue,
            registry,
            format: WireFormat::default(),
        }
    }

    /// Selects how records are encoded into text frames.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Runs until the queue reports end-of-stream.
    pub async fn run(mut self) -> BroadcastStats {
        info!(target: BROADCASTER_TARGET, format = %self.format, "broadcaster started");
        let mut stats = BroadcastStats::default();

        while let Some(record) = self.queue.dequeue().await {
            stats.absorb(self.broadcast_once(&record));
        }

        info!(
            target: BROADCASTER_TARGET,
            rounds = stats.rounds,
            delivered = stats.delivered,
            lagged = stats.lagged,
            "hand-off queue closed; broadcaster stopped"
        );
        stats
    }

    /// Delivers `record` to every viewer registered right now.
    pub fn broadcast_once(&self, record: &LogRecord) -> RoundOutcome {
        let viewers = self.registry.snapshot();
        let mut outcome = RoundOutcome::default();
        if viewers.is_empty() {
            return outcome;
        }

        let payload: Arc<str> = Arc::from(self.format.encode(record));

        for viewer in &viewers {
            match viewer.try_deliver(Arc::clone(&payload)) {
                Ok(()) => outcome.delivered += 1,
                Err(ViewerSendError::Lagging) => {
                    outcome.lagged += 1;
                    debug!(
                        target: BROADCASTER_TARGET,
                        viewer = %viewer.id(),
                        peer = viewer.label(),
                        "viewer is lagging; record skipped"
                    );
                }
                Err(ViewerSendError::Closed) => {
                    outcome.closed += 1;
                    trace!(
                        target: BROADCASTER_TARGET,
                        viewer = %viewer.id(),
                        "viewer closing; record skipped"
                    );
                }
            }
        }

        trace!(
            target: BROADCASTER_TARGET,
            delivered = outcome.delivered,
            lagged = outcome.lagged,
            closed = outcome.closed,
            "broadcast round complete"
        );
        outcome
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::handoff_queue;
    use crate::registry::ViewerHandle;
    use tracing::Level;

    fn record(msg: &str) -> LogRecord {
        LogRecord::new(Level::INFO, "bcast-test", msg)
    }

    #[test]
    fn test_broadcast_once_with_no_viewers_is_empty_outcome() {
        let (_tx, rx) = handoff_queue(4);
        let broadcaster = Broadcaster::new(rx, ViewerRegistry::new());

        assert_eq!(broadcaster.broadcast_once(&record("x")), RoundOutcome::default());
    }

    #[test]
    fn test_broadcast_once_counts_each_outcome() {
        // Arrange: one healthy, one lagging, one closed viewer
        let registry = ViewerRegistry::new();
        let (healthy, mut healthy_rx) = ViewerHandle::channel("healthy", 4);
        let (slow, _slow_rx) = ViewerHandle::channel("slow", 1);
        let (gone, gone_rx) = ViewerHandle::channel("gone", 4);
        slow.try_deliver(Arc::from("backlog")).unwrap();
        drop(gone_rx);
        registry.add(healthy);
        registry.add(slow);
        registry.add(gone);

        let (_tx, rx) = handoff_queue(4);
        let broadcaster = Broadcaster::new(rx, registry);

        // Act
        let outcome = broadcaster.broadcast_once(&record("hello"));

        // Assert
        assert_eq!(
            outcome,
            RoundOutcome {
                delivered: 1,
                lagged: 1,
                closed: 1
            }
        );
        assert_eq!(&*healthy_rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_json_format_is_applied_to_payload() {
        let registry = ViewerRegistry::new();
        let (viewer, mut viewer_rx) = ViewerHandle::channel("v", 4);
        registry.add(viewer);
        let (_tx, rx) = handoff_queue(4);
        let broadcaster = Broadcaster::new(rx, registry).with_format(WireFormat::Json);

        broadcaster.broadcast_once(&record("structured"));

        let payload = viewer_rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["message"], "structured");
    }

    #[tokio::test]
    async fn test_run_returns_stats_after_close() {
        // Arrange
        let registry = ViewerRegistry::new();
        let (viewer, mut viewer_rx) = ViewerHandle::channel("v", 8);
        registry.add(viewer);
        let (tx, rx) = handoff_queue(8);
        let closer = rx.closer();
        let task = tokio::spawn(Broadcaster::new(rx, registry).run());

        // Act
        tx.enqueue(record("one")).unwrap();
        tx.enqueue(record("two")).unwrap();
        assert_eq!(&*viewer_rx.recv().await.unwrap(), "one");
        assert_eq!(&*viewer_rx.recv().await.unwrap(), "two");
        closer.close();
        let stats = task.await.unwrap();

        // Assert
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.lagged, 0);
    }

    #[test]
    fn test_broadcaster_target_is_module_path() {
        assert_eq!(BROADCASTER_TARGET, "logcast_core::broadcaster");
    }
}
