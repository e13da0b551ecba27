//! Hand-off queue: the only structure that crosses from producer threads into
//! the async runtime.
//!
//! # Shape
//!
//! ```text
//!  any OS thread                     Tokio runtime
//!  ─────────────                     ─────────────
//!  RecordSender::enqueue ──┐
//!  RecordSender::enqueue ──┼──► bounded mpsc ──► RecordReceiver::dequeue (Broadcaster)
//!  RecordSender::enqueue ──┘           ▲
//!                                      │
//!                   QueueCloser::close ┘  (watch flag, wakes the consumer)
//! ```
//!
//! # Producer side
//!
//! [`RecordSender::enqueue`] is a plain synchronous call built on
//! `mpsc::Sender::try_send`.  It never waits for the consumer and is safe to
//! call from threads that are not part of any runtime, including from inside
//! a `tracing` layer.  When the buffer is full the *new* record is dropped and
//! counted (see [`QueueCloser::dropped`]); producers are never slowed down by
//! viewers.
//!
//! # Close semantics
//!
//! Closing is a separate `watch` flag rather than "drop every sender", because
//! senders live in the global tracing subscriber and cannot be reclaimed at
//! shutdown.  Once the flag is set the consumer's pending and future
//! `dequeue()` calls return `None` immediately, even if records are still
//! buffered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::record::LogRecord;

/// Default number of records buffered between producers and the broadcaster.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Why a record could not be handed off.
///
/// Neither case is fatal to the producer; callers on a logging path should
/// simply ignore the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue has been closed; the record was discarded.
    #[error("hand-off queue is closed")]
    Closed,

    /// The buffer is at capacity; the record was discarded.
    #[error("hand-off queue is full")]
    Full,
}

/// State shared by every handle of one queue.
#[derive(Debug)]
struct Shared {
    closed: watch::Sender<bool>,
    dropped: AtomicU64,
}

/// Creates a hand-off queue holding at most `capacity` undelivered records.
///
/// A capacity of zero is treated as one.
///
/// # Example
///
/// ```rust
/// use logcast_core::{handoff_queue, LogRecord};
/// use tracing::Level;
///
/// # tokio_test::block_on(async {
/// let (tx, mut rx) = handoff_queue(8);
/// tx.enqueue(LogRecord::new(Level::INFO, "app", "hello")).unwrap();
/// assert_eq!(rx.dequeue().await.unwrap().rendered(), "hello");
/// # });
/// ```
pub fn handoff_queue(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed, closed_rx) = watch::channel(false);
    let shared = Arc::new(Shared {
        closed,
        dropped: AtomicU64::new(0),
    });

    (
        RecordSender {
            tx,
            shared: Arc::clone(&shared),
        },
        RecordReceiver {
            rx,
            closed_rx,
            shared,
        },
    )
}

// ── Producer handle ───────────────────────────────────────────────────────────

/// Cloneable producer handle.  Every clone feeds the same consumer.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<LogRecord>,
    shared: Arc<Shared>,
}

impl RecordSender {
    /// Hands `record` to the broadcaster without waiting.
    ///
    /// # Errors
    ///
    /// - [`EnqueueError::Closed`] after [`close`](QueueCloser::close) or once
    ///   the receiver has been dropped.
    /// - [`EnqueueError::Full`] when the buffer is at capacity.
    pub fn enqueue(&self, record: LogRecord) -> Result<(), EnqueueError> {
        if *self.shared.closed.borrow() {
            return Err(EnqueueError::Closed);
        }

        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Returns a handle that can close the queue from anywhere.
    pub fn closer(&self) -> QueueCloser {
        QueueCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// `true` once the queue has been closed.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow() || self.tx.is_closed()
    }
}

// ── Consumer handle ───────────────────────────────────────────────────────────

/// The single consumer end, owned by the broadcaster task.
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<LogRecord>,
    closed_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
}

impl RecordReceiver {
    /// Waits for the next record.
    ///
    /// Returns `None` once the queue is closed, or once every sender has been
    /// dropped and the buffer is drained.  Cancel-safe: dropping the future
    /// never loses a record.
    pub async fn dequeue(&mut self) -> Option<LogRecord> {
        if *self.closed_rx.borrow() {
            self.rx.close();
            return None;
        }

        // `biased` makes a close that races with an available record win, so
        // nothing is delivered after shutdown starts.
        tokio::select! {
            biased;
            _ = self.closed_rx.wait_for(|closed| *closed) => {
                self.rx.close();
                None
            }
            record = self.rx.recv() => record,
        }
    }

    /// Returns a handle that can close the queue after this receiver has been
    /// moved into the broadcaster task.
    pub fn closer(&self) -> QueueCloser {
        QueueCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Closes the queue.  Idempotent.
    pub fn close(&self) {
        self.closer().close();
    }
}

// ── Close handle ──────────────────────────────────────────────────────────────

/// Closes the queue and reports overflow statistics.
#[derive(Debug, Clone)]
pub struct QueueCloser {
    shared: Arc<Shared>,
}

impl QueueCloser {
    /// Marks the queue closed and wakes the consumer.  Idempotent.
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    /// `true` once [`close`](Self::close) has been called on any handle.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Number of records discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};
    use tracing::Level;

    fn record(msg: &str) -> LogRecord {
        LogRecord::new(Level::INFO, "queue-test", msg)
    }

    #[tokio::test]
    async fn test_dequeue_returns_records_in_enqueue_order() {
        // Arrange
        let (tx, mut rx) = handoff_queue(16);

        // Act
        for msg in ["one", "two", "three"] {
            tx.enqueue(record(msg)).unwrap();
        }

        // Assert
        assert_eq!(rx.dequeue().await.unwrap().rendered(), "one");
        assert_eq!(rx.dequeue().await.unwrap().rendered(), "two");
        assert_eq!(rx.dequeue().await.unwrap().rendered(), "three");
    }

    #[test]
    fn test_dequeue_is_pending_on_empty_queue_and_wakes_on_enqueue() {
        let (tx, mut rx) = handoff_queue(4);
        let mut fut = tokio_test::task::spawn(rx.dequeue());

        assert_pending!(fut.poll());

        tx.enqueue(record("late")).unwrap();

        assert!(fut.is_woken());
        let got = assert_ready!(fut.poll());
        assert_eq!(got.unwrap().rendered(), "late");
    }

    #[test]
    fn test_close_wakes_pending_dequeue_with_end_of_stream() {
        let (_tx, mut rx) = handoff_queue(4);
        let closer = rx.closer();
        let mut fut = tokio_test::task::spawn(rx.dequeue());

        assert_pending!(fut.poll());
        closer.close();

        assert!(fut.is_woken());
        assert!(assert_ready!(fut.poll()).is_none());
    }

    #[tokio::test]
    async fn test_close_discards_buffered_records() {
        // Arrange: records are waiting when shutdown starts
        let (tx, mut rx) = handoff_queue(4);
        tx.enqueue(record("never delivered")).unwrap();

        // Act
        rx.close();

        // Assert
        assert!(rx.dequeue().await.is_none());
        assert!(rx.dequeue().await.is_none(), "end-of-stream must be sticky");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (tx, rx) = handoff_queue(4);
        let closer = tx.closer();

        closer.close();
        closer.close();
        rx.close();

        assert!(closer.is_closed());
        assert!(tx.is_closed());
    }

    #[test]
    fn test_enqueue_after_close_returns_closed() {
        let (tx, _rx) = handoff_queue(4);
        tx.closer().close();

        assert_eq!(tx.enqueue(record("x")), Err(EnqueueError::Closed));
    }

    #[test]
    fn test_enqueue_after_receiver_dropped_returns_closed() {
        let (tx, rx) = handoff_queue(4);
        drop(rx);

        assert_eq!(tx.enqueue(record("x")), Err(EnqueueError::Closed));
    }

    #[test]
    fn test_full_queue_drops_newest_and_counts_it() {
        // Arrange
        let (tx, _rx) = handoff_queue(2);
        tx.enqueue(record("a")).unwrap();
        tx.enqueue(record("b")).unwrap();

        // Act
        let result = tx.enqueue(record("c"));

        // Assert
        assert_eq!(result, Err(EnqueueError::Full));
        assert_eq!(tx.closer().dropped(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_keeps_oldest_records() {
        let (tx, mut rx) = handoff_queue(1);
        tx.enqueue(record("kept")).unwrap();
        let _ = tx.enqueue(record("dropped"));

        assert_eq!(rx.dequeue().await.unwrap().rendered(), "kept");
    }

    #[tokio::test]
    async fn test_zero_capacity_is_treated_as_one() {
        let (tx, mut rx) = handoff_queue(0);
        tx.enqueue(record("fits")).unwrap();
        assert_eq!(rx.dequeue().await.unwrap().rendered(), "fits");
    }

    #[tokio::test]
    async fn test_dropping_all_senders_ends_stream_after_drain() {
        let (tx, mut rx) = handoff_queue(4);
        tx.enqueue(record("last")).unwrap();
        drop(tx);

        assert_eq!(rx.dequeue().await.unwrap().rendered(), "last");
        assert!(rx.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_from_plain_thread() {
        // Arrange: the producer is an OS thread with no runtime context
        let (tx, mut rx) = handoff_queue(64);

        // Act
        let producer = std::thread::spawn(move || {
            for i in 0..10 {
                tx.enqueue(record(&format!("thread-{i}"))).unwrap();
            }
        });
        producer.join().unwrap();

        // Assert
        for i in 0..10 {
            assert_eq!(
                rx.dequeue().await.unwrap().rendered(),
                format!("thread-{i}")
            );
        }
    }
}
