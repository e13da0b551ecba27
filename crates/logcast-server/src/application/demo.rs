//! Demo log flow: a background thread that logs a random number on a timer.
//!
//! Useful for trying the viewer page without wiring logcast into a real
//! application.  It deliberately runs on a plain OS thread rather than a
//! Tokio task so every demo line takes the cross-thread path into the
//! hand-off queue.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// `tracing` target of the demo lines.
pub const DEMO_TARGET: &str = "logcast::demo";

/// Sleep granularity, so shutdown is noticed promptly even with long intervals.
const POLL_STEP: Duration = Duration::from_millis(100);

/// Starts the demo thread.  It exits once `shutdown` reads `true` or its
/// sender is dropped.
///
/// # Errors
///
/// Returns an error if the OS refuses to spawn the thread.
pub fn spawn_demo_flow(
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("logcast-demo".to_string())
        .spawn(move || {
            info!(target: DEMO_TARGET, interval_ms = interval.as_millis() as u64, "demo log flow started");
            loop {
                if !sleep_unless_shutdown(interval, &shutdown) {
                    break;
                }
                info!(target: DEMO_TARGET, "{}", demo_value());
            }
        })
}

/// Uniform in `[0, 1)`.
fn demo_value() -> f64 {
    rand::random::<f64>()
}

/// Sleeps for `total` in small steps.  Returns `false` if shutdown was
/// requested before the time was up.
fn sleep_unless_shutdown(total: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown_requested(shutdown) {
            return false;
        }
        let step = remaining.min(POLL_STEP);
        thread::sleep(step);
        remaining -= step;
    }
    !shutdown_requested(shutdown)
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_values_are_in_unit_interval_and_vary() {
        let values: Vec<f64> = (0..1000).map(|_| demo_value()).collect();
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_demo_thread_stops_on_shutdown() {
        // Arrange
        let (tx, rx) = watch::channel(false);
        let handle = spawn_demo_flow(Duration::from_millis(20), rx).unwrap();

        // Act
        thread::sleep(Duration::from_millis(50));
        tx.send_replace(true);

        // Assert: join returns, i.e. the loop noticed the flag
        handle.join().unwrap();
    }

    #[test]
    fn test_demo_thread_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_demo_flow(Duration::from_secs(60), rx).unwrap();

        drop(tx);

        handle.join().unwrap();
    }
}
