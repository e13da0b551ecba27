//! `tracing` layer that turns log events into [`LogRecord`]s for viewers.
//!
//! [`ViewerLogLayer`] is the producer side of the pipeline.  It runs inside
//! whatever thread emitted the event (runtime worker, blocking pool, or a
//! plain `std::thread`), renders the line, and hands it to the core queue with
//! the synchronous, never-blocking [`RecordSender::enqueue`].  If the queue is
//! full or closed the record is dropped; logging never fails because a viewer
//! is slow.
//!
//! # Rendered format
//!
//! ```text
//! 2024-03-01 12:30:00.123 INFO    viewer connected viewer=1a2b3c4d peer=127.0.0.1:50412
//! └────── local time ───┘ └level┘ └─ message ──┘ └──── extra fields as key=value ────┘
//! ```
//!
//! # Feedback guard
//!
//! Events from the broadcaster's own target are skipped.  Broadcasting a
//! record must never produce another record, or a single line would loop
//! through the pipe forever.

use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};
use logcast_core::{LogRecord, RecordSender, BROADCASTER_TARGET};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Timestamp layout of a rendered line.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Feeds every event that passes the subscriber's filter into the hand-off
/// queue.
#[derive(Debug, Clone)]
pub struct ViewerLogLayer {
    sender: RecordSender,
}

impl ViewerLogLayer {
    pub fn new(sender: RecordSender) -> Self {
        Self { sender }
    }
}

impl<S> Layer<S> for ViewerLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(BROADCASTER_TARGET) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let now = Utc::now();
        let rendered = render_line(now, *meta.level(), &visitor.message, &visitor.fields);

        // Full or closed queue: the record is dropped, never the producer.
        let _ = self
            .sender
            .enqueue(LogRecord::with_timestamp(*meta.level(), meta.target(), rendered, now));
    }
}

/// Formats one log line the way viewers see it in text mode.
pub fn render_line(
    timestamp: DateTime<Utc>,
    level: Level,
    message: &str,
    fields: &[(String, String)],
) -> String {
    let mut line = format!(
        "{} {:<7} {}",
        timestamp.with_timezone(&Local).format(TIMESTAMP_FORMAT),
        level.as_str(),
        message
    );
    for (name, value) in fields {
        // Writing into a String cannot fail.
        let _ = write!(line, " {name}={value}");
    }
    line
}

/// Collects the `message` field and any structured fields of one event.
#[derive(Debug, Default)]
struct LineVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
