//! The log record carried through the hand-off queue.
//!
//! A [`LogRecord`] is produced by whatever logging front-end the process uses
//! (see `logcast-server`'s tracing layer) and is immutable once created.  The
//! core never inspects the message: it only needs the already-rendered text
//! for transmission, plus the structured fields for the optional JSON wire
//! format.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Level;

/// One rendered log line plus the metadata it was emitted with.
///
/// # Example
///
/// ```rust
/// use logcast_core::LogRecord;
/// use tracing::Level;
///
/// let record = LogRecord::new(Level::INFO, "app", "2024-01-01 00:00:00.000 INFO    ready");
/// assert_eq!(record.rendered(), "2024-01-01 00:00:00.000 INFO    ready");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    level: Level,
    target: String,
    timestamp: DateTime<Utc>,
    rendered: String,
}

impl LogRecord {
    /// Creates a record stamped with the current UTC time.
    pub fn new(level: Level, target: impl Into<String>, rendered: impl Into<String>) -> Self {
        Self::with_timestamp(level, target, rendered, Utc::now())
    }

    /// Creates a record with an explicit emission time.
    pub fn with_timestamp(
        level: Level,
        target: impl Into<String>,
        rendered: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            level,
            target: target.into(),
            timestamp,
            rendered: rendered.into(),
        }
    }

    /// Severity the record was emitted at.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Module path or logger name that emitted the record.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Emission time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The fully formatted line sent to viewers in text mode.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

/// How a record is turned into the text frame each viewer receives.
///
/// `Text` sends the rendered line unchanged.  `Json` wraps the record in a
/// small object so a richer viewer can colour by level or filter by target:
///
/// ```json
/// {"timestamp":"2024-01-01T00:00:00.000Z","level":"INFO","target":"app","message":"..."}
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonEnvelope<'a> {
    timestamp: String,
    level: &'a str,
    target: &'a str,
    message: &'a str,
}

impl WireFormat {
    /// Produces the payload for one broadcast round.
    ///
    /// JSON serialisation of a struct of strings cannot fail; if it ever did,
    /// the rendered line is sent instead so the record is not lost.
    pub fn encode(self, record: &LogRecord) -> String {
        match self {
            WireFormat::Text => record.rendered.clone(),
            WireFormat::Json => {
                let envelope = JsonEnvelope {
                    timestamp: record
                        .timestamp
                        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    level: record.level.as_str(),
                    target: &record.target,
                    message: &record.rendered,
                };
                serde_json::to_string(&envelope).unwrap_or_else(|_| record.rendered.clone())
            }
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(WireFormat::Text),
            "json" => Ok(WireFormat::Json),
            other => Err(format!("unknown wire format '{other}' (expected 'text' or 'json')")),
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Text => write!(f, "text"),
            WireFormat::Json => write!(f, "json"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
