//! Record, lifecycle, and statistics types for the event store.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use topiclog_codec::Value;

use crate::error::StoreError;

/// Layout of the `timestamp` column, matching SQLite's `CURRENT_TIMESTAMP`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One decoded event read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// When the event was recorded (UTC).
    pub timestamp: DateTime<Utc>,
    /// The decoded payload.
    pub value: Value,
}

/// Lifecycle of an [`EventStore`](crate::EventStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Constructed, writer not yet started.
    Idle,
    /// Writer is opening the database and applying the schema.
    Starting,
    /// Accepting writes.
    Running,
    /// `close` is in progress; writes are refused.
    ShuttingDown,
    /// Writer has exited and released its connection.
    Stopped,
}

impl Lifecycle {
    /// Returns the lowercase label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`EventStore::write`](crate::EventStore::write) reaches storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Commit inline on the calling thread.
    Sync,
    /// Enqueue and let the background writer commit.
    #[default]
    Async,
}

/// Counters describing what happened to submitted writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Event rows committed.
    pub committed: u64,
    /// Writes whose event row failed to commit and were dropped.
    pub dropped: u64,
    /// Queued writes thrown away by a non-draining close.
    pub discarded: u64,
}

/// Formats a timestamp the way the `timestamp` column stores it.
///
/// Whole seconds use SQLite's `CURRENT_TIMESTAMP` layout; a non-zero
/// millisecond part is appended as `.fff`. Sub-millisecond precision is
/// truncated. Because range bounds are formatted with the same function,
/// text comparison in SQL agrees with time ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let millis = ts.timestamp_subsec_millis();
    let whole = ts.with_nanosecond(0).unwrap_or(*ts);
    if millis == 0 {
        whole.format(TIMESTAMP_FORMAT).to_string()
    } else {
        format!("{}.{:03}", whole.format(TIMESTAMP_FORMAT), millis)
    }
}

/// Parses a value from the `timestamp` column.
///
/// # Errors
///
/// Returns `StoreError::Timestamp` if the text is not in the column layout.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::Timestamp(s.to_string()))
}
