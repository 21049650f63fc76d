//! Export time ranges and RFC 3339 parsing.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum export range: 10 minutes, in milliseconds.
pub const MAX_EXPORT_RANGE_MS: i64 = 10 * 60 * 1000;

/// Time range error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeRangeError {
    #[error("Invalid timestamp '{0}': expected RFC 3339")]
    InvalidTimestamp(String),

    #[error("End time must be after start time")]
    EndNotAfterStart,
}

/// A half-open export range `[start, end)` in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    /// Create a range, requiring `end > start`.
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self, TimeRangeError> {
        if end_ms <= start_ms {
            return Err(TimeRangeError::EndNotAfterStart);
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Parse a range from two RFC 3339 timestamps.
    pub fn from_rfc3339(start: &str, end: &str) -> Result<Self, TimeRangeError> {
        Self::new(parse_rfc3339_ms(start)?, parse_rfc3339_ms(end)?)
    }

    /// Range duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Whether the range exceeds the given cap.
    pub fn exceeds(&self, max_ms: i64) -> bool {
        self.duration_ms() > max_ms
    }

    /// Fraction of the range covered at `ts_ms`, clamped to `[0, 1]`.
    pub fn progress_at(&self, ts_ms: i64) -> f32 {
        let done = (ts_ms - self.start_ms) as f64 / self.duration_ms() as f64;
        done.clamp(0.0, 1.0) as f32
    }
}

/// Parse an RFC 3339 timestamp into Unix milliseconds.
pub fn parse_rfc3339_ms(ts: &str) -> Result<i64, TimeRangeError> {
    DateTime::parse_from_rfc3339(ts.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| TimeRangeError::InvalidTimestamp(ts.to_string()))
}
