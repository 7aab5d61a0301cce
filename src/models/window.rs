use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::error::TimelapseError;

/// A half-open analysis window `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeWindow {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, TimelapseError> {
        if start >= end {
            return Err(TimelapseError::invalid_window(format!(
                "Window start {} must be before end {}",
                format_utc(start),
                format_utc(end)
            )));
        }
        Ok(Self {
            start: start.to_offset(UtcOffset::UTC),
            end: end.to_offset(UtcOffset::UTC),
        })
    }

    /// The `days`-long window ending at `end`.
    pub fn trailing_days(end: OffsetDateTime, days: i64) -> Result<Self, TimelapseError> {
        if days <= 0 {
            return Err(TimelapseError::invalid_window(format!(
                "Window length must be positive, got {days} days"
            )));
        }
        let start = days
            .checked_mul(86_400)
            .map(Duration::seconds)
            .and_then(|span| end.checked_sub(span))
            .ok_or_else(|| {
                TimelapseError::invalid_window(format!("Window of {days} days is out of the supported date range"))
            })?;
        Self::new(start, end)
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Whole days covered, never less than one.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).whole_days().max(1)
    }
}

/// Serialized form of a window in every payload.
#[derive(Debug, Clone, Serialize)]
pub struct WindowRow {
    pub start: String,
    pub end: String,
}

impl From<&TimeWindow> for WindowRow {
    fn from(w: &TimeWindow) -> Self {
        Self {
            start: format_utc(w.start),
            end: format_utc(w.end),
        }
    }
}

/// Format a timestamp as RFC 3339 in UTC (`2026-02-01T06:00:00Z`).
pub fn format_utc(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(&Rfc3339).unwrap_or_else(|_| utc.to_string())
}

/// Parse an RFC 3339 timestamp and normalize it to UTC.
pub fn parse_utc(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
        .ok()
        .map(|ts| ts.to_offset(UtcOffset::UTC))
}

pub fn serialize_ts<S: Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_utc(*ts))
}

pub fn hours_between(earlier: OffsetDateTime, later: OffsetDateTime) -> f64 {
    (later - earlier).as_seconds_f64() / 3600.0
}
