use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::types::TimeRangeInput;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Base58 account address, 32 to 44 characters.
pub fn is_valid_address(addr: &str) -> bool {
    (32..=44).contains(&addr.len()) && addr.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// `ABCD...WXYZ` form used as node labels.
pub fn shorten_address(addr: &str) -> String {
    if addr.len() <= 10 || !addr.is_ascii() {
        return addr.to_string();
    }
    format!("{}...{}", &addr[..4], &addr[addr.len() - 4..])
}

/// Inclusive time window, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn parse(input: &TimeRangeInput) -> Result<Self, PipelineError> {
        let start = parse_timestamp(&input.start, "start")?;
        let end = parse_timestamp(&input.end, "end")?;
        if start > end {
            return Err(PipelineError::InvalidTimeRange(
                "start must not be after end".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Both bounds are inclusive.
    pub fn contains_ms(&self, ts_ms: i64) -> bool {
        self.start_ms() <= ts_ms && ts_ms <= self.end_ms()
    }

    pub fn span(&self) -> chrono::Duration {
        self.end - self.start
    }
}

fn parse_timestamp(raw: &str, which: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::InvalidTimeRange(format!("{which} is not ISO-8601 ({e})")))
}
