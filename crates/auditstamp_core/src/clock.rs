//! Time source for audit stamps.
//!
//! # Invariants
//! - All values are UTC.
//! - Values are truncated to whole milliseconds, the storage resolution, so
//!   an in-memory stamp equals the value read back after commit.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;

/// Wall-clock provider used once per flush.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic callers and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts at the given epoch milliseconds; falls back to the epoch when
    /// the value is out of range.
    pub fn starting_at_millis(epoch_ms: i64) -> Self {
        Self::new(from_epoch_millis(epoch_ms).unwrap_or_default())
    }

    pub fn set(&self, value: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = value;
    }

    pub fn advance(&self, step: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += step;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drops sub-millisecond precision.
pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    from_epoch_millis(value.timestamp_millis()).unwrap_or(value)
}

pub fn to_epoch_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub fn from_epoch_millis(epoch_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(epoch_ms).single()
}

#[cfg(test)]
mod tests {
    use super::{from_epoch_millis, truncate_to_millis, Clock, ManualClock};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn truncation_keeps_whole_milliseconds() {
        let precise = Utc
            .timestamp_opt(1_700_000_000, 123_456_789)
            .single()
            .expect("valid timestamp");
        let truncated = truncate_to_millis(precise);
        assert_eq!(truncated.timestamp_millis(), precise.timestamp_millis());
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at_millis(1_000);
        clock.advance(Duration::milliseconds(250));
        assert_eq!(clock.now_utc(), from_epoch_millis(1_250).expect("in range"));

        let reset = from_epoch_millis(10).expect("in range");
        clock.set(reset);
        assert_eq!(clock.now_utc(), reset);
    }
}
