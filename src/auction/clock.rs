//! Simulation Clock
//!
//! Millisecond-resolution simulated time. Market data carries exchange
//! millisecond timestamps; every minute boundary in the engine is derived
//! from the helpers in this module. Wall-clock time is never read.

use std::fmt;

/// Milliseconds since Unix epoch (1970-01-01 00:00:00 UTC).
pub type TimestampMs = i64;

/// Conversion constants
pub const MILLIS_PER_SEC: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SEC;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Start of the minute containing `ts`.
///
/// Half-open: `[minute_start, minute_start + 60_000)`.
#[inline]
pub fn minute_floor(ts: TimestampMs) -> TimestampMs {
    ts.div_euclid(MILLIS_PER_MINUTE) * MILLIS_PER_MINUTE
}

/// Last millisecond belonging to the minute starting at `ts_min`.
///
/// Bar-close decisions are stamped with this time; anything used to fill
/// them must be strictly later.
#[inline]
pub fn minute_close_ts(ts_min: TimestampMs) -> TimestampMs {
    ts_min + MILLIS_PER_MINUTE - 1
}

/// Whole minutes elapsed from `from` to `to` (both minute-aligned).
#[inline]
pub fn minutes_between(from: TimestampMs, to: TimestampMs) -> i64 {
    (to - from).div_euclid(MILLIS_PER_MINUTE)
}

/// UTC day index of a timestamp, used for daily risk resets.
#[inline]
pub fn utc_day(ts: TimestampMs) -> i64 {
    ts.div_euclid(MILLIS_PER_DAY)
}

/// Monotonic simulation clock.
///
/// # Determinism Contract
/// - `now()` returns the current simulation time, never system time
/// - `advance_to()` only moves forward, panics on backward movement in debug builds
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    current: TimestampMs,
}

impl SimClock {
    #[inline]
    pub fn new(start_time: TimestampMs) -> Self {
        Self {
            current: start_time,
        }
    }

    #[inline]
    pub fn now(&self) -> TimestampMs {
        self.current
    }

    /// Start of the minute the clock is currently in.
    #[inline]
    pub fn current_minute(&self) -> TimestampMs {
        minute_floor(self.current)
    }

    /// Advance clock to a new time. Panics if time would go backward.
    #[inline]
    pub fn advance_to(&mut self, new_time: TimestampMs) {
        debug_assert!(
            new_time >= self.current,
            "SimClock: cannot go backward from {} to {}",
            self.current,
            new_time
        );
        self.current = new_time;
    }

    #[inline]
    pub fn is_past(&self, time: TimestampMs) -> bool {
        time < self.current
    }
}

impl fmt::Display for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp_millis(self.current) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ms", self.current),
        }
    }
}
