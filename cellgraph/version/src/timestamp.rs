//! Logical timestamps for mutation ordering.
//!
//! Every accepted mutation is stamped with a [`Timestamp`] that is strictly greater than any
//! timestamp previously issued by the same generator and than the latest timestamp of the
//! element it touches. With [`ClockMode::WallClock`] timestamps follow wall-clock milliseconds
//! and ties from a coarse clock are broken by bumping the previous value.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TimestampError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Create timestamp by a given raw value
    pub const fn with_ts(timestamp: u64) -> Self {
        Self(timestamp)
    }

    /// Returns the raw value of the timestamp.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of the base value for new timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockMode {
    /// Milliseconds since the Unix epoch, kept strictly increasing.
    #[default]
    WallClock,
    /// A plain counter starting at 1; deterministic, used by tests.
    Logical,
}

/// Generator of strictly increasing timestamps.
pub struct TimestampGenerator {
    /// The last issued timestamp
    last: AtomicU64,
    mode: ClockMode,
}

impl TimestampGenerator {
    /// Create a new timestamp generator
    pub fn new(mode: ClockMode) -> Self {
        Self::with_start(mode, 0)
    }

    /// Create a new timestamp generator that only issues values above `last`
    pub fn with_start(mode: ClockMode, last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
            mode,
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Generate the next timestamp
    pub fn next(&self) -> Result<Timestamp, TimestampError> {
        self.next_after(Timestamp::MIN)
    }

    /// Generate the next timestamp, which is also strictly greater than `floor`.
    pub fn next_after(&self, floor: Timestamp) -> Result<Timestamp, TimestampError> {
        let base = match self.mode {
            ClockMode::WallClock => wall_clock_millis(),
            ClockMode::Logical => 0,
        };
        let mut cur = self.last.load(Ordering::SeqCst);
        loop {
            let lower = cur.max(floor.raw());
            if lower == u64::MAX {
                return Err(TimestampError::Overflow(lower));
            }
            let candidate = base.max(lower + 1);
            match self.last.compare_exchange_weak(
                cur,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(Timestamp::with_ts(candidate)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Get the last issued timestamp without advancing
    pub fn current(&self) -> Timestamp {
        Timestamp::with_ts(self.last.load(Ordering::SeqCst))
    }

    /// Update the counter if the given timestamp is greater than the current value
    pub fn update_if_greater(&self, ts: Timestamp) {
        self.last.fetch_max(ts.raw(), Ordering::SeqCst);
    }
}

impl Default for TimestampGenerator {
    fn default() -> Self {
        Self::new(ClockMode::default())
    }
}

fn wall_clock_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
