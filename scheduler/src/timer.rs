//! Monotonic timestamps and the frame timer
//!
//! `FrameTimer` follows timerfd semantics: it is armed with a first expiry
//! and an optional interval, and reading it reports how many expirations
//! happened since the last read. The scheduler never sleeps on it directly;
//! the runtime waits for `deadline()` and then feeds the expiry back in.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Monotonic time in nanoseconds since an arbitrary epoch.
///
/// Differences are signed so that a clock going backwards can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub const fn from_micros(us: i64) -> Self {
        Self(us * 1000)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Signed microseconds elapsed from `earlier` to `self`
    pub fn micros_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0) / 1000
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let ns = i64::try_from(rhs.as_nanos()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(ns))
    }
}

impl Sub for Timestamp {
    type Output = i64;

    /// Signed nanoseconds between two timestamps
    fn sub(self, rhs: Timestamp) -> i64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0.div_euclid(1_000_000_000), self.0.rem_euclid(1_000_000_000))
    }
}

/// One-shot or periodic timer driven by explicit timestamps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameTimer {
    deadline: Option<Timestamp>,
    interval: Option<Duration>,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for a single expiry at `at`
    pub fn arm_oneshot(&mut self, at: Timestamp) {
        self.deadline = Some(at);
        self.interval = None;
    }

    /// Arm for a first expiry at `first`, then every `interval`
    pub fn arm_periodic(&mut self, first: Timestamp, interval: Duration) {
        self.deadline = Some(first);
        self.interval = if interval.is_zero() { None } else { Some(interval) };
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Next expiry, if armed
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Consume the expirations that happened up to `now`.
    ///
    /// Returns 0 when the timer is disarmed or not yet due. A periodic timer
    /// is advanced past `now`; a one-shot timer disarms itself.
    pub fn expire(&mut self, now: Timestamp) -> u64 {
        let deadline = match self.deadline {
            Some(deadline) if now >= deadline => deadline,
            _ => return 0,
        };

        match self.interval {
            None => {
                self.deadline = None;
                1
            }
            Some(interval) => {
                let step = interval.as_nanos() as i64;
                let count = 1 + (now - deadline) / step;
                self.deadline = Some(Timestamp(deadline.0 + count * step));
                count as u64
            }
        }
    }
}
