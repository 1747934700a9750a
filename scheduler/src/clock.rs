//! Clock discipline
//!
//! Keeps the local frame number in step with the transceiver. A local
//! periodic timer drives the frame scheduler once per TDMA frame, clock
//! indications from the transceiver correct its phase. Losing the
//! transceiver clock is fatal to the BTS.
//!
//! The engine never reads the system clock or sleeps itself; every event
//! carries the monotonic time it happened at. The runtime waits for
//! [`ClockEngine::deadline`] and feeds [`ClockEvent::TimerExpired`] back.

use crate::timer::{FrameTimer, Timestamp};
use crate::{ClockError, FrameScheduler, SchedError};
use common::time::FN_DURATION_NS;
use common::FrameNumber;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Clock discipline tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Nominal TDMA frame duration in nanoseconds
    pub fn_duration_ns: u64,
    /// Time to wait for the first clock indication after start
    pub startup_timeout_ms: u64,
    /// Timer periods without a clock indication before the clock is lost
    pub loss_frames: u32,
    /// Largest FN difference corrected without re-synchronizing
    pub max_fn_skew: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fn_duration_ns: FN_DURATION_NS,
            startup_timeout_ms: 3000,
            loss_frames: 400,
            max_fn_skew: 50,
        }
    }
}

impl ClockConfig {
    /// Period of the frame timer
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.fn_duration_ns)
    }

    /// Frame duration in whole microseconds, as used in error arithmetic
    pub fn fn_duration_us(&self) -> i64 {
        (self.fn_duration_ns / 1000) as i64
    }

    /// Reject tunables that would lose the clock on the first tick
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.fn_duration_ns < 1000 {
            return Err(SchedError::InvalidConfiguration(format!(
                "frame duration {} ns is below one microsecond", self.fn_duration_ns
            )));
        }
        if self.max_fn_skew == 0 {
            return Err(SchedError::InvalidConfiguration("max FN skew must be at least 1".into()));
        }
        if self.startup_timeout_ms > MAX_STARTUP_TIMEOUT_MS {
            return Err(SchedError::InvalidConfiguration(format!(
                "startup timeout {} ms exceeds {} ms", self.startup_timeout_ms, MAX_STARTUP_TIMEOUT_MS
            )));
        }
        Ok(())
    }
}

/// Upper bound for the startup timeout, one hour
pub const MAX_STARTUP_TIMEOUT_MS: u64 = 3_600_000;

/// Clock engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClockStatus {
    /// No clock expected
    Stopped,
    /// Transceiver started, startup timeout armed
    AwaitingFirstClock,
    /// Frame timer running
    Synchronized,
    /// Clock lost, BTS shut down
    Lost,
}

impl fmt::Display for ClockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClockStatus::Stopped => "stopped",
            ClockStatus::AwaitingFirstClock => "awaiting-first-clock",
            ClockStatus::Synchronized => "synchronized",
            ClockStatus::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Inputs of the clock engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Transceiver announced clock indications will start
    Start,
    /// Transceiver announced clock indications stopped
    Stop,
    /// The frame timer deadline passed
    TimerExpired,
    /// Clock indication with the transceiver's current FN
    ClockInd(FrameNumber),
}

/// A frame number and the time it was processed at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnTimestamp {
    pub fn_: FrameNumber,
    pub tv: Timestamp,
}

/// Synchronization state, reset whenever the clock (re)starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockState {
    /// Last frame dispatched by the local timer or catch-up
    pub last_fn_timer: FnTimestamp,
    /// Last clock indication
    pub last_clk_ind: FnTimestamp,
    /// Timer periods since the last clock indication
    pub fn_without_clock_ind: u32,
}

/// Local clock error measured between two clock indications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriftSample {
    pub elapsed_us: i64,
    pub elapsed_fn: i32,
    /// Local elapsed time minus the time the transceiver frames account for
    pub error_us: i64,
}

/// Clock engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClockCounters {
    /// Timer periods the process was not scheduled in time for
    pub dl_miss_fn: u64,
    /// Clock indications processed while synchronized
    pub clock_inds: u64,
    /// Re-synchronizations, including the first one
    pub resyncs: u64,
    /// Frames dispatched to catch up with the transceiver
    pub fn_caught_up: u64,
}

/// Owner of the BTS, notified when the clock is lost
pub trait BtsLifecycle: Send {
    fn shutdown(&mut self, reason: &str);
}

/// Clock discipline state machine
pub struct ClockEngine {
    config: ClockConfig,
    status: ClockStatus,
    state: ClockState,
    timer: FrameTimer,
    counters: ClockCounters,
    drift: Option<DriftSample>,
    lifecycle: Box<dyn BtsLifecycle>,
}

impl ClockEngine {
    pub fn new(config: ClockConfig, lifecycle: Box<dyn BtsLifecycle>) -> Self {
        Self {
            config,
            status: ClockStatus::Stopped,
            state: ClockState::default(),
            timer: FrameTimer::new(),
            counters: ClockCounters::default(),
            drift: None,
            lifecycle,
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn status(&self) -> ClockStatus {
        self.status
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    pub fn counters(&self) -> &ClockCounters {
        &self.counters
    }

    /// Latest drift measurement
    pub fn drift(&self) -> Option<DriftSample> {
        self.drift
    }

    /// When the runtime has to deliver the next `TimerExpired`
    pub fn deadline(&self) -> Option<Timestamp> {
        self.timer.deadline()
    }

    /// Process one event that happened at `now`.
    ///
    /// Frames due are dispatched to `sched` before returning. Returns
    /// `ClockError::ClockLost` when this event made the engine lose the clock.
    pub fn handle<S: FrameScheduler + ?Sized>(
        &mut self,
        ev: ClockEvent,
        now: Timestamp,
        sched: &mut S,
    ) -> Result<(), ClockError> {
        match ev {
            ClockEvent::Start => self.clock_started(now),
            ClockEvent::Stop => {
                self.clock_stopped();
                Ok(())
            }
            ClockEvent::TimerExpired => self.timer_expired(now, sched),
            ClockEvent::ClockInd(fn_) => self.clock_ind(fn_, now, sched),
        }
    }

    fn clock_started(&mut self, now: Timestamp) -> Result<(), ClockError> {
        if self.status == ClockStatus::Lost {
            return Err(ClockError::InvalidState("clock was lost, BTS is shutting down".into()));
        }

        info!("GSM clock started, waiting for clock indications");
        self.state = ClockState::default();
        self.drift = None;
        self.timer.arm_oneshot(now + Duration::from_millis(self.config.startup_timeout_ms));
        self.status = ClockStatus::AwaitingFirstClock;
        Ok(())
    }

    fn clock_stopped(&mut self) {
        info!("GSM clock stopped");
        self.timer.disarm();
        if self.status != ClockStatus::Lost {
            self.status = ClockStatus::Stopped;
        }
    }

    fn timer_expired<S: FrameScheduler + ?Sized>(
        &mut self,
        now: Timestamp,
        sched: &mut S,
    ) -> Result<(), ClockError> {
        let expire_count = self.timer.expire(now);
        if expire_count == 0 {
            return Ok(());
        }

        match self.status {
            ClockStatus::AwaitingFirstClock => {
                return Err(self.lose_clock("No clock since TRX was started"));
            }
            ClockStatus::Synchronized => {}
            ClockStatus::Stopped | ClockStatus::Lost => return Ok(()),
        }

        if expire_count > 1 {
            warn!("FN timer expire_count={}: We missed {} timers", expire_count, expire_count - 1);
            self.counters.dl_miss_fn += expire_count - 1;
        }

        // the threshold itself is still allowed, the next period is not
        let without_ind = self.state.fn_without_clock_ind;
        self.state.fn_without_clock_ind += 1;
        if without_ind == self.config.loss_frames {
            warn!("No more clock from transceiver");
            return Err(self.lose_clock("No clock from transceiver"));
        }

        let elapsed_us = now.micros_since(self.state.last_fn_timer.tv);
        let fn_duration_us = self.config.fn_duration_us();
        let error_us = elapsed_us - fn_duration_us;
        self.state.last_fn_timer.tv = now;

        // someone played with the clock, or the process stalled
        if elapsed_us > fn_duration_us * self.config.max_fn_skew as i64 || elapsed_us < 0 {
            error!("PC clock skew: elapsed_us={}, error_us={}", elapsed_us, error_us);
            return Err(self.lose_clock("No clock from transceiver"));
        }

        for _ in 0..expire_count {
            self.state.last_fn_timer.fn_.inc();
            sched.sched_fn(self.state.last_fn_timer.fn_);
        }
        Ok(())
    }

    fn clock_ind<S: FrameScheduler + ?Sized>(
        &mut self,
        fn_: FrameNumber,
        now: Timestamp,
        sched: &mut S,
    ) -> Result<(), ClockError> {
        match self.status {
            ClockStatus::AwaitingFirstClock => {
                info!("First clock indication: fn={}", fn_);
                self.setup_clock(fn_, now, sched);
                self.status = ClockStatus::Synchronized;
                return Ok(());
            }
            ClockStatus::Synchronized => {}
            ClockStatus::Stopped | ClockStatus::Lost => {
                debug!("Ignoring clock indication fn={} while {}", fn_, self.status);
                return Ok(());
            }
        }

        self.counters.clock_inds += 1;
        self.state.fn_without_clock_ind = 0;

        let fn_duration_us = self.config.fn_duration_us();

        // negative: the local timer already processed more frames than the
        // transceiver reports; positive: backlog left to process
        let elapsed_us = now.micros_since(self.state.last_fn_timer.tv);
        let elapsed_fn = fn_.delta(self.state.last_fn_timer.fn_);

        let last_ind = self.state.last_clk_ind;
        let elapsed_us_since_clk = now.micros_since(last_ind.tv);
        let elapsed_fn_since_clk = fn_.delta(last_ind.fn_);
        let error_us = elapsed_us_since_clk - fn_duration_us * elapsed_fn_since_clk as i64;
        info!("TRX Clock Ind: elapsed_us={:7}, elapsed_fn={:3}, error_us={:+5}",
              elapsed_us_since_clk, elapsed_fn_since_clk, error_us);
        self.drift = Some(DriftSample {
            elapsed_us: elapsed_us_since_clk,
            elapsed_fn: elapsed_fn_since_clk,
            error_us,
        });

        self.state.last_clk_ind = FnTimestamp { fn_, tv: now };

        if elapsed_fn.unsigned_abs() > self.config.max_fn_skew {
            warn!("GSM clock skew: old fn={}, new fn={}", self.state.last_fn_timer.fn_, fn_);
            self.setup_clock(fn_, now, sched);
            return Ok(());
        }

        debug!("GSM clock jitter: {}us (elapsed_fn={})",
               elapsed_fn as i64 * fn_duration_us - elapsed_us, elapsed_fn);

        if elapsed_fn < 0 {
            // next tick when the frame after the last processed one is due
            let excess = (-elapsed_fn) as u32;
            let first = now + self.config.period() * (1 + excess);
            warn!("We were {} FN faster than TRX, compensating", excess);
            self.timer.arm_periodic(first, self.config.period());
            return Ok(());
        }

        let mut fn_caught_up = 0u32;
        while self.state.last_fn_timer.fn_ != fn_ {
            self.state.last_fn_timer.fn_.inc();
            sched.sched_fn(self.state.last_fn_timer.fn_);
            fn_caught_up += 1;
        }

        if fn_caught_up > 0 {
            warn!("We were {} FN slower than TRX, compensated", elapsed_fn);
            self.counters.fn_caught_up += fn_caught_up as u64;
            self.state.last_fn_timer.tv = now;
        }
        Ok(())
    }

    /// Restart the local clock at `fn_`: dispatch it and start the frame timer
    fn setup_clock<S: FrameScheduler + ?Sized>(&mut self, fn_: FrameNumber, now: Timestamp, sched: &mut S) {
        self.counters.resyncs += 1;
        self.state.last_fn_timer.fn_ = fn_;
        sched.sched_fn(fn_);

        self.timer.arm_periodic(now + self.config.period(), self.config.period());

        self.state.last_fn_timer.tv = now;
        self.state.last_clk_ind = FnTimestamp { fn_, tv: now };
    }

    fn lose_clock(&mut self, reason: &str) -> ClockError {
        error!("{}", reason);
        self.timer.disarm();
        self.status = ClockStatus::Lost;
        self.lifecycle.shutdown(reason);
        ClockError::ClockLost(reason.to_string())
    }
}

impl fmt::Debug for ClockEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockEngine")
            .field("config", &self.config)
            .field("status", &self.status)
            .field("state", &self.state)
            .field("timer", &self.timer)
            .field("counters", &self.counters)
            .field("drift", &self.drift)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLifecycle;

    const P: i64 = FN_DURATION_NS as i64;
    const T0: i64 = 1_000_000_000;

    fn at(offset_ns: i64) -> Timestamp {
        Timestamp::from_nanos(T0 + offset_ns)
    }

    fn fns(range: impl IntoIterator<Item = u32>) -> Vec<FrameNumber> {
        range.into_iter().map(FrameNumber::new).collect()
    }

    struct Harness {
        engine: ClockEngine,
        lifecycle: MockLifecycle,
        frames: Vec<FrameNumber>,
    }

    impl Harness {
        fn new() -> Self {
            let lifecycle = MockLifecycle::default();
            let engine = ClockEngine::new(ClockConfig::default(), Box::new(lifecycle.clone()));
            Self { engine, lifecycle, frames: Vec::new() }
        }

        /// Started at T0 and synchronized at `fn_` at T0
        fn synced(fn_: u32) -> Self {
            let mut h = Self::new();
            h.event(ClockEvent::Start, at(0)).unwrap();
            h.event(ClockEvent::ClockInd(FrameNumber::new(fn_)), at(0)).unwrap();
            h
        }

        fn event(&mut self, ev: ClockEvent, now: Timestamp) -> Result<(), ClockError> {
            self.engine.handle(ev, now, &mut self.frames)
        }

        fn fire(&mut self, now: Timestamp) -> Result<(), ClockError> {
            self.event(ClockEvent::TimerExpired, now)
        }

        fn ind(&mut self, fn_: u32, now: Timestamp) -> Result<(), ClockError> {
            self.event(ClockEvent::ClockInd(FrameNumber::new(fn_)), now)
        }
    }

    #[test]
    fn test_config_defaults() {
        let cfg = ClockConfig::default();
        assert_eq!(cfg.period(), Duration::from_nanos(4_615_384));
        assert_eq!(cfg.fn_duration_us(), 4615);
        assert_eq!(cfg.loss_frames, 400);
        assert_eq!(cfg.max_fn_skew, 50);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_first_clock_synchronizes() {
        let mut h = Harness::new();
        assert_eq!(h.engine.status(), ClockStatus::Stopped);

        h.event(ClockEvent::Start, at(0)).unwrap();
        assert_eq!(h.engine.status(), ClockStatus::AwaitingFirstClock);
        assert_eq!(h.engine.deadline(), Some(at(3_000_000_000)));

        h.ind(1000, at(1_000_000)).unwrap();
        assert_eq!(h.engine.status(), ClockStatus::Synchronized);
        assert_eq!(h.frames, fns([1000]));
        assert_eq!(h.engine.deadline(), Some(at(1_000_000 + P)));
        assert_eq!(h.engine.state().last_fn_timer.fn_, FrameNumber::new(1000));
        assert_eq!(h.engine.state().last_clk_ind.tv, at(1_000_000));
    }

    #[test]
    fn test_steady_state_dispatches_each_frame_once() {
        let mut h = Harness::synced(100);

        for i in 1..=300i64 {
            h.fire(at(i * P)).unwrap();
            // transceiver reports the same frame shortly after the tick
            h.ind(100 + i as u32, at(i * P + 200_000)).unwrap();
        }

        assert_eq!(h.frames, fns(100..=400));
        assert_eq!(h.engine.counters().dl_miss_fn, 0);
        assert_eq!(h.engine.counters().fn_caught_up, 0);
        assert_eq!(h.engine.state().fn_without_clock_ind, 0);
        assert_eq!(h.lifecycle.count(), 0);
    }

    #[test]
    fn test_sparse_indications_keep_timer_running() {
        let mut h = Harness::synced(0);

        for i in 1..=1000i64 {
            h.fire(at(i * P)).unwrap();
            if i % 216 == 0 {
                h.ind(i as u32, at(i * P + 10_000)).unwrap();
            }
        }
        assert_eq!(h.frames, fns(0..=1000));
        assert_eq!(h.engine.status(), ClockStatus::Synchronized);
    }

    #[test]
    fn test_startup_timeout() {
        let mut h = Harness::new();
        h.event(ClockEvent::Start, at(0)).unwrap();

        // not due yet
        h.fire(at(2_999_000_000)).unwrap();
        assert_eq!(h.engine.status(), ClockStatus::AwaitingFirstClock);

        let err = h.fire(at(3_000_000_000)).unwrap_err();
        assert_eq!(err, ClockError::ClockLost("No clock since TRX was started".into()));
        assert_eq!(h.engine.status(), ClockStatus::Lost);
        assert_eq!(h.engine.deadline(), None);
        assert_eq!(h.lifecycle.count(), 1);

        // nothing more happens once lost
        h.fire(at(4_000_000_000)).unwrap();
        h.ind(5, at(4_000_000_000)).unwrap();
        assert!(h.frames.is_empty());
        assert_eq!(h.lifecycle.count(), 1);
        assert_eq!(h.lifecycle.reasons.lock().unwrap()[0], "No clock since TRX was started");
    }

    #[test]
    fn test_clock_lost_after_loss_threshold() {
        let mut h = Harness::synced(0);

        for i in 1..=400i64 {
            h.fire(at(i * P)).unwrap();
        }
        assert_eq!(h.engine.status(), ClockStatus::Synchronized);
        assert_eq!(h.engine.state().fn_without_clock_ind, 400);

        let err = h.fire(at(401 * P)).unwrap_err();
        assert_eq!(err, ClockError::ClockLost("No clock from transceiver".into()));
        assert_eq!(h.frames.len(), 401);
        assert_eq!(h.lifecycle.count(), 1);
        assert_eq!(h.engine.deadline(), None);
    }

    #[test]
    fn test_large_skew_resynchronizes() {
        let mut h = Harness::synced(100);

        h.ind(160, at(2 * P)).unwrap();
        assert_eq!(h.frames, fns([100, 160]));
        assert_eq!(h.engine.state().last_fn_timer.fn_, FrameNumber::new(160));
        assert_eq!(h.engine.deadline(), Some(at(3 * P)));
        assert_eq!(h.engine.counters().resyncs, 2);

        // skew backwards is handled the same way
        h.ind(100, at(3 * P)).unwrap();
        assert_eq!(h.frames, fns([100, 160, 100]));
    }

    #[test]
    fn test_skew_threshold_is_inclusive() {
        let mut h = Harness::synced(100);
        h.ind(150, at(50 * P)).unwrap();
        assert_eq!(h.frames, fns(100..=150));
        assert_eq!(h.engine.counters().resyncs, 1);
    }

    #[test]
    fn test_backlog_is_caught_up() {
        let mut h = Harness::synced(100);
        let now = at(10 * P + 3_000);

        h.ind(110, now).unwrap();
        assert_eq!(h.frames, fns(100..=110));
        assert_eq!(h.engine.counters().fn_caught_up, 10);
        assert_eq!(h.engine.state().last_fn_timer.tv, now);
    }

    #[test]
    fn test_backlog_across_wrap() {
        let last = FrameNumber::HYPERFRAME - 3;
        let mut h = Harness::synced(last);

        h.ind(2, at(5 * P)).unwrap();
        let expected = fns([last, last + 1, last + 2, 0, 1, 2]);
        assert_eq!(h.frames, expected);
    }

    #[test]
    fn test_ahead_of_transceiver_delays_timer() {
        let mut h = Harness::synced(100);
        for i in 1..=3i64 {
            h.fire(at(i * P)).unwrap();
        }
        assert_eq!(h.frames, fns(100..=103));

        let now = at(3 * P + 100_000);
        h.ind(101, now).unwrap();
        // no dispatch, FN kept, next tick postponed by the two excess frames
        assert_eq!(h.frames, fns(100..=103));
        assert_eq!(h.engine.state().last_fn_timer.fn_, FrameNumber::new(103));
        assert_eq!(h.engine.deadline(), Some(now + Duration::from_nanos(3 * P as u64)));

        // old deadline does not fire any more
        h.fire(at(4 * P)).unwrap();
        assert_eq!(h.frames.len(), 4);
    }

    #[test]
    fn test_missed_timer_periods_are_counted() {
        let mut h = Harness::synced(100);

        h.fire(at(3 * P)).unwrap();
        assert_eq!(h.engine.counters().dl_miss_fn, 2);
        assert_eq!(h.frames, fns(100..=103));
        assert_eq!(h.engine.deadline(), Some(at(4 * P)));
    }

    #[test]
    fn test_wall_clock_jump_loses_clock() {
        let mut h = Harness::synced(100);

        let err = h.fire(at(60 * P)).unwrap_err();
        assert!(matches!(err, ClockError::ClockLost(_)));
        assert_eq!(h.engine.status(), ClockStatus::Lost);
        assert_eq!(h.frames, fns([100]));
        assert_eq!(h.lifecycle.count(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut h = Harness::synced(100);

        h.event(ClockEvent::Stop, at(P / 2)).unwrap();
        assert_eq!(h.engine.status(), ClockStatus::Stopped);
        assert_eq!(h.engine.deadline(), None);
        h.event(ClockEvent::Stop, at(P)).unwrap();
        assert_eq!(h.engine.status(), ClockStatus::Stopped);

        // no dispatch after stop
        h.fire(at(2 * P)).unwrap();
        h.ind(102, at(2 * P)).unwrap();
        assert_eq!(h.frames, fns([100]));

        // restart waits for a fresh first indication
        h.event(ClockEvent::Start, at(3 * P)).unwrap();
        assert_eq!(h.engine.state(), &ClockState::default());
        h.ind(500, at(4 * P)).unwrap();
        assert_eq!(h.frames, fns([100, 500]));
    }

    #[test]
    fn test_start_after_loss_is_rejected() {
        let mut h = Harness::new();
        h.event(ClockEvent::Start, at(0)).unwrap();
        h.fire(at(3_000_000_000)).unwrap_err();

        let err = h.event(ClockEvent::Start, at(3_100_000_000)).unwrap_err();
        assert!(matches!(err, ClockError::InvalidState(_)));
        h.event(ClockEvent::Stop, at(3_200_000_000)).unwrap();
        assert_eq!(h.engine.status(), ClockStatus::Lost);
        assert_eq!(h.lifecycle.count(), 1);
    }

    #[test]
    fn test_drift_sample() {
        let mut h = Harness::synced(0);
        assert_eq!(h.engine.drift(), None);

        // 216 frames later plus 500 us of local clock excess
        h.ind(216, at(216 * P + 500_000)).unwrap();
        let drift = h.engine.drift().unwrap();
        assert_eq!(drift.elapsed_fn, 216);
        assert_eq!(drift.elapsed_us, 997_422);
        assert_eq!(drift.error_us, 582);
    }
}
