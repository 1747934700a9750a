//! GSM TDMA Frame Scheduler Library
//!
//! This crate implements the real-time core of a transceiver-driven BTS:
//! the clock discipline that keeps the local frame number in step with the
//! transceiver, the per-frame burst dispatcher, frequency hopping routing and
//! uplink measurement averaging.

pub mod clock;
pub mod dispatch;
pub mod hopping;
pub mod meas;
pub mod runtime;
pub mod timer;
pub mod topology;

#[cfg(test)]
mod mock;

pub use clock::{BtsLifecycle, ClockConfig, ClockEngine, ClockEvent, ClockStatus};
pub use dispatch::{DispatchConfig, Dispatcher, DUMMY_BURST};
pub use hopping::HoppingParams;
pub use meas::{MeasAvgMode, MeasHistory, MeasSet};
pub use runtime::L1Runtime;
pub use timer::{FrameTimer, Timestamp};
pub use topology::{Bts, Timeslot, Trx, C0};

use bytes::Bytes;
use common::{FrameNumber, Tn, TrxId};
use interfaces::UlBurstInd;
use thiserror::Error;

/// Scheduler configuration and routing errors
#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid hopping parameters: {0}")]
    InvalidHopping(String),

    #[error("No such TRX: {0}")]
    InvalidTrx(TrxId),

    #[error("No such timeslot: trx={trx}, tn={tn}")]
    InvalidTimeslot { trx: TrxId, tn: Tn },

    #[error("No carrier for burst (trx={trx}, tn={tn}, fn={fn_})")]
    NoCarrier { trx: TrxId, tn: Tn, fn_: FrameNumber },
}

/// Clock discipline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Clock lost: {0}")]
    ClockLost(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Downlink burst produced by the upper layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlBurst {
    /// Unpacked burst bits; empty means nothing to send
    pub bits: Bytes,
    /// Requested transmit attenuation in dB
    pub att: u8,
}

/// Upper-layer per-timeslot scheduler
///
/// Produces downlink bursts and consumes uplink bursts of the logical
/// channels. Called from the frame dispatcher, so implementations must
/// return quickly.
pub trait L1Scheduler {
    /// A new frame is being processed
    fn time_ind(&mut self, _fn_: FrameNumber) {}

    /// Data for `fn_` on the given timeslot must be prepared now
    fn rts(&mut self, trx: TrxId, tn: Tn, fn_: FrameNumber);

    /// Burst to transmit in `fn_`, `None` when the timeslot is idle
    fn dl_burst(&mut self, trx: TrxId, tn: Tn, fn_: FrameNumber) -> Option<DlBurst>;

    /// Uplink burst routed to the given logical carrier
    fn ul_burst(&mut self, trx: TrxId, bi: &UlBurstInd);
}

/// Something that processes one TDMA frame at a time
pub trait FrameScheduler {
    fn sched_fn(&mut self, fn_: FrameNumber);
}
