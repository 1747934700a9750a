//! Frame dispatcher
//!
//! Processes one TDMA frame for all carriers: asks the upper layer for the
//! downlink bursts of every timeslot, routes hopping timeslots to the carrier
//! currently on their frequency, hands the bursts to the transceiver and
//! keeps C0 on air with dummy bursts. Also routes uplink bursts back to the
//! logical carrier they belong to.

use crate::meas::{MeasAvgMode, MeasSet};
use crate::topology::{Bts, C0};
use crate::{FrameScheduler, L1Scheduler, SchedError};
use bytes::Bytes;
use common::{ubits_to_string, FrameNumber, Tn, TrxId, GSM_BURST_LEN};
use interfaces::{DlBurstReq, Transceiver, UlBurstInd};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

/// Dummy burst, 3GPP TS 45.002 5.2.6
pub const DUMMY_BURST: [u8; GSM_BURST_LEN] = [
    0, 0, 0,
    1, 1, 1, 1, 1, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 1, 0, 0, 1, 1, 1, 0,
    0, 0, 0, 0, 1, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 0, 0, 0, 1, 1, 1, 0, 0,
    0, 1, 0, 1, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 0, 0, 0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 0,
    0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 0, 1, 0, 0, 1, 1, 1, 1, 1, 0, 0, 0, 1,
    0, 0, 1, 0, 1, 1, 1, 1, 1, 0, 1, 0, 1, 0,
    0, 0, 0,
];

/// Frame advance configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Frames a burst is handed to the transceiver ahead of its air time
    pub fn_advance: u32,
    /// Additional frames the upper layer is asked ahead of `fn_advance`
    pub rts_advance: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fn_advance: 2,
            rts_advance: 3,
        }
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    /// Frames processed
    pub frames: u64,
    /// Bursts from the upper layer handed to the transceiver
    pub dl_bursts: u64,
    /// Dummy bursts sent on C0
    pub dummy_bursts: u64,
    /// Downlink bursts dropped because no carrier serves the hopping frequency
    pub dl_fh_no_carrier: u64,
    /// Uplink bursts delivered to the upper layer
    pub ul_bursts: u64,
    /// Uplink bursts dropped because no hopping timeslot claimed them
    pub ul_fh_no_carrier: u64,
    /// Uplink bursts dropped for naming an unknown carrier or timeslot
    pub ul_invalid: u64,
}

/// Per-frame burst dispatcher
pub struct Dispatcher<T: Transceiver, L: L1Scheduler> {
    config: DispatchConfig,
    bts: Bts,
    trx_if: T,
    l1: L,
    counters: DispatchCounters,
    dummy: Bytes,
}

impl<T: Transceiver, L: L1Scheduler> Dispatcher<T, L> {
    pub fn new(config: DispatchConfig, bts: Bts, trx_if: T, l1: L) -> Self {
        Self {
            config,
            bts,
            trx_if,
            l1,
            counters: DispatchCounters::default(),
            dummy: Bytes::from_static(&DUMMY_BURST),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn bts(&self) -> &Bts {
        &self.bts
    }

    pub fn bts_mut(&mut self) -> &mut Bts {
        &mut self.bts
    }

    pub fn transceiver(&self) -> &T {
        &self.trx_if
    }

    pub fn l1(&self) -> &L {
        &self.l1
    }

    pub fn counters(&self) -> &DispatchCounters {
        &self.counters
    }

    /// Schedule all timeslots of all carriers for frame `fn_`
    pub fn dispatch(&mut self, fn_: FrameNumber) {
        let mut c0_mask: u8 = 0;

        self.l1.time_ind(fn_);
        self.counters.frames += 1;

        // bursts go to the transceiver ahead of time
        let sched_fn = fn_.add(self.config.fn_advance);
        let rts_fn = sched_fn.add(self.config.rts_advance);

        for trx in 0..self.bts.num_trx() {
            // we don't schedule if power is off
            if !self.trx_if.is_powered(trx) {
                continue;
            }

            for tn in Tn::all() {
                self.l1.rts(trx, tn, rts_fn);

                let burst = match self.l1.dl_burst(trx, tn, sched_fn) {
                    Some(burst) if !burst.bits.is_empty() => burst,
                    _ => continue,
                };

                let mut dst = trx;
                if self.bts.ts(trx, tn).is_some_and(|ts| ts.hopping.enabled()) {
                    match self.bts.resolve_downlink(trx, tn, sched_fn) {
                        Some(resolved) => dst = resolved,
                        None => {
                            if let Some(ts) = self.bts.ts(trx, tn) {
                                error!("Failed to find the transceiver for a downlink burst \
                                        (trx={}, fn={}, tn={}, hsn={}, maio={}, ma_len={})",
                                       trx, sched_fn, tn, ts.hopping.hsn(), ts.hopping.maio(),
                                       ts.hopping.arfcn_list().len());
                            }
                            self.counters.dl_fh_no_carrier += 1;
                            continue;
                        }
                    }
                }

                let mut att = burst.att;
                if dst == C0 {
                    c0_mask |= 1 << tn.0;
                    // C0 always transmits at full power
                    att = 0;
                }

                let br = DlBurstReq::new(sched_fn, tn, att, burst.bits);
                trace!("TX trx={} fn={} tn={} att={} {}",
                       dst, sched_fn, tn, att, ubits_to_string(&br.burst));
                self.trx_if.send_burst(dst, &br);
                self.counters.dl_bursts += 1;
            }
        }

        // send dummy bursts on inactive timeslots of C0
        for tn in Tn::all() {
            if c0_mask & (1 << tn.0) != 0 {
                continue;
            }
            let br = DlBurstReq::new(sched_fn, tn, 0, self.dummy.clone());
            self.trx_if.send_burst(C0, &br);
            self.counters.dummy_bursts += 1;
        }

        debug!("Dispatched fn={} (tx fn={}, C0 mask={:#04x})", fn_, sched_fn, c0_mask);
    }

    /// Route an uplink burst received on `src_trx` to its logical carrier.
    ///
    /// Records the burst measurements in the timeslot's history and hands the
    /// burst to the upper layer. Returns the carrier it was delivered to.
    pub fn route_burst_ind(&mut self, src_trx: TrxId, bi: UlBurstInd) -> Result<TrxId, SchedError> {
        let ts = match self.bts.ts(src_trx, bi.tn) {
            Some(ts) => ts,
            None => {
                self.counters.ul_invalid += 1;
                if src_trx >= self.bts.num_trx() {
                    return Err(SchedError::InvalidTrx(src_trx));
                }
                return Err(SchedError::InvalidTimeslot { trx: src_trx, tn: bi.tn });
            }
        };

        // no frequency hopping => nothing to do
        let dst = if !ts.hopping.enabled() {
            src_trx
        } else {
            match self.bts.resolve_uplink(&bi, src_trx) {
                Some(dst) => dst,
                None => {
                    debug!("Failed to find the transceiver for an uplink burst \
                            (src trx={}, fn={}, tn={})", src_trx, bi.fn_, bi.tn);
                    self.counters.ul_fh_no_carrier += 1;
                    return Err(SchedError::NoCarrier { trx: src_trx, tn: bi.tn, fn_: bi.fn_ });
                }
            }
        };

        if let Some(ts) = self.bts.ts_mut(dst, bi.tn) {
            ts.meas.push(&bi);
        }

        self.l1.ul_burst(dst, &bi);
        self.counters.ul_bursts += 1;
        Ok(dst)
    }

    /// Averaged uplink measurements of a timeslot
    pub fn meas_avg(&self, trx: TrxId, tn: Tn, mode: MeasAvgMode) -> Option<MeasSet> {
        self.bts.ts(trx, tn).map(|ts| ts.meas.avg(mode))
    }
}

impl<T: Transceiver, L: L1Scheduler> FrameScheduler for Dispatcher<T, L> {
    fn sched_fn(&mut self, fn_: FrameNumber) {
        self.dispatch(fn_);
    }
}
