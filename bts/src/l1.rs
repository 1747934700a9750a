//! Placeholder upper layer
//!
//! Fills the configured traffic timeslots with a frame-dependent bit
//! pattern so the transceiver sees real bursts next to the dummy bursts.

use bytes::Bytes;
use common::{FrameNumber, Tn, TrxId, GSM_BURST_LEN, TRX_NR_TS};
use interfaces::UlBurstInd;
use scheduler::{DlBurst, L1Scheduler};
use serde::Serialize;
use tracing::trace;

/// Counters of the placeholder upper layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternStats {
    pub rts: u64,
    pub dl_bursts: u64,
    pub ul_bursts: u64,
}

/// Upper layer that transmits a test pattern on active timeslots
#[derive(Debug)]
pub struct PatternL1 {
    /// Active timeslot mask and attenuation per carrier
    trx: Vec<(u8, u8)>,
    stats: PatternStats,
}

impl PatternL1 {
    /// `active` holds, per carrier, the traffic timeslots and the attenuation
    pub fn new(active: Vec<(Vec<u8>, u8)>) -> Self {
        let trx = active
            .into_iter()
            .map(|(tns, att)| {
                let mask = tns.iter()
                    .filter(|&&tn| (tn as usize) < TRX_NR_TS)
                    .fold(0u8, |mask, &tn| mask | (1 << tn));
                (mask, att)
            })
            .collect();
        Self { trx, stats: PatternStats::default() }
    }

    pub fn stats(&self) -> &PatternStats {
        &self.stats
    }

    fn is_active(&self, trx: TrxId, tn: Tn) -> Option<u8> {
        let (mask, att) = self.trx.get(trx)?;
        (mask.checked_shr(tn.0 as u32).unwrap_or(0) & 1 != 0).then_some(*att)
    }
}

/// Tail bits around a payload that encodes FN and TN
fn pattern_burst(fn_: FrameNumber, tn: Tn) -> Bytes {
    let seed = fn_.value() ^ ((tn.0 as u32) << 24);
    let bits: Vec<u8> = (0..GSM_BURST_LEN)
        .map(|i| {
            if i < 3 || i >= GSM_BURST_LEN - 3 {
                0
            } else {
                ((seed >> (i % 32)) & 1) as u8
            }
        })
        .collect();
    Bytes::from(bits)
}

impl L1Scheduler for PatternL1 {
    fn rts(&mut self, _trx: TrxId, _tn: Tn, _fn_: FrameNumber) {
        self.stats.rts += 1;
    }

    fn dl_burst(&mut self, trx: TrxId, tn: Tn, fn_: FrameNumber) -> Option<DlBurst> {
        let att = self.is_active(trx, tn)?;
        self.stats.dl_bursts += 1;
        Some(DlBurst { bits: pattern_burst(fn_, tn), att })
    }

    fn ul_burst(&mut self, trx: TrxId, bi: &UlBurstInd) {
        self.stats.ul_bursts += 1;
        trace!("UL burst trx={} fn={} tn={} rssi={} toa256={}",
               trx, bi.fn_, bi.tn, bi.rssi, bi.toa256);
    }
}
