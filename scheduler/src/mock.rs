//! Recording collaborators for tests

use crate::{BtsLifecycle, DlBurst, FrameScheduler, L1Scheduler};
use bytes::Bytes;
use common::{FrameNumber, Tn, TrxId, GSM_BURST_LEN};
use interfaces::{DlBurstReq, Transceiver, UlBurstInd};
use std::sync::{Arc, Mutex};

/// Upper layer that has bursts on a configured set of timeslots
#[derive(Debug, Default)]
pub struct MockL1 {
    pub active: Vec<(TrxId, Tn)>,
    pub att: u8,
    pub time_inds: Vec<FrameNumber>,
    pub rts: Vec<(TrxId, Tn, FrameNumber)>,
    pub dl_requests: Vec<(TrxId, Tn, FrameNumber)>,
    pub ul: Vec<(TrxId, UlBurstInd)>,
}

impl MockL1 {
    pub fn with_active(active: Vec<(TrxId, Tn)>) -> Self {
        Self { active, ..Default::default() }
    }
}

impl L1Scheduler for MockL1 {
    fn time_ind(&mut self, fn_: FrameNumber) {
        self.time_inds.push(fn_);
    }

    fn rts(&mut self, trx: TrxId, tn: Tn, fn_: FrameNumber) {
        self.rts.push((trx, tn, fn_));
    }

    fn dl_burst(&mut self, trx: TrxId, tn: Tn, fn_: FrameNumber) -> Option<DlBurst> {
        self.dl_requests.push((trx, tn, fn_));
        self.active.contains(&(trx, tn)).then(|| DlBurst {
            bits: Bytes::from(vec![1u8; GSM_BURST_LEN]),
            att: self.att,
        })
    }

    fn ul_burst(&mut self, trx: TrxId, bi: &UlBurstInd) {
        self.ul.push((trx, bi.clone()));
    }
}

/// Transport that records every burst
#[derive(Debug, Default)]
pub struct MockTrx {
    pub powered: Vec<bool>,
    pub sent: Vec<(TrxId, DlBurstReq)>,
}

impl MockTrx {
    pub fn powered(num_trx: usize) -> Self {
        Self { powered: vec![true; num_trx], sent: Vec::new() }
    }

    pub fn sent_on(&self, trx: TrxId) -> Vec<&DlBurstReq> {
        self.sent.iter().filter(|(t, _)| *t == trx).map(|(_, br)| br).collect()
    }
}

impl Transceiver for MockTrx {
    fn is_powered(&self, trx: TrxId) -> bool {
        self.powered.get(trx).copied().unwrap_or(false)
    }

    fn send_burst(&mut self, trx: TrxId, br: &DlBurstReq) {
        self.sent.push((trx, br.clone()));
    }
}

/// Frame scheduler that only records frame numbers
impl FrameScheduler for Vec<FrameNumber> {
    fn sched_fn(&mut self, fn_: FrameNumber) {
        self.push(fn_);
    }
}

/// Lifecycle that records shutdown requests; clones share the record
#[derive(Debug, Clone, Default)]
pub struct MockLifecycle {
    pub reasons: Arc<Mutex<Vec<String>>>,
}

impl MockLifecycle {
    pub fn count(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }
}

impl BtsLifecycle for MockLifecycle {
    fn shutdown(&mut self, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}
