//! Simulated transceiver
//!
//! Stands in for a real SDR transceiver: accepts downlink bursts, keeps
//! per-carrier counters and emits periodic clock indications with optional
//! drift and jitter.

use crate::message_types::{DlBurstReq, TrxIndication};
use crate::transceiver::Transceiver;
use crate::InterfaceError;
use common::time::FN_DURATION_NS;
use common::{FrameNumber, TrxId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Simulated clock configuration
#[derive(Debug, Clone)]
pub struct SimClockConfig {
    /// Frame number of the first clock indication
    pub start_fn: FrameNumber,
    /// Frames between two clock indications
    pub ind_interval_frames: u32,
    /// Random jitter applied to each indication, in microseconds
    pub jitter_us: u64,
    /// Clock rate error relative to nominal, in parts per million
    pub drift_ppm: f64,
}

impl Default for SimClockConfig {
    fn default() -> Self {
        Self {
            start_fn: FrameNumber::new(0),
            ind_interval_frames: 216, // roughly once per second
            jitter_us: 0,
            drift_ppm: 0.0,
        }
    }
}

/// Per-carrier counters
#[derive(Debug, Default)]
struct TrxCounters {
    powered: AtomicBool,
    tx_bursts: AtomicU64,
    tx_bits: AtomicU64,
}

/// Shared statistics of the simulated transceiver
#[derive(Debug, Default)]
struct SimState {
    trx: Vec<TrxCounters>,
    clock_inds: AtomicU64,
}

/// Point-in-time copy of the simulator counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SimStats {
    /// Bursts received per carrier
    pub tx_bursts: Vec<u64>,
    /// Burst bits received per carrier
    pub tx_bits: Vec<u64>,
    /// Clock indications emitted
    pub clock_inds: u64,
}

/// Simulated transceiver; clones share the same state
#[derive(Debug, Clone)]
pub struct SimTransceiver {
    state: Arc<SimState>,
}

impl SimTransceiver {
    /// Create a simulator with `num_trx` carriers, all powered off
    pub fn new(num_trx: usize) -> Self {
        let trx = (0..num_trx).map(|_| TrxCounters::default()).collect();
        Self {
            state: Arc::new(SimState {
                trx,
                clock_inds: AtomicU64::new(0),
            }),
        }
    }

    /// Power a carrier on or off
    pub fn set_powered(&self, trx: TrxId, on: bool) -> Result<(), InterfaceError> {
        let counters = self.state.trx.get(trx).ok_or(InterfaceError::InvalidTrx(trx))?;
        counters.powered.store(on, Ordering::Relaxed);
        info!("Simulated TRX {} powered {}", trx, if on { "on" } else { "off" });
        Ok(())
    }

    /// Snapshot the counters
    pub fn stats(&self) -> SimStats {
        SimStats {
            tx_bursts: self.state.trx.iter()
                .map(|c| c.tx_bursts.load(Ordering::Relaxed))
                .collect(),
            tx_bits: self.state.trx.iter()
                .map(|c| c.tx_bits.load(Ordering::Relaxed))
                .collect(),
            clock_inds: self.state.clock_inds.load(Ordering::Relaxed),
        }
    }

    /// Emit clock indications until the receiving side goes away.
    ///
    /// Sends `ClockStarted` first, then one `Clock` indication every
    /// `ind_interval_frames` frames. The reported FN is derived from the
    /// indication count, so jitter never accumulates into FN errors.
    pub async fn run_clock(
        &self,
        cfg: SimClockConfig,
        tx: mpsc::Sender<TrxIndication>,
    ) -> Result<(), InterfaceError> {
        if cfg.ind_interval_frames == 0 {
            return Err(InterfaceError::InvalidConfig(
                "clock indication interval must be at least one frame".into(),
            ));
        }

        tx.send(TrxIndication::ClockStarted).await
            .map_err(|_| InterfaceError::ChannelClosed)?;
        info!("Simulated clock started at fn={}, indication every {} frames",
              cfg.start_fn, cfg.ind_interval_frames);

        let mut rng = StdRng::from_entropy();
        let epoch = Instant::now();
        let period_ns = FN_DURATION_NS as f64 * cfg.ind_interval_frames as f64
            * (1.0 + cfg.drift_ppm * 1e-6);
        let jitter = cfg.jitter_us as i64;

        let mut count: u64 = 0;
        loop {
            let fn_ = cfg.start_fn.add(((count * cfg.ind_interval_frames as u64)
                % FrameNumber::HYPERFRAME as u64) as u32);

            let offset_us = if jitter > 0 { rng.gen_range(-jitter..=jitter) } else { 0 };
            let due_ns = (period_ns * count as f64) as i64 + offset_us * 1000;
            let due = epoch + Duration::from_nanos(due_ns.max(0) as u64);
            tokio::time::sleep_until(due).await;

            trace!("Simulated clock indication fn={}", fn_);
            self.state.clock_inds.fetch_add(1, Ordering::Relaxed);
            tx.send(TrxIndication::Clock(fn_)).await
                .map_err(|_| InterfaceError::ChannelClosed)?;

            count += 1;
        }
    }
}

impl Transceiver for SimTransceiver {
    fn is_powered(&self, trx: TrxId) -> bool {
        self.state.trx.get(trx)
            .map(|c| c.powered.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn send_burst(&mut self, trx: TrxId, br: &DlBurstReq) {
        match self.state.trx.get(trx) {
            Some(counters) => {
                counters.tx_bursts.fetch_add(1, Ordering::Relaxed);
                counters.tx_bits.fetch_add(br.burst_len() as u64, Ordering::Relaxed);
            }
            None => debug!("Dropping burst for unknown TRX {} (fn={}, tn={})", trx, br.fn_, br.tn),
        }
    }
}
