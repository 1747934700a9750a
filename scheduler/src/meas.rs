//! Uplink burst measurement history
//!
//! Every logical channel keeps the measurements of its most recent uplink
//! bursts in a small ring. Averages are taken over a window of that ring
//! selected by a [`MeasAvgMode`].

use interfaces::{BurstFlags, UlBurstInd};
use serde::Serialize;
use tracing::debug;

/// Number of bursts kept in the history
pub const MEAS_HIST_SIZE: usize = 8;

/// Measurements of a single burst, or an average of several
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MeasSet {
    /// C/I ratio in centiBels
    pub ci_cb: i16,
    /// Timing of arrival in 1/256 symbol periods
    pub toa256: i16,
    /// Received signal strength in dBm
    pub rssi: f32,
}

/// Averaging window over the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasAvgMode {
    /// Last 4 bursts (xCCH, TCH/H, PTCCH, PDTCH)
    Quad,
    /// Last 8 bursts (TCH/F, FACCH/F)
    Octo,
    /// Last 6 bursts (FACCH/H)
    Six,
    /// First 4 of the last 8 bursts
    M8FirstQuad,
    /// First 2 of the last 6 bursts
    M6FirstTwo,
    /// Middle 2 of the last 6 bursts
    M6MiddleTwo,
}

impl MeasAvgMode {
    /// Window as (number of bursts, lookback from the write cursor)
    pub fn window(self) -> (usize, usize) {
        match self {
            MeasAvgMode::Quad => (4, 4),
            MeasAvgMode::Octo => (8, 8),
            MeasAvgMode::Six => (6, 6),
            MeasAvgMode::M8FirstQuad => (4, 8),
            MeasAvgMode::M6FirstTwo => (2, 6),
            MeasAvgMode::M6MiddleTwo => (2, 4),
        }
    }
}

/// Fixed-size ring of burst measurements
#[derive(Debug, Clone, Default)]
pub struct MeasHistory {
    buf: [MeasSet; MEAS_HIST_SIZE],
    current: usize,
}

impl MeasHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the measurements of an uplink burst.
    ///
    /// C/I is only taken from the indication when the transceiver flagged it
    /// as valid.
    pub fn push(&mut self, bi: &UlBurstInd) {
        self.push_set(MeasSet {
            ci_cb: if bi.flags.contains(BurstFlags::CI_CB) { bi.ci_cb } else { 0 },
            toa256: bi.toa256,
            rssi: bi.rssi as f32,
        });
    }

    /// Record a measurement set, overwriting the oldest entry
    pub fn push_set(&mut self, set: MeasSet) {
        self.buf[self.current] = set;
        self.current = (self.current + 1) % MEAS_HIST_SIZE;
    }

    /// Position the next measurement will be written to
    pub fn cursor(&self) -> usize {
        self.current
    }

    /// Average the window selected by `mode`
    pub fn avg(&self, mode: MeasAvgMode) -> MeasSet {
        let (n, shift) = mode.window();

        let mut rssi_sum = 0f32;
        let mut toa256_sum = 0i32;
        let mut ci_cb_sum = 0i32;

        for i in 0..n {
            let pos = (self.current + MEAS_HIST_SIZE - shift + i) % MEAS_HIST_SIZE;
            let set = &self.buf[pos];

            rssi_sum += set.rssi;
            toa256_sum += set.toa256 as i32;
            ci_cb_sum += set.ci_cb as i32;
        }

        let avg = MeasSet {
            rssi: rssi_sum / n as f32,
            toa256: (toa256_sum / n as i32) as i16,
            ci_cb: (ci_cb_sum / n as i32) as i16,
        };

        debug!("Measurement AVG (num={}, shift={}): RSSI {}, ToA256 {}, C/I {} cB",
               n, shift, avg.rssi, avg.toa256, avg.ci_cb);

        avg
    }
}
