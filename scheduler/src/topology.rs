//! Carrier and timeslot topology of a BTS
//!
//! Carrier 0 is C0, the BCCH carrier that must never go silent.

use crate::hopping::{HoppingParams, RouteCache};
use crate::meas::MeasHistory;
use crate::SchedError;
use common::{Arfcn, Tn, TrxId, TRX_NR_TS};

/// Index of the BCCH carrier
pub const C0: TrxId = 0;

/// One timeslot of a carrier
#[derive(Debug, Clone)]
pub struct Timeslot {
    /// Timeslot number
    pub tn: Tn,
    /// Frequency hopping parameters
    pub hopping: HoppingParams,
    /// Downlink MAI to carrier cache, only used while hopping
    pub route_cache: RouteCache,
    /// Uplink measurements of the channel on this timeslot
    pub meas: MeasHistory,
}

impl Timeslot {
    /// Create a non-hopping timeslot
    pub fn new(tn: Tn) -> Self {
        Self {
            tn,
            hopping: HoppingParams::disabled(),
            route_cache: RouteCache::new(),
            meas: MeasHistory::new(),
        }
    }
}

/// One radio carrier
#[derive(Debug, Clone)]
pub struct Trx {
    /// Absolute radio frequency channel number
    pub arfcn: Arfcn,
    /// Timeslots 0..8
    pub ts: [Timeslot; TRX_NR_TS],
}

impl Trx {
    /// Create a carrier with all timeslots non-hopping
    pub fn new(arfcn: Arfcn) -> Self {
        Self {
            arfcn,
            ts: std::array::from_fn(|tn| Timeslot::new(Tn(tn as u8))),
        }
    }

    /// Configure frequency hopping on a timeslot
    pub fn with_hopping(mut self, tn: Tn, hopping: HoppingParams) -> Self {
        if let Some(ts) = self.ts.get_mut(tn.index()) {
            ts.hopping = hopping;
            ts.route_cache.clear();
        }
        self
    }
}

/// The carriers of one BTS
#[derive(Debug, Clone)]
pub struct Bts {
    /// Carriers, C0 first
    pub trx: Vec<Trx>,
}

impl Bts {
    /// Create a BTS; at least C0 must be present
    pub fn new(trx: Vec<Trx>) -> Result<Self, SchedError> {
        if trx.is_empty() {
            return Err(SchedError::InvalidConfiguration("BTS needs at least one TRX".into()));
        }
        Ok(Self { trx })
    }

    /// Number of carriers
    pub fn num_trx(&self) -> usize {
        self.trx.len()
    }

    /// Timeslot of a carrier, if both exist
    pub fn ts(&self, trx: TrxId, tn: Tn) -> Option<&Timeslot> {
        self.trx.get(trx)?.ts.get(tn.index())
    }

    /// Mutable timeslot of a carrier, if both exist
    pub fn ts_mut(&mut self, trx: TrxId, tn: Tn) -> Option<&mut Timeslot> {
        self.trx.get_mut(trx)?.ts.get_mut(tn.index())
    }
}
