//! Frequency hopping
//!
//! Implements the hopping sequence generation of 3GPP TS 45.002, 6.2.3 and
//! the routing of bursts between carriers of a hopping BTS.

use crate::topology::Bts;
use crate::SchedError;
use common::{Arfcn, FrameNumber, GsmTime, Tn, TrxId};
use interfaces::UlBurstInd;

/// Maximum length of a mobile allocation
pub const MAX_MA_LEN: usize = 64;

/// RNTABLE, 3GPP TS 45.002 Table 14
const RN_TABLE: [u8; 114] = [
     48,  98,  63,   1,  36,  95,  78, 102,  94,  73,
      0,  64,  25,  81,  76,  59, 124,  23, 104, 100,
    101,  47, 118,  85,  18,  56,  96,  86,  54,   2,
     80,  34, 127,  13,   6,  89,  57, 103,  12,  74,
     55, 111,  75,  38, 109,  71, 112,  29,  11,  88,
     87,  19,   3,  68, 110,  26,  33,  31,   8,  45,
     82,  58,  40, 107,  32,   5, 106,  92,  62,  67,
     77, 108, 122,  37,  60,  66, 121,  42,  51, 126,
    117, 114,   4,  90,  43,  52,  53, 113, 120,  72,
     16,  49,   7,  79, 119,  61,  22,  84,   9,  97,
     91,  15,  21,  24,  46,  39,  93, 105,  65,  70,
    125,  99,  17, 123,
];

/// Mobile allocation index for a frame.
///
/// `n` is the length of the mobile allocation. Returns `None` when the
/// parameters cannot produce an index (empty allocation, HSN out of range).
pub fn hop_seq_gen(time: &GsmTime, hsn: u8, maio: u8, n: usize) -> Option<usize> {
    if n == 0 {
        return None;
    }

    // cyclic hopping
    if hsn == 0 {
        return Some((time.fn_.value() as usize + maio as usize) % n);
    }

    let nbin = usize::BITS - n.leading_zeros();
    let mask = (1usize << nbin) - 1;

    let rn = *RN_TABLE.get((hsn as usize ^ (time.t1 as usize & 63)) + time.t3 as usize)?;
    let m = time.t2 as usize + rn as usize;
    let mp = m & mask;
    let s = if mp < n {
        mp
    } else {
        (mp + (time.t3 as usize & mask)) % n
    };

    Some((s + maio as usize) % n)
}

/// Hopping parameters of a timeslot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HoppingParams {
    enabled: bool,
    hsn: u8,
    maio: u8,
    arfcn_list: Vec<Arfcn>,
}

impl HoppingParams {
    /// Parameters of a timeslot that does not hop
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Validated hopping parameters
    pub fn new(hsn: u8, maio: u8, arfcn_list: Vec<Arfcn>) -> Result<Self, SchedError> {
        if hsn > 63 {
            return Err(SchedError::InvalidHopping(format!("HSN {} out of range 0..=63", hsn)));
        }
        if arfcn_list.is_empty() || arfcn_list.len() > MAX_MA_LEN {
            return Err(SchedError::InvalidHopping(format!(
                "mobile allocation must hold 1..={} ARFCNs, got {}",
                MAX_MA_LEN, arfcn_list.len()
            )));
        }
        if maio as usize >= arfcn_list.len() {
            return Err(SchedError::InvalidHopping(format!(
                "MAIO {} exceeds mobile allocation length {}", maio, arfcn_list.len()
            )));
        }

        Ok(Self { enabled: true, hsn, maio, arfcn_list })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn hsn(&self) -> u8 {
        self.hsn
    }

    pub fn maio(&self) -> u8 {
        self.maio
    }

    pub fn arfcn_list(&self) -> &[Arfcn] {
        &self.arfcn_list
    }

    /// Mobile allocation index used in the given frame
    pub fn mai(&self, time: &GsmTime) -> Option<usize> {
        hop_seq_gen(time, self.hsn, self.maio, self.arfcn_list.len())
    }

    /// ARFCN used in the given frame
    pub fn arfcn_at(&self, time: &GsmTime) -> Option<Arfcn> {
        self.mai(time).and_then(|mai| self.arfcn_list.get(mai).copied())
    }
}

/// Per-timeslot cache of MAI to carrier lookups.
///
/// Only saves the linear carrier scan; dropping entries never changes routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCache {
    entries: [Option<TrxId>; MAX_MA_LEN],
}

impl RouteCache {
    pub fn new() -> Self {
        Self { entries: [None; MAX_MA_LEN] }
    }

    pub fn get(&self, mai: usize) -> Option<TrxId> {
        self.entries.get(mai).copied().flatten()
    }

    pub fn set(&mut self, mai: usize, trx: TrxId) {
        if let Some(entry) = self.entries.get_mut(mai) {
            *entry = Some(trx);
        }
    }

    pub fn clear(&mut self) {
        self.entries = [None; MAX_MA_LEN];
    }

    /// Number of populated entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Bts {
    /// Carrier that transmits a downlink burst of a hopping timeslot.
    ///
    /// `trx` and `tn` identify the logical timeslot, `fn_` is the frame the
    /// burst goes on air in.
    pub fn resolve_downlink(&mut self, trx: TrxId, tn: Tn, fn_: FrameNumber) -> Option<TrxId> {
        let ts = self.ts(trx, tn)?;
        let mai = ts.hopping.mai(&GsmTime::from(fn_))?;

        if let Some(dst) = ts.route_cache.get(mai) {
            return Some(dst);
        }

        // cache miss, look the carrier up
        let arfcn = *ts.hopping.arfcn_list().get(mai)?;
        let dst = self.trx.iter().position(|t| t.arfcn == arfcn)?;

        if let Some(ts) = self.ts_mut(trx, tn) {
            ts.route_cache.set(mai, dst);
        }
        Some(dst)
    }

    /// Logical carrier an uplink burst belongs to.
    ///
    /// `src_trx` is the carrier the burst was received on. Every carrier
    /// hopping on the burst's timeslot is checked for whether it expected to
    /// be on the source carrier's ARFCN in that frame.
    pub fn resolve_uplink(&self, bi: &UlBurstInd, src_trx: TrxId) -> Option<TrxId> {
        let src_arfcn = self.trx.get(src_trx)?.arfcn;
        let time = GsmTime::from(bi.fn_);

        self.trx.iter().position(|trx| {
            trx.ts.get(bi.tn.index()).is_some_and(|ts| {
                ts.hopping.enabled() && ts.hopping.arfcn_at(&time) == Some(src_arfcn)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Trx;
    use bytes::Bytes;
    use interfaces::BurstFlags;

    fn time(fn_: u32) -> GsmTime {
        GsmTime::from(FrameNumber::new(fn_))
    }

    fn hopping_bts() -> Bts {
        let ma = vec![10, 20, 30, 40];
        let trx = (0..4)
            .map(|i| {
                let hop = HoppingParams::new(7, i as u8, ma.clone()).unwrap();
                Trx::new(ma[i]).with_hopping(Tn(1), hop)
            })
            .collect();
        Bts::new(trx).unwrap()
    }

    fn ul_burst(fn_: u32, tn: u8) -> UlBurstInd {
        UlBurstInd {
            fn_: FrameNumber::new(fn_),
            tn: Tn(tn),
            flags: BurstFlags::empty(),
            rssi: -70,
            toa256: 0,
            ci_cb: 0,
            burst: Bytes::new(),
        }
    }

    #[test]
    fn test_cyclic_hopping() {
        for fn_ in 0..20u32 {
            assert_eq!(hop_seq_gen(&time(fn_), 0, 1, 4), Some((fn_ as usize + 1) % 4));
        }
    }

    #[test]
    fn test_pseudo_random_hopping() {
        // hand-computed from RNTABLE for HSN=1, N=4
        assert_eq!(hop_seq_gen(&time(0), 1, 0, 4), Some(2));
        assert_eq!(hop_seq_gen(&time(1), 1, 0, 4), Some(0));
        assert_eq!(hop_seq_gen(&time(2), 1, 0, 4), Some(3));
        assert_eq!(hop_seq_gen(&time(3), 1, 0, 4), Some(2));
        assert_eq!(hop_seq_gen(&time(5), 1, 0, 4), Some(3));
        // MAIO shifts the index
        assert_eq!(hop_seq_gen(&time(0), 1, 3, 4), Some(1));
    }

    #[test]
    fn test_hop_index_in_range() {
        for n in [1usize, 2, 3, 5, 8, 17, 64] {
            for hsn in [0u8, 1, 33, 63] {
                for fn_ in (0..FrameNumber::HYPERFRAME).step_by(9973) {
                    let mai = hop_seq_gen(&time(fn_), hsn, 0, n).unwrap();
                    assert!(mai < n);
                }
            }
        }
    }

    #[test]
    fn test_degenerate_parameters() {
        assert_eq!(hop_seq_gen(&time(5), 3, 0, 0), None);
        assert_eq!(hop_seq_gen(&time(50), 64, 0, 4), None);
    }

    #[test]
    fn test_hopping_params_validation() {
        assert!(HoppingParams::new(0, 0, vec![]).is_err());
        assert!(HoppingParams::new(64, 0, vec![1]).is_err());
        assert!(HoppingParams::new(1, 2, vec![1, 2]).is_err());
        assert!(HoppingParams::new(1, 0, vec![1; MAX_MA_LEN + 1]).is_err());

        let hop = HoppingParams::new(5, 1, vec![1, 2]).unwrap();
        assert!(hop.enabled());
        assert!(!HoppingParams::disabled().enabled());
        assert_eq!(HoppingParams::disabled().mai(&time(0)), None);
    }

    #[test]
    fn test_resolve_downlink_matches_sequence() {
        let mut bts = hopping_bts();
        for fn_ in 0..200u32 {
            let expected_arfcn = bts.trx[2].ts[1].hopping.arfcn_at(&time(fn_)).unwrap();
            let dst = bts.resolve_downlink(2, Tn(1), FrameNumber::new(fn_)).unwrap();
            assert_eq!(bts.trx[dst].arfcn, expected_arfcn);
        }
    }

    #[test]
    fn test_route_cache_is_transparent() {
        let mut bts = hopping_bts();
        let fn_ = FrameNumber::new(1234);

        let first = bts.resolve_downlink(1, Tn(1), fn_);
        assert!(first.is_some());
        assert_eq!(bts.trx[1].ts[1].route_cache.len(), 1);

        let cached = bts.resolve_downlink(1, Tn(1), fn_);
        assert_eq!(first, cached);

        bts.trx[1].ts[1].route_cache.clear();
        assert!(bts.trx[1].ts[1].route_cache.is_empty());
        assert_eq!(bts.resolve_downlink(1, Tn(1), fn_), first);
    }

    #[test]
    fn test_resolve_downlink_no_carrier() {
        // ARFCN 99 is in the allocation but no carrier serves it
        let hop = HoppingParams::new(0, 0, vec![99]).unwrap();
        let mut bts = Bts::new(vec![Trx::new(10).with_hopping(Tn(2), hop)]).unwrap();

        assert_eq!(bts.resolve_downlink(0, Tn(2), FrameNumber::new(0)), None);
        assert!(bts.trx[0].ts[2].route_cache.is_empty());
        assert_eq!(bts.resolve_downlink(5, Tn(2), FrameNumber::new(0)), None);
    }

    #[test]
    fn test_resolve_uplink() {
        let bts = hopping_bts();
        let fn_ = 4321u32;

        // whichever logical carrier expected to sit on ARFCN 30 owns the burst
        let src = 2;
        let bi = ul_burst(fn_, 1);
        let owner = bts.resolve_uplink(&bi, src).unwrap();
        assert_eq!(bts.trx[owner].ts[1].hopping.arfcn_at(&time(fn_)), Some(30));

        // timeslot without hopping has no owner
        assert_eq!(bts.resolve_uplink(&ul_burst(fn_, 0), src), None);
        // unknown source carrier
        assert_eq!(bts.resolve_uplink(&bi, 9), None);
    }
}
