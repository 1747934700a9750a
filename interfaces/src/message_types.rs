//! Message Types for BTS-Transceiver Communication
//!
//! Defines the burst and clock primitives exchanged with the transceiver

use bitflags::bitflags;
use bytes::Bytes;
use common::{FrameNumber, Tn, TrxId};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Optional fields present in an uplink burst indication
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct BurstFlags: u8 {
        /// Burst carries no payload (NOPE indication)
        const NOPE_IND = 1 << 0;
        /// Modulation type is known
        const MOD_TYPE = 1 << 1;
        /// Training sequence info is known
        const TS_INFO = 1 << 2;
        /// C/I measurement is valid
        const CI_CB = 1 << 3;
    }
}

/// Downlink burst request handed to the transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlBurstReq {
    /// Frame number the burst is transmitted in
    pub fn_: FrameNumber,
    /// Timeslot number
    pub tn: Tn,
    /// Transmit attenuation in dB
    pub att: u8,
    /// Unpacked burst bits, one bit per byte
    pub burst: Bytes,
}

impl DlBurstReq {
    /// Create a new downlink burst request
    pub fn new(fn_: FrameNumber, tn: Tn, att: u8, burst: Bytes) -> Self {
        Self { fn_, tn, att, burst }
    }

    /// Number of burst bits
    pub fn burst_len(&self) -> usize {
        self.burst.len()
    }
}

/// Uplink burst indication received from the transceiver
#[derive(Debug, Clone, PartialEq)]
pub struct UlBurstInd {
    /// Frame number the burst was received in
    pub fn_: FrameNumber,
    /// Timeslot number
    pub tn: Tn,
    /// Which optional fields are valid
    pub flags: BurstFlags,
    /// Received signal strength in dBm
    pub rssi: i8,
    /// Timing of arrival in units of 1/256 symbol periods
    pub toa256: i16,
    /// Carrier to interference ratio in centiBels
    pub ci_cb: i16,
    /// Soft bits of the burst
    pub burst: Bytes,
}

/// Indication pushed by the transceiver link towards the scheduler
#[derive(Debug, Clone)]
pub enum TrxIndication {
    /// The transceiver was powered on; clock indications should follow
    ClockStarted,
    /// The transceiver was powered off; no more clock indications
    ClockStopped,
    /// Authoritative frame number reported by the transceiver
    Clock(FrameNumber),
    /// Uplink burst received on the given carrier
    UlBurst { trx: TrxId, bi: UlBurstInd },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_flags_serialization() {
        let flags = BurstFlags::CI_CB | BurstFlags::TS_INFO;

        let serialized = serde_json::to_string(&flags).unwrap();
        let deserialized: BurstFlags = serde_json::from_str(&serialized).unwrap();

        assert_eq!(flags, deserialized);
        assert!(deserialized.contains(BurstFlags::CI_CB));
        assert!(!deserialized.contains(BurstFlags::NOPE_IND));
    }

    #[test]
    fn test_dl_burst_req() {
        let br = DlBurstReq::new(FrameNumber::new(42), Tn(3), 0, Bytes::from(vec![0u8; 148]));
        assert_eq!(br.burst_len(), 148);
        assert_eq!(br.tn, Tn(3));
    }
}
