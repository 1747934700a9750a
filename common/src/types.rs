//! Common Types for the GSM BTS
//!
//! Defines fundamental TDMA timing and radio types used throughout the stack

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of timeslots in a TDMA frame
pub const TRX_NR_TS: usize = 8;

/// Length of a normal burst in bits
pub const GSM_BURST_LEN: usize = 148;

/// Absolute Radio Frequency Channel Number
pub type Arfcn = u16;

/// Index of a carrier (TRX) within the BTS, 0 being C0
pub type TrxId = usize;

/// TDMA frame number, always kept within one hyperframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FrameNumber(u32);

impl FrameNumber {
    /// Frames in one hyperframe (26 * 51 * 2048)
    pub const HYPERFRAME: u32 = 2_715_648;

    /// Raw differences at or above this value are treated as negative
    pub const WRAP_THRESHOLD: u32 = 135_774;

    /// Create a frame number, reducing the value modulo the hyperframe
    pub fn new(value: u32) -> Self {
        Self(value % Self::HYPERFRAME)
    }

    /// Get the frame number value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Sum with wrap-around at the hyperframe boundary
    pub fn add(self, delta: u32) -> Self {
        Self(((self.0 as u64 + delta as u64) % Self::HYPERFRAME as u64) as u32)
    }

    /// Difference with wrap-around at the hyperframe boundary
    pub fn sub(self, delta: u32) -> Self {
        let delta = delta % Self::HYPERFRAME;
        Self((self.0 + Self::HYPERFRAME - delta) % Self::HYPERFRAME)
    }

    /// Next frame number
    pub fn inc(self) -> Self {
        self.add(1)
    }

    /// Previous frame number
    pub fn dec(self) -> Self {
        self.sub(1)
    }

    /// Signed number of frames elapsed from `earlier` to `self`.
    ///
    /// A raw forward distance of `WRAP_THRESHOLD` or more is reported as a
    /// negative value across the hyperframe wrap.
    pub fn delta(self, earlier: FrameNumber) -> i32 {
        let raw = (self.0 + Self::HYPERFRAME - earlier.0) % Self::HYPERFRAME;
        if raw >= Self::WRAP_THRESHOLD {
            raw as i32 - Self::HYPERFRAME as i32
        } else {
            raw as i32
        }
    }

    /// Add a signed offset, wrapping in both directions
    pub fn offset(self, delta: i32) -> Self {
        if delta >= 0 {
            self.add(delta as u32)
        } else {
            self.sub(delta.unsigned_abs())
        }
    }
}

impl From<u32> for FrameNumber {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decomposed GSM time of a frame number (3GPP TS 45.002, 3.3.2.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GsmTime {
    /// Frame number
    pub fn_: FrameNumber,
    /// FN div (26 * 51)
    pub t1: u16,
    /// FN mod 26
    pub t2: u8,
    /// FN mod 51
    pub t3: u8,
}

impl From<FrameNumber> for GsmTime {
    fn from(fn_: FrameNumber) -> Self {
        let v = fn_.value();
        Self {
            fn_,
            t1: (v / (26 * 51)) as u16,
            t2: (v % 26) as u8,
            t3: (v % 51) as u8,
        }
    }
}

/// Timeslot number within a TDMA frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8")]
pub struct Tn(pub u8);

impl Tn {
    /// Create a timeslot number with validation
    pub fn new(value: u8) -> Option<Self> {
        if (value as usize) < TRX_NR_TS {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Index into per-timeslot arrays
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// All timeslots of a frame in ascending order
    pub fn all() -> impl Iterator<Item = Tn> {
        (0..TRX_NR_TS as u8).map(Tn)
    }
}

impl TryFrom<u8> for Tn {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tn::new(value).ok_or_else(|| format!("invalid timeslot number {}", value))
    }
}

impl fmt::Display for Tn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
