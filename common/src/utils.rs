//! Common Utilities
//!
//! Provides utility functions used across the BTS implementation

/// Render unpacked burst bits as a compact "0101..." string for debugging
pub fn ubits_to_string(bits: &[u8]) -> String {
    bits.iter()
        .map(|&b| if b != 0 { '1' } else { '0' })
        .collect()
}

/// Time utilities for TDMA frame calculations
pub mod time {
    /// Duration of one TDMA frame in nanoseconds (120 ms / 26)
    pub const FN_DURATION_NS: u64 = 4_615_384;

    /// Duration of one TDMA frame in whole microseconds
    pub const FN_DURATION_US: i64 = (FN_DURATION_NS / 1000) as i64;
}
