//! Transceiver transport abstraction
//!
//! The scheduler hands finished bursts to a `Transceiver`; how they reach
//! the radio (TRXD socket, shared memory, simulation) is up to the
//! implementation.

use crate::message_types::DlBurstReq;
use common::TrxId;

/// Downlink side of the radio transport
pub trait Transceiver {
    /// Whether the given carrier is powered and accepting bursts
    fn is_powered(&self, trx: TrxId) -> bool;

    /// Queue a burst for transmission on the given carrier.
    ///
    /// Must not block: the caller runs inside the per-frame deadline.
    fn send_burst(&mut self, trx: TrxId, br: &DlBurstReq);
}
