//! Transceiver Interfaces Library
//!
//! This crate provides the burst and clock primitives exchanged with the
//! radio transceiver, the transport trait used by the scheduler, and a
//! simulated transceiver.

pub mod message_types;
pub mod sim;
pub mod transceiver;

pub use message_types::{BurstFlags, DlBurstReq, TrxIndication, UlBurstInd};
pub use transceiver::Transceiver;

use common::TrxId;
use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("No such transceiver: {0}")]
    InvalidTrx(TrxId),

    #[error("Indication channel closed")]
    ChannelClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
