//! Common Utilities and Types Library
//!
//! This crate provides shared TDMA timing types and utilities used across the BTS implementation.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
