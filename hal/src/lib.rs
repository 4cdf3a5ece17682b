//! # uSDHC HAL - Host Controller Abstraction Layer
//!
//! This crate defines the boundary between the card protocol engine and the
//! host controller hardware. The engine never touches registers: everything
//! it needs from the controller is expressed by the traits in this crate.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Card protocol engine (usdhc)                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │   host::HostController          │   timer::Clock             │
//! │   command / response / clock    │   monotonic now / delay    │
//! ├──────────────────────────────────────────────────────────────┤
//! │   bits - bit-field codec shared by both sides                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod bits;
pub mod host;
pub mod timer;

use core::fmt;

pub use host::{ClockDivider, CmdFlags, Command, HostController, ResponseKind};
pub use timer::Clock;

/// Result type for host controller operations
pub type HalResult<T> = Result<T, HostError>;

/// Command-level failures reported by the host controller
///
/// These are always fatal to the bring-up attempt in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// The card did not answer the command
    NoResponse,
    /// Response CRC mismatch
    Crc,
    /// Response carried the wrong command index
    CommandIndex,
    /// Response end bit error
    EndBit,
    /// Data phase timed out
    DataTimeout,
    /// Data CRC mismatch
    DataCrc,
    /// Command or data lines stayed busy
    Busy,
    /// Any other controller fault
    Controller,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::NoResponse => write!(f, "no response"),
            HostError::Crc => write!(f, "command CRC error"),
            HostError::CommandIndex => write!(f, "command index error"),
            HostError::EndBit => write!(f, "command end bit error"),
            HostError::DataTimeout => write!(f, "data timeout"),
            HostError::DataCrc => write!(f, "data CRC error"),
            HostError::Busy => write!(f, "controller busy"),
            HostError::Controller => write!(f, "controller fault"),
        }
    }
}
