//! Bring-up error taxonomy
//!
//! Every failure names the protocol [`Stage`] it happened in and a
//! [`Cause`]. Causes fall into three kinds: hardware (the controller
//! reported a command failure), timeout (a busy or state poll ran out of
//! time) and protocol (the card or the configuration is not what the
//! sequence expects).

use core::fmt;

use usdhc_hal::HostError;

use crate::state::CardState;

/// Result type for card bring-up
pub type InitResult<T> = Result<T, InitError>;

/// Protocol stage of a bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// CMD0 reset
    Reset,
    /// CMD8 / ACMD41 / CMD1 voltage and capacity negotiation
    OperatingCondition,
    /// CMD2 card identification
    Identification,
    /// CMD3 relative address exchange
    RelativeAddress,
    /// CMD9 and capacity decoding
    CardSpecificData,
    /// CMD7 select and entry into transfer state
    Select,
    /// CMD55 application command gate
    AppCommand,
    /// ACMD6 / EXT_CSD bus width
    BusWidth,
    /// EXT_CSD read for emulation mode capacity
    ExtendedCsd,
    /// CMD6 high speed switch
    HighSpeed,
    /// eMMC DDR bus width switch
    DualDataRate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reset => "reset",
            Stage::OperatingCondition => "operating condition",
            Stage::Identification => "identification",
            Stage::RelativeAddress => "relative address",
            Stage::CardSpecificData => "card specific data",
            Stage::Select => "select",
            Stage::AppCommand => "application command",
            Stage::BusWidth => "bus width",
            Stage::ExtendedCsd => "extended CSD",
            Stage::HighSpeed => "high speed",
            Stage::DualDataRate => "dual data rate",
        };
        f.write_str(name)
    }
}

/// Unexpected field values and unsupported configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Card reported a state other than the one the sequence requires
    UnexpectedState(CardState),
    /// CSD_STRUCTURE value is not 0, 1 or 2
    UnsupportedCsdVersion(u32),
    /// eMMC TRAN_SPEED is not the 26 MHz code
    UnexpectedTranSpeed(u32),
    /// Configured bus width is not valid for this card family
    UnsupportedBusWidth(u8),
    /// CMD55 response did not acknowledge the application command
    AppCommandRejected,
    /// Neither SD nor eMMC voltage validation succeeded
    NoCard,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnexpectedState(state) => {
                write!(f, "card in unexpected state {:?} ({})", state, *state as u8)
            }
            ProtocolError::UnsupportedCsdVersion(ver) => {
                write!(f, "unsupported CSD version {}", ver)
            }
            ProtocolError::UnexpectedTranSpeed(code) => {
                write!(f, "unexpected TRAN_SPEED {:#x}", code)
            }
            ProtocolError::UnsupportedBusWidth(width) => {
                write!(f, "unsupported bus width {}", width)
            }
            ProtocolError::AppCommandRejected => {
                write!(f, "card not expecting application command")
            }
            ProtocolError::NoCard => write!(f, "no card detected"),
        }
    }
}

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// Command-level controller failure
    Hardware(HostError),
    /// State poll deadline exceeded
    Timeout,
    /// Power-up busy bit never set within the negotiation deadline
    NotReady,
    /// Unexpected field value or unsupported configuration
    Protocol(ProtocolError),
}

/// Broad class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Controller reported a command failure
    Hardware,
    /// A deadline elapsed
    Timeout,
    /// Device or configuration mismatch
    Protocol,
}

/// Terminal error of a bring-up attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitError {
    /// Stage that failed
    pub stage: Stage,
    /// Failure cause
    pub cause: Cause,
}

impl InitError {
    /// Create an error
    pub const fn new(stage: Stage, cause: Cause) -> Self {
        Self { stage, cause }
    }

    /// Hardware failure in `stage`
    pub const fn hardware(stage: Stage, err: HostError) -> Self {
        Self::new(stage, Cause::Hardware(err))
    }

    /// Protocol failure in `stage`
    pub const fn protocol(stage: Stage, err: ProtocolError) -> Self {
        Self::new(stage, Cause::Protocol(err))
    }

    /// Timeout in `stage`
    pub const fn timeout(stage: Stage) -> Self {
        Self::new(stage, Cause::Timeout)
    }

    /// Broad class of this error
    pub const fn kind(&self) -> ErrorKind {
        match self.cause {
            Cause::Hardware(_) => ErrorKind::Hardware,
            Cause::Timeout | Cause::NotReady => ErrorKind::Timeout,
            Cause::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Whether restarting the whole bring-up may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout)
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Cause::Hardware(err) => write!(f, "{}: {}", self.stage, err),
            Cause::Timeout => write!(f, "{}: timeout waiting for card state", self.stage),
            Cause::NotReady => write!(f, "{}: card not ready", self.stage),
            Cause::Protocol(err) => write!(f, "{}: {}", self.stage, err),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
