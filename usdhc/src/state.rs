//! Card state machine and R1 card status

use bitflags::bitflags;
use usdhc_hal::bits;

/// Bit position of CURRENT_STATE in the R1 card status
pub const STATUS_CURRENT_STATE: u32 = 9;

/// Bit position of APP_CMD in the R1 card status
pub const STATUS_APP_CMD: u32 = 5;

/// Card states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CardState {
    /// Idle state
    Idle = 0,
    /// Ready state
    Ready = 1,
    /// Identification state
    Identification = 2,
    /// Stand-by state
    Standby = 3,
    /// Transfer state
    Transfer = 4,
    /// Sending data
    Data = 5,
    /// Receiving data
    Receive = 6,
    /// Programming
    Program = 7,
    /// Disconnected
    Disabled = 8,
    /// eMMC bus test
    BusTest = 9,
    /// eMMC sleep
    Sleep = 10,
    /// Reserved encodings
    Reserved = 15,
}

impl CardState {
    /// Create from the 4-bit CURRENT_STATE field
    pub const fn from_u32(val: u32) -> Self {
        match val & 0xf {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::Data,
            6 => CardState::Receive,
            7 => CardState::Program,
            8 => CardState::Disabled,
            9 => CardState::BusTest,
            10 => CardState::Sleep,
            _ => CardState::Reserved,
        }
    }
}

bitflags! {
    /// R1 card status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        /// Card expects an application command
        const APP_CMD = 1 << STATUS_APP_CMD;
        /// eMMC SWITCH was not accepted
        const SWITCH_ERROR = 1 << 7;
        /// Buffer empty
        const READY_FOR_DATA = 1 << 8;
        /// General error
        const ERROR = 1 << 19;
        /// Card controller error
        const CC_ERROR = 1 << 20;
        /// Previous command was illegal
        const ILLEGAL_COMMAND = 1 << 22;
        /// Previous command failed CRC
        const COM_CRC_ERROR = 1 << 23;
        /// Card is locked
        const CARD_IS_LOCKED = 1 << 25;
        /// Misaligned address
        const ADDRESS_ERROR = 1 << 30;
        /// Argument out of range
        const OUT_OF_RANGE = 1 << 31;

        const _ = !0;
    }
}

impl CardStatus {
    /// Current state field
    pub const fn state(&self) -> CardState {
        CardState::from_u32(bits::get(self.bits(), STATUS_CURRENT_STATE, 0xf))
    }

    /// Whether the card acknowledged an application command
    pub const fn app_cmd(&self) -> bool {
        self.contains(Self::APP_CMD)
    }
}

impl From<u32> for CardStatus {
    fn from(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }
}

// =============================================================================
// TESTS
// =============================================================================
