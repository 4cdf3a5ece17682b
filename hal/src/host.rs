//! # Host controller abstraction
//!
//! The protocol engine drives the controller exclusively through
//! [`HostController`]. An implementation owns the registers of one
//! controller instance; the engine assumes nothing else issues commands
//! while a bring-up is in progress.

use crate::{bits, HalResult};
use bitflags::bitflags;

/// Expected response length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// No response
    None,
    /// 48-bit response (R1, R3, R6, R7)
    R48,
    /// 48-bit response with busy signalling on DAT0 (R1b)
    R48Busy,
    /// 136-bit response (R2)
    R136,
}

bitflags! {
    /// Response checks
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u8 {
        /// Verify the command index echoed in the response
        const INDEX_CHECK = 1 << 0;
        /// Verify the response CRC
        const CRC_CHECK = 1 << 1;
    }
}

impl CmdFlags {
    /// Index and CRC checked, the common case for R1/R6/R7
    pub const fn checked() -> Self {
        Self::INDEX_CHECK.union(Self::CRC_CHECK)
    }
}

/// A single command as handed to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Command index (0-63)
    pub index: u8,
    /// 32-bit argument
    pub arg: u32,
    /// Expected response
    pub response: ResponseKind,
    /// Response checks
    pub flags: CmdFlags,
}

impl Command {
    /// Command without response
    pub const fn bc(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            response: ResponseKind::None,
            flags: CmdFlags::empty(),
        }
    }

    /// 48-bit response, index and CRC checked
    pub const fn r1(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            response: ResponseKind::R48,
            flags: CmdFlags::checked(),
        }
    }

    /// 48-bit response with busy, index and CRC checked
    pub const fn r1b(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            response: ResponseKind::R48Busy,
            flags: CmdFlags::checked(),
        }
    }

    /// 136-bit response, CRC checked
    pub const fn r2(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            response: ResponseKind::R136,
            flags: CmdFlags::CRC_CHECK,
        }
    }

    /// OCR response: 48 bits without index or CRC (R3)
    pub const fn r3(index: u8, arg: u32) -> Self {
        Self {
            index,
            arg,
            response: ResponseKind::R48,
            flags: CmdFlags::empty(),
        }
    }
}

/// Clock divider pair programmed into the controller
///
/// The resulting frequency is `root / (prescaler(sdclkfs) * (dvs + 1))`,
/// the exact prescaler encoding is controller specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivider {
    /// Divisor select
    pub dvs: u32,
    /// Prescaler select
    pub sdclkfs: u32,
}

impl ClockDivider {
    /// Disable the card clock output
    pub const OFF: Self = Self::new(0, 0);

    /// Create a divider pair
    pub const fn new(dvs: u32, sdclkfs: u32) -> Self {
        Self { dvs, sdclkfs }
    }

    /// Check if this pair disables the clock
    pub const fn is_off(&self) -> bool {
        self.dvs == 0 && self.sdclkfs == 0
    }
}

/// Host controller capability
pub trait HostController {
    /// Issue one command and latch its response
    fn command(&mut self, cmd: &Command) -> HalResult<()>;

    /// Read word `n` (0-3) of the last latched response
    ///
    /// Word 0 holds the 32-bit short response, or bits [31:0] of the
    /// 128-bit window of a long response.
    fn response(&self, n: usize) -> u32;

    /// Issue a card to host data command and read `blocks` blocks into `buf`
    fn read_blocks(
        &mut self,
        index: u8,
        arg: u32,
        blocks: u32,
        block_size: u32,
        buf: &mut [u8],
    ) -> HalResult<()>;

    /// Program the card clock
    fn set_clock(&mut self, divider: ClockDivider);

    /// Read the field `mask` at bit `pos` of the 128-bit response window
    ///
    /// Long responses are latched without their CRC byte, so callers pass
    /// register offsets already adjusted for that.
    fn response_field(&self, pos: u32, mask: u32) -> u32 {
        let word = (pos / 32) as usize;
        let shift = pos % 32;

        let mut val = self.response(word) >> shift;

        if shift != 0 && word < 3 {
            val |= self.response(word + 1) << (32 - shift);
        }

        bits::get(val, 0, mask)
    }
}

impl<T: HostController + ?Sized> HostController for &mut T {
    fn command(&mut self, cmd: &Command) -> HalResult<()> {
        (**self).command(cmd)
    }

    fn response(&self, n: usize) -> u32 {
        (**self).response(n)
    }

    fn read_blocks(
        &mut self,
        index: u8,
        arg: u32,
        blocks: u32,
        block_size: u32,
        buf: &mut [u8],
    ) -> HalResult<()> {
        (**self).read_blocks(index, arg, blocks, block_size, buf)
    }

    fn set_clock(&mut self, divider: ClockDivider) {
        (**self).set_clock(divider)
    }

    fn response_field(&self, pos: u32, mask: u32) -> u32 {
        (**self).response_field(pos, mask)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Latched([u32; 4]);

    impl HostController for Latched {
        fn command(&mut self, _cmd: &Command) -> HalResult<()> {
            Ok(())
        }

        fn response(&self, n: usize) -> u32 {
            self.0[n]
        }

        fn read_blocks(
            &mut self,
            _index: u8,
            _arg: u32,
            _blocks: u32,
            _block_size: u32,
            _buf: &mut [u8],
        ) -> HalResult<()> {
            Ok(())
        }

        fn set_clock(&mut self, _divider: ClockDivider) {}
    }

    #[test]
    fn test_response_field_within_word() {
        let host = Latched([0x0000_0900, 0, 0, 0]);
        assert_eq!(host.response_field(9, 0xf), 4);
    }

    #[test]
    fn test_response_field_across_words() {
        // field of 12 bits at position 54: bits [63:54] of word 1 and [1:0] of word 2
        let host = Latched([0, 0xffc0_0000, 0x0000_0003, 0]);
        assert_eq!(host.response_field(54, 0xfff), 0xfff);

        let host = Latched([0, 0x0040_0000, 0x0000_0002, 0]);
        assert_eq!(host.response_field(54, 0xfff), 0x801);
    }

    #[test]
    fn test_response_field_top_word() {
        let host = Latched([0, 0, 0, 0x0040_0000]);
        assert_eq!(host.response_field(118, 0b11), 1);
    }

    #[test]
    fn test_command_constructors() {
        let cmd = Command::r1b(7, 0x0001_0000);
        assert_eq!(cmd.response, ResponseKind::R48Busy);
        assert!(cmd.flags.contains(CmdFlags::INDEX_CHECK | CmdFlags::CRC_CHECK));

        let cmd = Command::r2(9, 0);
        assert!(!cmd.flags.contains(CmdFlags::INDEX_CHECK));

        assert!(Command::r3(41, 0).flags.is_empty());
        assert!(ClockDivider::OFF.is_off());
    }
}
