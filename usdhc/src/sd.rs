//! # SD card initialization
//!
//! ```text
//! CMD8 ──► ACMD41 (poll) ──► CMD2 ──► CMD3 ──► CMD9 ──► CMD7 ──► ACMD6 ──► CMD6
//! VHS      busy / CCS        CID      RCA      CSD      TRAN     width     HS
//! ```
//!
//! CMD8 decides which voltage window and capacity class to advertise in
//! ACMD41. The card answers with the capacity status (CCS) bit once its
//! power-up routine has finished, which settles the addressing mode.

use static_assertions::const_assert;
use usdhc_hal::{bits, Clock, Command, HostController};

use crate::card::{CardInfo, CardKind};
use crate::error::{Cause, InitError, InitResult, ProtocolError, Stage};
use crate::poll::{Deadline, OCR_TIMEOUT, SELECT_TIMEOUT, SWITCH_TIMEOUT};
use crate::state::{CardState, CardStatus};
use crate::{Usdhc, CSD_RSP_OFF};

// ===== CMD8 (SEND_IF_COND) =====

const CMD8_ARG_VHS: u32 = 8;
const CMD8_ARG_CHECK_PATTERN: u32 = 0;

/// 2.7V - 3.6V
const VHS_HIGH: u32 = 0b0001;
/// Reserved for low voltage range
const VHS_LOW: u32 = 0b0010;
const CHECK_PATTERN: u32 = 0b1010_1010;

// ===== ACMD41 (SD_SEND_OP_COND) =====

const SD_OCR_BUSY: u32 = 31;
const SD_OCR_HCS: u32 = 30;
const SD_OCR_XPC: u32 = 28;
const SD_OCR_VDD_HV_MIN: u32 = 15;
const SD_OCR_VDD_HV_MASK: u32 = 0x1ff;
const SD_OCR_VDD_LV: u32 = 7;

// ===== CMD9 (SEND_CSD) =====

const SD_CSD_STRUCTURE: u32 = 126 - CSD_RSP_OFF;
const SD_CSD_C_SIZE_MULT_V0: u32 = 47 - CSD_RSP_OFF;
const SD_CSD_C_SIZE_V0: u32 = 62 - CSD_RSP_OFF;
const SD_CSD_READ_BL_LEN: u32 = 80 - CSD_RSP_OFF;
const SD_CSD_C_SIZE_V1: u32 = 48 - CSD_RSP_OFF;
const SD_CSD_C_SIZE_V2: u32 = 48 - CSD_RSP_OFF;

// ===== ACMD6 (SET_BUS_WIDTH) =====

const SD_BUS_WIDTH_1: u32 = 0b00;
const SD_BUS_WIDTH_4: u32 = 0b10;

// ===== CMD6 (SWITCH_FUNC) =====

const SD_SWITCH_MODE: u32 = 31;

/// Set mode, group 1 function 1 (high speed), other groups unchanged
const SD_SWITCH_HIGH_SPEED: u32 = 0xffff_fff1;

const_assert!(SD_SWITCH_HIGH_SPEED >> SD_SWITCH_MODE == 1);
const_assert!(SD_CSD_STRUCTURE + 2 <= 120);

/// ACMD41 argument for the voltage window found by CMD8
///
/// `hc` advertises high capacity support and maximum performance (XPC),
/// `hv` selects the 2.7V - 3.6V window instead of the low voltage one.
pub fn sd_op_cond_arg(hc: bool, hv: bool) -> u32 {
    let mut arg = 0;

    if hc {
        bits::set(&mut arg, SD_OCR_HCS);
        bits::set(&mut arg, SD_OCR_XPC);
    }

    if hv {
        bits::set_n(&mut arg, SD_OCR_VDD_HV_MIN, SD_OCR_VDD_HV_MASK, SD_OCR_VDD_HV_MASK);
    } else {
        bits::set(&mut arg, SD_OCR_VDD_LV);
    }

    arg
}

/// ACMD6 argument for a bus width in lines
pub const fn sd_bus_width(width: u8) -> Result<u32, ProtocolError> {
    match width {
        1 => Ok(SD_BUS_WIDTH_1),
        4 => Ok(SD_BUS_WIDTH_4),
        _ => Err(ProtocolError::UnsupportedBusWidth(width)),
    }
}

/// Geometry decoded from a latched CSD
fn sd_geometry<H: HostController>(host: &H) -> Result<(u32, u64), ProtocolError> {
    let ver = host.response_field(SD_CSD_STRUCTURE, 0b11);
    let block_size = 1 << host.response_field(SD_CSD_READ_BL_LEN, 0xf);

    let block_count = match ver {
        // CSD Version 1.0
        0 => {
            let c_size_mult = host.response_field(SD_CSD_C_SIZE_MULT_V0, 0b111);
            let c_size = host.response_field(SD_CSD_C_SIZE_V0, 0xfff);

            // (C_SIZE + 1) * 2^(C_SIZE_MULT + 2)
            (c_size as u64 + 1) << (c_size_mult + 2)
        }
        // CSD Version 2.0
        1 => (host.response_field(SD_CSD_C_SIZE_V1, 0x3f_ffff) as u64 + 1) * 1024,
        // CSD Version 3.0
        2 => (host.response_field(SD_CSD_C_SIZE_V2, 0xfff_ffff) as u64 + 1) * 1024,
        _ => return Err(ProtocolError::UnsupportedCsdVersion(ver)),
    };

    Ok((block_size, block_count))
}

impl<H: HostController, C: Clock> Usdhc<H, C> {
    /// Initialize an SD card from idle state
    ///
    /// The card must have seen CMD0 since power-up.
    pub fn init_sd(&mut self, bus_width: u8) -> InitResult<CardInfo> {
        self.begin();
        self.voltage_validation_sd()?;
        self.identify_sd(bus_width)?;

        Ok(self.card)
    }

    /// CMD8 probe, true if the card echoes the argument
    fn if_cond(&mut self, vhs: u32) -> bool {
        let mut arg = 0;
        bits::set_n(&mut arg, CMD8_ARG_VHS, 0xf, vhs);
        bits::set_n(&mut arg, CMD8_ARG_CHECK_PATTERN, 0xff, CHECK_PATTERN);

        // CMD8 - SEND_IF_COND - read device data
        match self.cmd(Stage::OperatingCondition, Command::r1(8, arg)) {
            Ok(()) => self.rsp() == arg,
            Err(err) => {
                log::trace!("CMD8 VHS {:#06b}: {}", vhs, err);
                false
            }
        }
    }

    /// SD voltage validation, sets the card kind and addressing mode
    pub(crate) fn voltage_validation_sd(&mut self) -> InitResult<()> {
        let stage = Stage::OperatingCondition;

        let (hc, hv) = if self.if_cond(VHS_HIGH) {
            (true, true)
        } else if self.if_cond(VHS_LOW) {
            (true, false)
        } else {
            // version 1.x card or no CMD8 support
            (false, true)
        };

        let arg = sd_op_cond_arg(hc, hv);
        let deadline = Deadline::start(&self.clock, OCR_TIMEOUT);

        while !deadline.expired(&self.clock) {
            // CMD55 - APP_CMD - next command is application specific
            self.cmd(stage, Command::r1(55, 0))?;

            // ACMD41 - SD_SEND_OP_COND - read capacity information
            self.cmd(stage, Command::r3(41, arg))?;

            let ocr = self.rsp();

            if !bits::is_set(ocr, SD_OCR_BUSY) {
                continue;
            }

            self.card.kind = Some(CardKind::Sd);
            self.card.high_capacity = bits::is_set(ocr, SD_OCR_HCS);

            log::debug!(
                "SD card ready after {:?}, {} capacity",
                deadline.elapsed(&self.clock),
                if self.card.high_capacity { "high" } else { "standard" }
            );

            return Ok(());
        }

        Err(InitError::new(stage, Cause::NotReady))
    }

    /// CMD9 and geometry decoding
    fn detect_capacity_sd(&mut self) -> InitResult<()> {
        let stage = Stage::CardSpecificData;

        // CMD9 - SEND_CSD - read device data
        self.cmd(stage, Command::r2(9, self.rca))?;

        let (block_size, block_count) =
            sd_geometry(&self.host).map_err(|err| InitError::protocol(stage, err))?;

        self.card.block_size = block_size;
        self.card.block_count = block_count;

        Ok(())
    }

    /// Everything after voltage validation
    pub(crate) fn identify_sd(&mut self, bus_width: u8) -> InitResult<()> {
        // CMD2 - ALL_SEND_CID - get unique card identification
        self.cmd(Stage::Identification, Command::r2(2, 0))?;
        self.card.cid = self.rsp_long();

        // CMD3 - SEND_RELATIVE_ADDR - get relative card address (RCA)
        self.cmd(Stage::RelativeAddress, Command::r1(3, 0))?;
        self.expect_state(Stage::RelativeAddress, CardState::Identification)?;

        self.set_clock(self.config.clocks.operating);
        self.set_rca(self.rsp());

        self.detect_capacity_sd()?;

        // CMD7 - SELECT/DESELECT CARD - enter transfer state
        self.cmd(Stage::Select, Command::r1b(7, self.rca))?;
        self.wait_state(Stage::Select, CardState::Transfer, SELECT_TIMEOUT)?;

        // CMD55 - APP_CMD - next command is application specific
        self.cmd(Stage::AppCommand, Command::r1(55, self.rca))?;

        if !CardStatus::from(self.rsp()).app_cmd() {
            return Err(InitError::protocol(Stage::AppCommand, ProtocolError::AppCommandRejected));
        }

        let width = sd_bus_width(bus_width).map_err(|err| InitError::protocol(Stage::BusWidth, err))?;

        // ACMD6 - SET_BUS_WIDTH - define the card data bus width
        self.cmd(Stage::BusWidth, Command::r1(6, width))?;

        // CMD6 - SWITCH_FUNC - switch to high speed
        self.cmd(Stage::HighSpeed, Command::r1(6, SD_SWITCH_HIGH_SPEED))?;

        let ready = self.wait_state(Stage::HighSpeed, CardState::Transfer, SWITCH_TIMEOUT);

        self.set_clock(self.config.clocks.high_speed_sdr);

        // NOTE: the flag is set before the card is confirmed back in
        // transfer state, so a failed wait still reports high speed.
        // Kept for compatibility with existing bring-up behavior.
        self.card.high_speed = true;

        match ready {
            Ok(()) => log::info!("uSDHC{}: {}", self.config.slot as u32 + 1, self.card),
            Err(err) => log::warn!("SD card switched to high speed: {}", err),
        }

        ready
    }
}

// =============================================================================
// TESTS
// =============================================================================
