//! # eMMC device initialization
//!
//! ```text
//! CMD1 (poll) ──► CMD2 ──► CMD3 ──► CMD9 ──► CMD7 ──► CMD6 ──► CMD8 ──► CMD6 x2
//! busy / mode     CID      RCA      CSD      TRAN     width    EXT_CSD  HS + DDR
//! ```
//!
//! The host assigns the relative address (`slot + 1`). Devices larger than
//! the legacy CSD can describe report their size in EXT_CSD SEC_COUNT.
//! Version 4.1+ devices are switched to high speed dual data rate.

use static_assertions::const_assert;
use usdhc_hal::{bits, Clock, Command, HostController};

use crate::card::{CardInfo, CardKind};
use crate::error::{Cause, InitError, InitResult, ProtocolError, Stage};
use crate::poll::{Deadline, MMC_SETTLE_DELAY, OCR_TIMEOUT, SELECT_TIMEOUT, SWITCH_TIMEOUT};
use crate::state::CardState;
use crate::{Usdhc, CSD_RSP_OFF, RCA_ADDR};

// ===== CMD1 (SEND_OP_COND) =====

const MMC_OCR_BUSY: u32 = 31;
const MMC_OCR_ACCESS_MODE: u32 = 29;
const MMC_OCR_VDD_HV_MIN: u32 = 15;
const MMC_OCR_VDD_HV_MASK: u32 = 0x1ff;

const ACCESS_MODE_SECTOR: u32 = 0b10;

// ===== CMD6 (SWITCH) =====

const MMC_SWITCH_ACCESS: u32 = 24;
const MMC_SWITCH_INDEX: u32 = 16;
const MMC_SWITCH_VALUE: u32 = 8;

const ACCESS_WRITE_BYTE: u32 = 0b11;

// ===== CMD9 (SEND_CSD) =====

const MMC_CSD_C_SIZE_MULT: u32 = 47 - CSD_RSP_OFF;
const MMC_CSD_C_SIZE: u32 = 62 - CSD_RSP_OFF;
const MMC_CSD_READ_BL_LEN: u32 = 80 - CSD_RSP_OFF;
const MMC_CSD_TRAN_SPEED: u32 = 96 - CSD_RSP_OFF;
const MMC_CSD_SPEC_VERS: u32 = 122 - CSD_RSP_OFF;

/// 10 Mbit/s * 2.6
pub const TRAN_SPEED_26MHZ: u32 = 0x32;

/// Largest C_SIZE with a legacy capacity
pub const MMC_LEGACY_C_SIZE_MAX: u32 = 0xff;

/// First SPEC_VERS with dual data rate support
pub const MMC_DDR_SPEC_VERS: u32 = 4;

// ===== EXT_CSD =====

/// BUS_WIDTH [183]
pub const EXT_CSD_BUS_WIDTH: u8 = 183;
/// HS_TIMING [185]
pub const EXT_CSD_HS_TIMING: u8 = 185;
/// SEC_COUNT [215:212]
pub const EXT_CSD_SEC_COUNT: usize = 212;

const HS_TIMING_HS: u8 = 0x1;

/// Transfer block size, also the EXT_CSD register size
pub const MMC_DEFAULT_BLOCK_SIZE: usize = 512;

const_assert!(EXT_CSD_SEC_COUNT + 4 <= MMC_DEFAULT_BLOCK_SIZE);
const_assert!((EXT_CSD_HS_TIMING as usize) < MMC_DEFAULT_BLOCK_SIZE);
const_assert!(MMC_CSD_SPEC_VERS + 4 <= 120);

/// BUS_WIDTH value for single data rate operation
pub const fn mmc_bus_width(width: u8) -> Result<u8, ProtocolError> {
    match width {
        4 => Ok(1),
        8 => Ok(2),
        _ => Err(ProtocolError::UnsupportedBusWidth(width)),
    }
}

/// BUS_WIDTH value for dual data rate operation
pub const fn mmc_ddr_bus_width(width: u8) -> Result<u8, ProtocolError> {
    match width {
        4 => Ok(5),
        8 => Ok(6),
        _ => Err(ProtocolError::UnsupportedBusWidth(width)),
    }
}

/// CMD6 argument writing `value` to EXT_CSD byte `index`
pub fn mmc_switch_arg(index: u8, value: u8) -> u32 {
    let mut arg = 0;
    bits::set_n(&mut arg, MMC_SWITCH_ACCESS, 0b11, ACCESS_WRITE_BYTE);
    bits::set_n(&mut arg, MMC_SWITCH_INDEX, 0xff, index as u32);
    bits::set_n(&mut arg, MMC_SWITCH_VALUE, 0xff, value as u32);
    arg
}

/// CSD fields used by the eMMC initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MmcCsd {
    c_size_mult: u32,
    c_size: u32,
    read_bl_len: u32,
    tran_speed: u32,
    spec_vers: u32,
}

impl<H: HostController, C: Clock> Usdhc<H, C> {
    /// Initialize an eMMC device from idle state
    ///
    /// The relative address is derived from `slot`. The device must have
    /// seen CMD0 since power-up.
    pub fn init_mmc(&mut self, slot: u8, bus_width: u8) -> InitResult<CardInfo> {
        self.begin();
        self.voltage_validation_mmc()?;
        self.identify_mmc(slot, bus_width)?;

        Ok(self.card)
    }

    /// eMMC voltage validation, sets the card kind and addressing mode
    pub(crate) fn voltage_validation_mmc(&mut self) -> InitResult<()> {
        let stage = Stage::OperatingCondition;

        let mut arg = 0;
        bits::set_n(&mut arg, MMC_OCR_ACCESS_MODE, 0b11, ACCESS_MODE_SECTOR);
        bits::set_n(&mut arg, MMC_OCR_VDD_HV_MIN, MMC_OCR_VDD_HV_MASK, MMC_OCR_VDD_HV_MASK);

        // allow the device to leave pre-idle state
        self.clock.delay(MMC_SETTLE_DELAY);

        let deadline = Deadline::start(&self.clock, OCR_TIMEOUT);

        while !deadline.expired(&self.clock) {
            // CMD1 - SEND_OP_COND - send operating conditions
            self.cmd(stage, Command::r3(1, arg))?;

            let ocr = self.rsp();

            if !bits::is_set(ocr, MMC_OCR_BUSY) {
                continue;
            }

            self.card.kind = Some(CardKind::Mmc);
            self.card.high_capacity = bits::get(ocr, MMC_OCR_ACCESS_MODE, 0b11) == ACCESS_MODE_SECTOR;

            log::debug!(
                "MMC card ready after {:?}, {} access",
                deadline.elapsed(&self.clock),
                if self.card.high_capacity { "sector" } else { "byte" }
            );

            return Ok(());
        }

        Err(InitError::new(stage, Cause::NotReady))
    }

    /// Write one EXT_CSD byte and wait for the device to return to transfer state
    fn write_ext_csd(&mut self, stage: Stage, index: u8, value: u8) -> InitResult<()> {
        log::debug!("EXT_CSD[{}] = {:#x}", index, value);

        // CMD6 - SWITCH - switch mode of operation
        self.cmd(stage, Command::r1(6, mmc_switch_arg(index, value)))?;

        // EXT_CSD GENERIC_CMD6_TIME would give a tighter bound than the
        // fixed switch timeout
        self.wait_state(stage, CardState::Transfer, SWITCH_TIMEOUT)
    }

    /// Device geometry, from EXT_CSD in emulation mode
    fn detect_capacity_mmc(&mut self, csd: &MmcCsd) -> InitResult<()> {
        if csd.c_size > MMC_LEGACY_C_SIZE_MAX {
            let mut ext_csd = [0u8; MMC_DEFAULT_BLOCK_SIZE];

            // CMD8 - SEND_EXT_CSD - read extended device data
            self.host
                .read_blocks(8, 0, 1, MMC_DEFAULT_BLOCK_SIZE as u32, &mut ext_csd)
                .map_err(|err| InitError::hardware(Stage::ExtendedCsd, err))?;

            let sec_count = u32::from_le_bytes([
                ext_csd[EXT_CSD_SEC_COUNT],
                ext_csd[EXT_CSD_SEC_COUNT + 1],
                ext_csd[EXT_CSD_SEC_COUNT + 2],
                ext_csd[EXT_CSD_SEC_COUNT + 3],
            ]);

            self.card.block_size = MMC_DEFAULT_BLOCK_SIZE as u32;
            self.card.block_count = sec_count as u64;
        } else {
            self.card.block_size = 1 << csd.read_bl_len;
            self.card.block_count = (csd.c_size as u64 + 1) << (csd.c_size_mult + 2);
        }

        Ok(())
    }

    /// Everything after voltage validation
    pub(crate) fn identify_mmc(&mut self, slot: u8, bus_width: u8) -> InitResult<()> {
        // CMD2 - ALL_SEND_CID - get unique card identification
        self.cmd(Stage::Identification, Command::r2(2, 0))?;
        self.card.cid = self.rsp_long();

        self.set_rca((slot as u32 + 1) << RCA_ADDR);

        // CMD3 - SET_RELATIVE_ADDR - set relative card address (RCA)
        self.cmd(Stage::RelativeAddress, Command::r1(3, self.rca))?;
        self.expect_state(Stage::RelativeAddress, CardState::Identification)?;

        // CMD9 - SEND_CSD - read device data
        self.cmd(Stage::CardSpecificData, Command::r2(9, self.rca))?;

        let csd = MmcCsd {
            c_size_mult: self.rsp_val(MMC_CSD_C_SIZE_MULT, 0b111),
            c_size: self.rsp_val(MMC_CSD_C_SIZE, 0xfff),
            read_bl_len: self.rsp_val(MMC_CSD_READ_BL_LEN, 0xf),
            tran_speed: self.rsp_val(MMC_CSD_TRAN_SPEED, 0xff),
            spec_vers: self.rsp_val(MMC_CSD_SPEC_VERS, 0xf),
        };

        log::debug!("MMC CSD {:?}", csd);

        if csd.tran_speed != TRAN_SPEED_26MHZ {
            return Err(InitError::protocol(
                Stage::CardSpecificData,
                ProtocolError::UnexpectedTranSpeed(csd.tran_speed),
            ));
        }

        self.set_clock(self.config.clocks.operating);

        // CMD7 - SELECT/DESELECT CARD - enter transfer state
        self.cmd(Stage::Select, Command::r1b(7, self.rca))?;
        self.wait_state(Stage::Select, CardState::Transfer, SELECT_TIMEOUT)?;

        let width = mmc_bus_width(bus_width).map_err(|err| InitError::protocol(Stage::BusWidth, err))?;
        self.write_ext_csd(Stage::BusWidth, EXT_CSD_BUS_WIDTH, width)?;

        self.detect_capacity_mmc(&csd)?;

        if csd.spec_vers < MMC_DDR_SPEC_VERS {
            log::info!("uSDHC{}: {}", slot as u32 + 1, self.card);
            return Ok(());
        }

        self.write_ext_csd(Stage::HighSpeed, EXT_CSD_HS_TIMING, HS_TIMING_HS)?;

        let width = mmc_ddr_bus_width(bus_width).map_err(|err| InitError::protocol(Stage::DualDataRate, err))?;
        self.write_ext_csd(Stage::DualDataRate, EXT_CSD_BUS_WIDTH, width)?;

        self.set_clock(self.config.clocks.high_speed_ddr);

        self.card.ddr = true;
        self.card.high_speed = true;

        log::info!("uSDHC{}: {}", slot as u32 + 1, self.card);

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
