//! Simulated card and controller for tests
//!
//! [`SimCard`] answers commands the way an SD card or an eMMC device does
//! during identification, latching responses the way the uSDHC does
//! (long responses without their CRC byte). Every command advances the
//! shared [`SimClock`] by a fixed step.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use usdhc_hal::{ClockDivider, Clock, Command, HalResult, HostController, HostError};

use crate::state::{CardState, STATUS_APP_CMD, STATUS_CURRENT_STATE};

/// Manually advanced clock, shared between the engine and the card
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<Duration>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn delay(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Card family answering on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Sd,
    Mmc,
    Absent,
}

/// Voltage window answering CMD8
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCond {
    High,
    Low,
    Silent,
}

/// Simulated card behind a simulated controller
#[derive(Debug)]
pub struct SimCard {
    pub clock: SimClock,
    pub step: Duration,
    pub family: Family,
    pub if_cond: IfCond,
    /// OCR polls answered with the busy bit clear before ready
    pub busy_polls: u32,
    /// SD CCS / eMMC sector access mode granted
    pub high_capacity: bool,
    /// RCA published by an SD card
    pub sd_rca: u16,
    pub cid: u128,
    pub csd: u128,
    pub ext_csd: [u8; 512],
    /// State reported in the CMD3 response
    pub ident_state: CardState,
    /// Acknowledge CMD55 addressed to the RCA
    pub app_cmd_ack: bool,
    /// Never return to transfer state after a CMD6 switch
    pub stuck_after_switch: bool,
    /// Fail the plain command with this index
    pub fail_cmd: Option<u8>,
    /// Fail the application command with this index
    pub fail_acmd: Option<u8>,
    pub fail_with: HostError,

    pub log: Vec<Command>,
    pub acmds: Vec<u8>,
    pub clocks: Vec<ClockDivider>,
    pub transfers: Vec<(u8, u32, u32)>,
    pub ext_csd_writes: Vec<(u8, u8)>,
    /// RCA the card currently answers to
    pub rca: u16,

    state: CardState,
    app: bool,
    rsp: [u32; 4],
}

impl SimCard {
    fn new(family: Family, clock: &SimClock) -> Self {
        Self {
            clock: clock.clone(),
            step: Duration::from_micros(10),
            family,
            if_cond: IfCond::High,
            busy_polls: 0,
            high_capacity: true,
            sd_rca: 0xb368,
            cid: 0,
            csd: 0,
            ext_csd: [0; 512],
            ident_state: CardState::Identification,
            app_cmd_ack: true,
            stuck_after_switch: false,
            fail_cmd: None,
            fail_acmd: None,
            fail_with: HostError::Crc,
            log: Vec::new(),
            acmds: Vec::new(),
            clocks: Vec::new(),
            transfers: Vec::new(),
            ext_csd_writes: Vec::new(),
            rca: 0,
            state: CardState::Idle,
            app: false,
            rsp: [0; 4],
        }
    }

    /// SD card with the given CSD
    pub fn sd(clock: &SimClock, csd: u128) -> Self {
        let mut card = Self::new(Family::Sd, clock);
        card.csd = csd;
        card
    }

    /// eMMC device with the given CSD
    pub fn mmc(clock: &SimClock, csd: u128) -> Self {
        let mut card = Self::new(Family::Mmc, clock);
        card.csd = csd;
        card.if_cond = IfCond::Silent;
        card
    }

    /// Empty slot
    pub fn absent(clock: &SimClock) -> Self {
        let mut card = Self::new(Family::Absent, clock);
        card.if_cond = IfCond::Silent;
        card
    }

    pub fn set_sec_count(&mut self, count: u32) {
        self.ext_csd[212..216].copy_from_slice(&count.to_le_bytes());
    }

    /// Number of commands issued with `index`, application commands excluded
    pub fn count(&self, index: u8) -> usize {
        self.log.iter().filter(|cmd| cmd.index == index).count()
            - self.acmds.iter().filter(|&&i| i == index).count()
    }

    /// Arguments of all commands with `index`
    pub fn args(&self, index: u8) -> Vec<u32> {
        self.log.iter().filter(|cmd| cmd.index == index).map(|cmd| cmd.arg).collect()
    }

    fn latch_long(&mut self, reg: u128) {
        let rsp = reg >> 8;
        self.rsp = [rsp as u32, (rsp >> 32) as u32, (rsp >> 64) as u32, (rsp >> 96) as u32];
    }

    fn latch_status(&mut self, state: CardState) {
        let mut status = (state as u32) << STATUS_CURRENT_STATE;

        if self.app {
            status |= 1 << STATUS_APP_CMD;
        }

        self.rsp = [status, 0, 0, 0];
    }

    fn ocr_ready(&mut self) -> bool {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            false
        } else {
            true
        }
    }
}

impl HostController for SimCard {
    fn command(&mut self, cmd: &Command) -> HalResult<()> {
        self.clock.advance(self.step);
        self.log.push(*cmd);

        let app = core::mem::replace(&mut self.app, false);

        if app {
            self.acmds.push(cmd.index);
        }

        let failing = if app { self.fail_acmd } else { self.fail_cmd };

        if failing == Some(cmd.index) {
            return Err(self.fail_with);
        }

        // CMD0 expects no response, an empty slot cannot fail it
        if cmd.index == 0 {
            self.state = CardState::Idle;
            self.rca = 0;
            self.rsp = [0; 4];
            return Ok(());
        }

        if self.family == Family::Absent {
            return Err(HostError::NoResponse);
        }

        let sd = self.family == Family::Sd;

        match (cmd.index, app) {
            (1, _) if !sd => {
                let mut ocr = 0x1ff << 15;

                if self.ocr_ready() {
                    ocr |= 1 << 31;

                    if self.high_capacity {
                        ocr |= 0b10 << 29;
                    }

                    self.state = CardState::Ready;
                }

                self.rsp = [ocr, 0, 0, 0];
            }
            (2, _) => {
                self.state = CardState::Identification;
                self.latch_long(self.cid);
            }
            (3, _) => {
                if sd {
                    self.rca = self.sd_rca;
                    self.rsp = [
                        (self.sd_rca as u32) << 16 | (self.ident_state as u32) << STATUS_CURRENT_STATE,
                        0,
                        0,
                        0,
                    ];
                } else {
                    self.rca = (cmd.arg >> 16) as u16;
                    self.latch_status(self.ident_state);
                }
                self.state = CardState::Standby;
            }
            (6, true) => self.latch_status(self.state),
            (6, false) => {
                self.latch_status(self.state);

                if !sd && (cmd.arg >> 24) & 0b11 == 0b11 {
                    let index = (cmd.arg >> 16) as u8;
                    let value = (cmd.arg >> 8) as u8;
                    self.ext_csd[index as usize] = value;
                    self.ext_csd_writes.push((index, value));
                }

                if self.stuck_after_switch {
                    self.state = CardState::Program;
                }
            }
            (7, _) => {
                self.latch_status(self.state);
                self.state = CardState::Transfer;
            }
            (8, _) if sd => match self.if_cond {
                IfCond::High if (cmd.arg >> 8) & 0xf == 0b0001 => self.rsp = [cmd.arg, 0, 0, 0],
                IfCond::Low if (cmd.arg >> 8) & 0xf == 0b0010 => self.rsp = [cmd.arg, 0, 0, 0],
                _ => return Err(HostError::NoResponse),
            },
            (9, _) => self.latch_long(self.csd),
            (13, _) => self.latch_status(self.state),
            (41, true) if sd => {
                let mut ocr = 0x1ff << 15;

                if self.ocr_ready() {
                    ocr |= 1 << 31;

                    if self.high_capacity {
                        ocr |= 1 << 30;
                    }

                    self.state = CardState::Ready;
                }

                self.rsp = [ocr, 0, 0, 0];
            }
            (55, _) if sd => {
                self.app = cmd.arg == 0 || self.app_cmd_ack;
                self.latch_status(self.state);
            }
            _ => return Err(HostError::NoResponse),
        }

        Ok(())
    }

    fn response(&self, n: usize) -> u32 {
        self.rsp[n]
    }

    fn read_blocks(
        &mut self,
        index: u8,
        arg: u32,
        blocks: u32,
        block_size: u32,
        buf: &mut [u8],
    ) -> HalResult<()> {
        self.clock.advance(self.step);
        self.transfers.push((index, arg, blocks * block_size));

        if self.fail_cmd == Some(index) {
            return Err(self.fail_with);
        }

        match index {
            8 if self.family == Family::Mmc => {
                let len = buf.len().min(self.ext_csd.len());
                buf[..len].copy_from_slice(&self.ext_csd[..len]);
                Ok(())
            }
            _ => Err(HostError::NoResponse),
        }
    }

    fn set_clock(&mut self, divider: ClockDivider) {
        self.clocks.push(divider);
    }
}

// =============================================================================
// REGISTER IMAGES
// =============================================================================

fn put(reg: &mut u128, pos: u32, width: u32, value: u128) {
    let mask = (1u128 << width) - 1;
    *reg = (*reg & !(mask << pos)) | ((value & mask) << pos);
}

/// eMMC CSD image with the fields the initializer reads
pub fn mmc_csd(spec_vers: u8, tran_speed: u8, read_bl_len: u8, c_size: u16, c_size_mult: u8) -> u128 {
    let mut csd = 0u128;
    put(&mut csd, 126, 2, 3);
    put(&mut csd, 122, 4, spec_vers as u128);
    put(&mut csd, 96, 8, tran_speed as u128);
    put(&mut csd, 80, 4, read_bl_len as u128);
    put(&mut csd, 62, 12, c_size as u128);
    put(&mut csd, 47, 3, c_size_mult as u128);
    put(&mut csd, 0, 8, 0x01);
    csd
}
