//! # uSDHC card bring-up
//!
//! Identification and initialization of SD cards and eMMC devices on an
//! Ultra Secured Digital Host Controller, from power-up idle state to a
//! selected card in transfer state with its geometry and bus speed known.
//!
//! ## Sequence
//!
//! ```text
//!            CMD0
//!              │
//!     ┌────────┴────────┐
//!     │ SD              │ eMMC
//!  CMD8 / ACMD41      CMD1            voltage validation
//!  CMD2 / CMD3        CMD2 / CMD3     identification, RCA
//!  CMD9               CMD9            CSD geometry
//!  CMD7               CMD7            transfer state
//!  ACMD6              CMD6 BUS_WIDTH  bus width
//!                     CMD8 EXT_CSD    emulation mode capacity
//!  CMD6 HS            CMD6 HS / DDR   bus speed
//! ```
//!
//! The controller and the time source are injected: [`Usdhc`] drives any
//! [`HostController`] and bounds every busy loop with a [`Clock`].
//!
//! ## Usage
//!
//! ```ignore
//! let mut usdhc = Usdhc::new(host, timer, Config::new(1).with_bus_width(4));
//!
//! match usdhc.detect() {
//!     Ok(card) => log::info!("card: {}", card),
//!     Err(err) if err.is_retryable() => { /* reset controller, try again */ }
//!     Err(err) => log::error!("card init failed: {}", err),
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod card;
pub mod config;
pub mod error;
pub mod mmc;
pub mod poll;
pub mod sd;
pub mod state;
pub mod table;

#[cfg(test)]
pub(crate) mod sim;

use core::time::Duration;

use usdhc_hal::{ClockDivider, Clock, Command, HostController};

pub use card::{CardInfo, CardKind, Cid};
pub use config::{ClockConfig, Config};
pub use error::{Cause, ErrorKind, InitError, InitResult, ProtocolError, Stage};
pub use state::{CardState, CardStatus};

use poll::Deadline;

/// Long responses are latched without their trailing CRC byte
pub const CSD_RSP_OFF: u32 = 8;

/// Bit position of the RCA in addressed command arguments
pub const RCA_ADDR: u32 = 16;

// =============================================================================
// CARD INITIALIZER
// =============================================================================

/// Card bring-up variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initializer {
    /// SD memory card on a 1 or 4 line bus
    Sd {
        /// Bus width in lines
        bus_width: u8,
    },
    /// eMMC device on a 4 or 8 line bus
    Mmc {
        /// Controller index, the RCA is `slot + 1`
        slot: u8,
        /// Bus width in lines
        bus_width: u8,
    },
}

impl Initializer {
    /// Card family handled by this variant
    pub const fn kind(&self) -> CardKind {
        match self {
            Initializer::Sd { .. } => CardKind::Sd,
            Initializer::Mmc { .. } => CardKind::Mmc,
        }
    }

    /// Run the full bring-up sequence, voltage validation included
    pub fn run<H: HostController, C: Clock>(self, usdhc: &mut Usdhc<H, C>) -> InitResult<CardInfo> {
        match self {
            Initializer::Sd { bus_width } => usdhc.init_sd(bus_width),
            Initializer::Mmc { slot, bus_width } => usdhc.init_mmc(slot, bus_width),
        }
    }
}

// =============================================================================
// CONTROLLER INSTANCE
// =============================================================================

/// Card bring-up engine bound to one controller instance
#[derive(Debug)]
pub struct Usdhc<H, C> {
    host: H,
    clock: C,
    config: Config,
    /// RCA pre-shifted into command argument position
    rca: u32,
    card: CardInfo,
}

impl<H: HostController, C: Clock> Usdhc<H, C> {
    /// Bind the engine to a controller and a time source
    pub fn new(host: H, clock: C, config: Config) -> Self {
        Self {
            host,
            clock,
            config,
            rca: 0,
            card: CardInfo::default(),
        }
    }

    /// Card descriptor
    ///
    /// After a failed bring-up this holds whatever was decoded before the
    /// failure and must not be used for I/O.
    pub fn card(&self) -> &CardInfo {
        &self.card
    }

    /// Instance configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Relative card address argument (`rca << 16`)
    pub fn rca(&self) -> u32 {
        self.rca
    }

    /// Underlying controller
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run an explicit initializer
    pub fn initialize(&mut self, init: Initializer) -> InitResult<CardInfo> {
        init.run(self)
    }

    /// Reset the card, find out whether it is SD or eMMC and initialize it
    ///
    /// On success the descriptor is also published in the
    /// [card table](crate::table) under the configured slot.
    ///
    /// When both probes fail, a card that answered but stayed busy past the
    /// negotiation deadline is reported as such (retryable), SD first.
    /// [`ProtocolError::NoCard`] means neither family answered.
    pub fn detect(&mut self) -> InitResult<CardInfo> {
        let slot = self.config.slot;
        let width = self.config.bus_width;

        table::clear(slot);
        self.begin();

        self.reset()?;

        let kind = match self.voltage_validation_sd() {
            Ok(()) => CardKind::Sd,
            Err(sd_err) => {
                log::debug!("uSDHC{}: no SD card ({})", slot as u32 + 1, sd_err);

                self.reset()?;

                if let Err(mmc_err) = self.voltage_validation_mmc() {
                    log::debug!("uSDHC{}: no MMC card ({})", slot as u32 + 1, mmc_err);

                    return Err(match (sd_err.kind(), mmc_err.kind()) {
                        (ErrorKind::Timeout, _) => sd_err,
                        (_, ErrorKind::Timeout) => mmc_err,
                        _ => InitError::protocol(Stage::OperatingCondition, ProtocolError::NoCard),
                    });
                }

                CardKind::Mmc
            }
        };

        match kind {
            CardKind::Sd => self.identify_sd(width)?,
            CardKind::Mmc => self.identify_mmc(slot, width)?,
        }

        if !table::publish(slot, self.card) {
            log::warn!("uSDHC{}: slot outside the card table", slot as u32 + 1);
        }

        Ok(self.card)
    }

    /// Start a new bring-up pass
    pub(crate) fn begin(&mut self) {
        self.card = CardInfo::default();
        self.rca = 0;
    }

    /// CMD0 - GO_IDLE_STATE
    fn reset(&mut self) -> InitResult<()> {
        self.cmd(Stage::Reset, Command::bc(0, 0))
    }

    /// Issue a command, mapping controller failures to `stage`
    pub(crate) fn cmd(&mut self, stage: Stage, cmd: Command) -> InitResult<()> {
        log::trace!("CMD{} arg {:#010x}", cmd.index, cmd.arg);

        self.host
            .command(&cmd)
            .map_err(|err| InitError::hardware(stage, err))
    }

    /// Word 0 of the last response
    pub(crate) fn rsp(&self) -> u32 {
        self.host.response(0)
    }

    /// Field of the last long response
    pub(crate) fn rsp_val(&self, pos: u32, mask: u32) -> u32 {
        self.host.response_field(pos, mask)
    }

    /// Full 128-bit window of the last long response
    pub(crate) fn rsp_long(&self) -> [u32; 4] {
        [
            self.host.response(0),
            self.host.response(1),
            self.host.response(2),
            self.host.response(3),
        ]
    }

    /// Record the relative card address in use
    pub(crate) fn set_rca(&mut self, rca: u32) {
        self.rca = rca & (0xffff << RCA_ADDR);
        self.card.rca = (self.rca >> RCA_ADDR) as u16;
    }

    /// Check the CURRENT_STATE field of the last R1 response
    pub(crate) fn expect_state(&self, stage: Stage, expected: CardState) -> InitResult<()> {
        let state = CardStatus::from(self.rsp()).state();

        if state != expected {
            return Err(InitError::protocol(stage, ProtocolError::UnexpectedState(state)));
        }

        Ok(())
    }

    /// Stop the card clock, then restart it with `divider`
    pub(crate) fn set_clock(&mut self, divider: ClockDivider) {
        self.host.set_clock(ClockDivider::OFF);
        self.host.set_clock(divider);
    }

    /// Poll CMD13 until the card reports `state` or `timeout` elapses
    ///
    /// Status command failures are tolerated until the deadline, the card
    /// may not answer while busy.
    pub(crate) fn wait_state(&mut self, stage: Stage, state: CardState, timeout: Duration) -> InitResult<()> {
        let deadline = Deadline::start(&self.clock, timeout);

        loop {
            // CMD13 - SEND_STATUS - poll card status
            match self.host.command(&Command::r1(13, self.rca)) {
                Ok(()) if CardStatus::from(self.rsp()).state() == state => return Ok(()),
                Ok(()) => {}
                Err(err) => log::trace!("CMD13 failed: {}", err),
            }

            if deadline.expired(&self.clock) {
                log::debug!("timeout waiting for card state {:?}", state);
                return Err(InitError::timeout(stage));
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
