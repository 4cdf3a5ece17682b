//! Controller instance configuration

use usdhc_hal::ClockDivider;

/// Default data bus width
pub const DEFAULT_BUS_WIDTH: u8 = 4;

/// Card clock settings for each bring-up phase
///
/// Defaults assume a 198 MHz uSDHC root clock, where `sdclkfs` selects a
/// power of two prescaler (doubled in DDR mode) and `dvs` a linear divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Operating frequency after identification (25 MHz)
    pub operating: ClockDivider,
    /// High speed single data rate (50 MHz)
    pub high_speed_sdr: ClockDivider,
    /// High speed dual data rate (50 MHz DDR)
    pub high_speed_ddr: ClockDivider,
}

impl ClockConfig {
    /// Default i.MX6 settings
    pub const fn new() -> Self {
        Self {
            // 198 MHz / (4 * 2)
            operating: ClockDivider::new(1, 0x02),
            // 198 MHz / 4
            high_speed_sdr: ClockDivider::new(0, 0x02),
            // 198 MHz / (2 * 2)
            high_speed_ddr: ClockDivider::new(0, 0x01),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller instance configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Controller index, also used to derive the eMMC relative address
    pub slot: u8,
    /// Physical data bus width in lines
    pub bus_width: u8,
    /// Card clock settings
    pub clocks: ClockConfig,
}

impl Config {
    /// Configuration for controller `slot` with defaults
    pub const fn new(slot: u8) -> Self {
        Self {
            slot,
            bus_width: DEFAULT_BUS_WIDTH,
            clocks: ClockConfig::new(),
        }
    }

    /// Set the bus width
    pub const fn with_bus_width(mut self, width: u8) -> Self {
        self.bus_width = width;
        self
    }

    /// Set the clock settings
    pub const fn with_clocks(mut self, clocks: ClockConfig) -> Self {
        self.clocks = clocks;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
