//! Card descriptor
//!
//! Filled in by the SD or eMMC initializer, then handed read-only to the
//! block layer.

use core::fmt;

/// Card family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    /// SD memory card
    Sd,
    /// MMC / eMMC device
    Mmc,
}

/// Card descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardInfo {
    /// Card family, set once voltage validation succeeds
    pub kind: Option<CardKind>,
    /// Sector addressing (SDHC/SDXC, eMMC sector mode)
    pub high_capacity: bool,
    /// Bytes per block
    pub block_size: u32,
    /// Number of addressable blocks
    pub block_count: u64,
    /// High speed mode enabled
    pub high_speed: bool,
    /// eMMC dual data rate enabled
    pub ddr: bool,
    /// Relative card address
    pub rca: u16,
    /// Raw CID as latched from CMD2
    pub cid: [u32; 4],
}

impl CardInfo {
    /// Capacity in bytes
    pub const fn capacity(&self) -> u64 {
        self.block_size as u64 * self.block_count
    }

    /// Whether this is an SD card
    pub fn is_sd(&self) -> bool {
        self.kind == Some(CardKind::Sd)
    }

    /// Whether this is an eMMC device
    pub fn is_mmc(&self) -> bool {
        self.kind == Some(CardKind::Mmc)
    }

    /// Decoded card identification
    pub const fn cid(&self) -> Cid {
        Cid::new(self.cid)
    }
}

impl fmt::Display for CardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Some(CardKind::Sd) => "SD",
            Some(CardKind::Mmc) => "MMC",
            None => "none",
        };

        write!(
            f,
            "{} {} blocks of {} bytes ({} MiB){}{}{}",
            kind,
            self.block_count,
            self.block_size,
            self.capacity() >> 20,
            if self.high_capacity { " HC" } else { "" },
            if self.high_speed { " HS" } else { "" },
            if self.ddr { " DDR" } else { "" },
        )
    }
}

// =============================================================================
// CID (Card Identification) REGISTER
// =============================================================================

/// CID register view
///
/// The raw words are the latched R2 response, which lacks the CRC byte:
/// byte 0 of [`Cid::bytes`] is CID bits [127:120].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid {
    raw: [u32; 4],
}

impl Cid {
    /// Wrap latched response words
    pub const fn new(raw: [u32; 4]) -> Self {
        Self { raw }
    }

    /// CID bits [127:8] as big-endian bytes, CRC byte zeroed
    pub fn bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];

        for (i, word) in self.raw.iter().rev().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }

        // shift left by one byte to restore register alignment
        out.copy_within(1.., 0);
        out[15] = 0;
        out
    }

    /// Manufacturer ID (MID)
    pub fn manufacturer_id(&self) -> u8 {
        self.bytes()[0]
    }

    /// SD OEM/Application ID (OID)
    pub fn sd_oem_id(&self) -> [u8; 2] {
        let b = self.bytes();
        [b[1], b[2]]
    }

    /// SD product name (PNM)
    pub fn sd_product_name(&self) -> [u8; 5] {
        let b = self.bytes();
        [b[3], b[4], b[5], b[6], b[7]]
    }

    /// SD product revision (major, minor)
    pub fn sd_revision(&self) -> (u8, u8) {
        let prv = self.bytes()[8];
        (prv >> 4, prv & 0x0f)
    }

    /// SD product serial number (PSN)
    pub fn sd_serial(&self) -> u32 {
        let b = self.bytes();
        u32::from_be_bytes([b[9], b[10], b[11], b[12]])
    }

    /// eMMC OEM/Application ID (OID)
    pub fn mmc_oem_id(&self) -> u8 {
        self.bytes()[2]
    }

    /// eMMC product name (PNM)
    pub fn mmc_product_name(&self) -> [u8; 6] {
        let b = self.bytes();
        [b[3], b[4], b[5], b[6], b[7], b[8]]
    }

    /// eMMC product serial number (PSN)
    pub fn mmc_serial(&self) -> u32 {
        let b = self.bytes();
        u32::from_be_bytes([b[10], b[11], b[12], b[13]])
    }
}

// =============================================================================
// TESTS
// =============================================================================
