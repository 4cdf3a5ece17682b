//! Card table
//!
//! Descriptors of cards brought up by [`Usdhc::detect`](crate::Usdhc::detect),
//! indexed by controller slot, for block drivers running elsewhere.

use spin::RwLock;

use crate::card::CardInfo;

/// Number of uSDHC controller instances
pub const MAX_SLOTS: usize = 4;

static CARDS: RwLock<[Option<CardInfo>; MAX_SLOTS]> = RwLock::new([None; MAX_SLOTS]);

/// Record the card ready in `slot`, false if the slot does not exist
pub fn publish(slot: u8, card: CardInfo) -> bool {
    match CARDS.write().get_mut(slot as usize) {
        Some(entry) => {
            *entry = Some(card);
            true
        }
        None => false,
    }
}

/// Card ready in `slot`
pub fn card(slot: u8) -> Option<CardInfo> {
    CARDS.read().get(slot as usize).copied().flatten()
}

/// Forget the card in `slot`
pub fn clear(slot: u8) {
    if let Some(entry) = CARDS.write().get_mut(slot as usize) {
        *entry = None;
    }
}

// =============================================================================
// TESTS
// =============================================================================
