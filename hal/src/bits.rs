//! # Bit-field codec
//!
//! Helpers for building command arguments and decoding response words.
//! Values wider than their mask are truncated, never rejected: card
//! standards define fields by position and width only.

/// Read the field `mask` located at bit `pos` of `word`
#[inline]
pub const fn get(word: u32, pos: u32, mask: u32) -> u32 {
    (word >> pos) & mask
}

/// Write `value & mask` at bit `pos` of `word`, clearing the field first
#[inline]
pub fn set_n(word: &mut u32, pos: u32, mask: u32, value: u32) {
    *word = (*word & !(mask << pos)) | ((value & mask) << pos);
}

/// Set bit `pos` of `word`
#[inline]
pub fn set(word: &mut u32, pos: u32) {
    *word |= 1 << pos;
}

/// Check bit `pos` of `word`
#[inline]
pub const fn is_set(word: u32, pos: u32) -> bool {
    get(word, pos, 1) == 1
}

// =============================================================================
// TESTS
// =============================================================================
