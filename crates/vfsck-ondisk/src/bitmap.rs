//! Allocation bitmap bit operations.
//!
//! One bit per block, bit index = block address, least significant bit first
//! within each byte. Indices past the end of the slice read as clear and
//! ignore writes.

use vfsck_types::BlockNumber;

fn locate(block: BlockNumber) -> (usize, u8) {
    ((block.0 / 8) as usize, (block.0 % 8) as u8)
}

/// Get the bit for `block`.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], block: BlockNumber) -> bool {
    let (byte_idx, bit_idx) = locate(block);
    bitmap
        .get(byte_idx)
        .is_some_and(|byte| (byte >> bit_idx) & 1 == 1)
}

/// Set the bit for `block`.
pub fn bitmap_set(bitmap: &mut [u8], block: BlockNumber) {
    let (byte_idx, bit_idx) = locate(block);
    if let Some(byte) = bitmap.get_mut(byte_idx) {
        *byte |= 1 << bit_idx;
    }
}

/// Clear the bit for `block`.
pub fn bitmap_clear(bitmap: &mut [u8], block: BlockNumber) {
    let (byte_idx, bit_idx) = locate(block);
    if let Some(byte) = bitmap.get_mut(byte_idx) {
        *byte &= !(1 << bit_idx);
    }
}
