//! Column bit remapper.
//!
//! The column shift registers are wired so that, within every byte, the upper four
//! outputs come out in reverse order. Each column word is corrected once on its way into a
//! column buffer: the low nibble of every byte passes through, the high nibble is
//! bit-reversed.
//!
//! The mapping is its own inverse, so remapping a word twice gives back the original.

/// Byte-level lookup table for [`remap_byte`].
pub const REMAP_TABLE: [u8; 256] = build_remap_table();

/// Remaps one byte: low nibble unchanged, high nibble bit-reversed.
///
/// ```
/// use shift_matrix::remap::remap_byte;
///
/// assert_eq!(remap_byte(0xA5), 0x55);
/// assert_eq!(remap_byte(0x1F), 0x8F);
/// ```
#[must_use]
pub const fn remap_byte(byte: u8) -> u8 {
    let high = byte >> 4;
    let reversed = ((high & 0b0001) << 3)
        | ((high & 0b0010) << 1)
        | ((high & 0b0100) >> 1)
        | ((high & 0b1000) >> 3);
    (reversed << 4) | (byte & 0x0F)
}

/// Remaps every byte of a column word.
#[must_use]
pub const fn remap_word(word: u32) -> u32 {
    let [b0, b1, b2, b3] = word.to_le_bytes();
    u32::from_le_bytes([
        REMAP_TABLE[b0 as usize],
        REMAP_TABLE[b1 as usize],
        REMAP_TABLE[b2 as usize],
        REMAP_TABLE[b3 as usize],
    ])
}

/// Remaps a whole frame of column words into `destination`.
pub fn remap_frame(source: &[u32], destination: &mut [u32]) {
    for (out, word) in destination.iter_mut().zip(source) {
        *out = remap_word(*word);
    }
}

const fn build_remap_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < 256 {
        table[index] = remap_byte((index & 0xFF) as u8);
        index += 1;
    }
    table
}
