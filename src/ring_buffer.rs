//! Aligned ring-buffer allocation for DMA ring-wrap addressing.
//!
//! The DMA ring mode wraps the read address inside a `2^n`-byte window, so every buffer
//! the feeder streams from must start on exactly that boundary. [`RingAllocator`] carves
//! such blocks out of an over-sized word arena: it skips forward to the next aligned
//! word, hands out the block, and keeps the rest for later requests.
//!
//! The arena is borrowed for `'a`, and every block borrows from it. The raw allocation
//! therefore cannot be freed while a block, and the DMA stream pointed at it, is alive.

use core::mem;

use crate::{Error, Resource, Result};

/// Words in one column or row-pattern buffer (one per row).
pub const RING_WORDS: usize = 8;

/// `log2` of the ring window in bytes, as programmed into the DMA ring-size field.
pub const RING_SIZE_BITS: u8 = 5;

/// Ring window in bytes. Buffers are aligned to this boundary.
pub const RING_BYTES: usize = 1 << RING_SIZE_BITS;

const WORD_BYTES: usize = mem::size_of::<u32>();

// The window must hold exactly one buffer.
const _: () = assert!(RING_BYTES == RING_WORDS * WORD_BYTES);

/// Number of ring buffers an engine needs: two column buffers and one row-pattern buffer.
pub const ENGINE_RING_COUNT: usize = 3;

/// Words holding the address each stream restarts from at its ring wrap: one for the
/// column stream, one for the row-pattern stream.
pub const RELOAD_WORDS: usize = 2;

/// Alignment of the reload block.
pub const RELOAD_BYTES: usize = RELOAD_WORDS * WORD_BYTES;

/// Arena size that always fits the engine's buffers, wherever the arena lands in memory.
pub const MATRIX_ARENA_WORDS: usize = arena_words(ENGINE_RING_COUNT, RING_WORDS, RING_BYTES)
    + arena_words(1, RELOAD_WORDS, RELOAD_BYTES);

/// Arena words needed to allocate `count` blocks of `words` words aligned to `align` bytes,
/// assuming the worst-case start address.
#[must_use]
pub const fn arena_words(count: usize, words: usize, align: usize) -> usize {
    let slack = if align > WORD_BYTES {
        align / WORD_BYTES - 1
    } else {
        0
    };
    count * (words + slack)
}

/// `log2` of a power-of-two ring window, if it is one.
#[must_use]
pub const fn ring_size_bits(align: usize) -> Option<u8> {
    if align.is_power_of_two() {
        Some(align.trailing_zeros() as u8)
    } else {
        None
    }
}

/// Words to skip from `address` to reach the next `align`-byte boundary.
///
/// `address` is assumed word aligned and `align` a power of two.
#[must_use]
pub const fn aligned_offset(address: usize, align: usize) -> usize {
    let misalignment = address & (align - 1);
    if misalignment == 0 {
        0
    } else {
        (align - misalignment) / WORD_BYTES
    }
}

/// A word block whose base address sits on its ring boundary.
pub struct RingBuffer<'a> {
    words: &'a mut [u32],
    address: usize,
    ring_size_bits: u8,
}

impl RingBuffer<'_> {
    /// Byte address of the first word.
    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    /// `log2` of the ring window this block was aligned for.
    #[must_use]
    pub const fn ring_size_bits(&self) -> u8 {
        self.ring_size_bits
    }

    /// Number of words in the block.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the block has no words.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The block's words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &*self.words
    }

    /// The block's words, writable.
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut *self.words
    }
}

impl core::fmt::Debug for RingBuffer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("address", &format_args!("{:#010x}", self.address))
            .field("len", &self.words.len())
            .finish()
    }
}

/// Hands out aligned blocks from a borrowed word arena.
///
/// Blocks are never returned to the arena; the allocator serves the engine's fixed set of
/// buffers once, at construction.
pub struct RingAllocator<'a> {
    free: &'a mut [u32],
}

impl<'a> RingAllocator<'a> {
    /// Wraps `arena` as the allocator's free space.
    #[must_use]
    pub const fn new(arena: &'a mut [u32]) -> Self {
        Self { free: arena }
    }

    /// Words still unallocated (including any future alignment padding).
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.free.len()
    }

    /// Allocates `words` words whose base address is a multiple of `align` bytes.
    ///
    /// `align` must be a power of two of at least `4 * words` bytes, so the block fits
    /// inside one ring window and the window wraps exactly at the block's end.
    ///
    /// # Errors
    ///
    /// [`Error::AlignmentViolation`] if `align` is not such a power of two, and
    /// [`Error::ResourceExhausted`] if the arena has no room left for the aligned block.
    pub fn allocate(&mut self, words: usize, align: usize) -> Result<RingBuffer<'a>> {
        let violation = Error::AlignmentViolation { words, align };
        let ring_size_bits = ring_size_bits(align).ok_or(violation)?;
        let block_bytes = words.checked_mul(WORD_BYTES).ok_or(violation)?;
        if words == 0 || align < WORD_BYTES || align < block_bytes {
            return Err(violation);
        }

        let free = mem::take(&mut self.free);
        let skip = aligned_offset(free.as_ptr() as usize, align);
        let exhausted = Error::ResourceExhausted {
            resource: Resource::RingMemory,
        };
        let Some(needed) = skip.checked_add(words).filter(|needed| *needed <= free.len()) else {
            self.free = free;
            return Err(exhausted);
        };
        let (taken, rest) = free.split_at_mut(needed);
        self.free = rest;
        let (_, block) = taken.split_at_mut(skip);
        let address = block.as_ptr() as usize;
        debug_assert_eq!(address % align, 0);
        Ok(RingBuffer {
            words: block,
            address,
            ring_size_bits,
        })
    }
}
