//! Front/back column buffers.
//!
//! The front buffer belongs to the column feeder and is only read by it; the back buffer
//! belongs to the producer. [`DoubleBuffer::write`] remaps a frame into the back buffer and
//! has no visible effect. [`DoubleBuffer::swap`] flips the roles and returns the new
//! front, which the engine hands to the column stream with one aligned address write.
//!
//! Ownership never overlaps: nothing here writes to the front buffer.

use crate::framebuffer::Framebuffer;
use crate::remap::remap_frame;
use crate::ring_buffer::RingBuffer;
use crate::scan::{BufferId, SourceBuffer};

/// Two ring-aligned column buffers with a front/back role.
#[derive(Debug)]
pub struct DoubleBuffer<'a> {
    buffers: [RingBuffer<'a>; 2],
    front: usize,
}

impl<'a> DoubleBuffer<'a> {
    /// Starts with `first` as the front buffer. Both buffers must be ring aligned.
    #[must_use]
    pub fn new(mut first: RingBuffer<'a>, mut second: RingBuffer<'a>) -> Self {
        // Zero is a fixed point of the remapper, so cleared buffers are valid content.
        first.words_mut().fill(0);
        second.words_mut().fill(0);
        Self {
            buffers: [first, second],
            front: 0,
        }
    }

    /// Remaps `frame` into the back buffer.
    pub fn write(&mut self, frame: &Framebuffer) {
        let back = self.back_index();
        if let Some(buffer) = self.buffers.get_mut(back) {
            remap_frame(&frame.0, buffer.words_mut());
        }
    }

    /// Makes the back buffer the front and returns it as a stream source.
    pub fn swap(&mut self) -> SourceBuffer {
        self.front = self.back_index();
        self.front_source()
    }

    /// The current front buffer as a stream source.
    #[must_use]
    pub fn front_source(&self) -> SourceBuffer {
        self.source(self.front)
    }

    /// The current back buffer as a stream source.
    #[must_use]
    pub fn back_source(&self) -> SourceBuffer {
        self.source(self.back_index())
    }

    /// Remapped words of the front buffer.
    #[must_use]
    pub fn front_words(&self) -> &[u32] {
        self.words(self.front)
    }

    /// Remapped words of the back buffer.
    #[must_use]
    pub fn back_words(&self) -> &[u32] {
        self.words(self.back_index())
    }

    /// Words of the buffer with identity `id`; row patterns are not held here.
    #[must_use]
    pub fn words_of(&self, id: BufferId) -> &[u32] {
        match id {
            BufferId::ColumnA => self.words(0),
            BufferId::ColumnB => self.words(1),
            BufferId::RowPatterns => &[],
        }
    }

    const fn back_index(&self) -> usize {
        1 - self.front
    }

    fn words(&self, index: usize) -> &[u32] {
        match self.buffers.get(index) {
            Some(buffer) => buffer.words(),
            None => &[],
        }
    }

    fn source(&self, index: usize) -> SourceBuffer {
        let id = if index == 0 {
            BufferId::ColumnA
        } else {
            BufferId::ColumnB
        };
        let address = self.buffers.get(index).map_or(0, RingBuffer::address);
        SourceBuffer { id, address }
    }
}
