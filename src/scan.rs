//! The scan protocol shared by every backend.
//!
//! Two sequencers cooperate to scan the panel one row at a time:
//!
//! - The column-shift sequencer ([`CspState`]) pulls a 32-bit column word, shifts it
//!   MSB first into the shift-register chain (data set while the clock is low, sampled
//!   on the rising edge), pulses the latch, and raises the *latch done* flag.
//! - The row-control sequencer ([`RcpState`]) turns every row off, pulls the next
//!   active-low row pattern, raises the *row ready* flag, waits for *latch done*, drives
//!   the pattern onto the row lines, and dwells.
//!
//! Each flag is consumed by the side that waits on it, so the pair forms a strict two-phase
//! handshake: columns only shift while every row is off, and a row only lights after its
//! data is latched.
//!
//! Both sequencers are fed by endless streams ([`StreamDescriptor`]) that read 8-word
//! ring buffers. A [`ScanBackend`] is anything that can run this protocol: the PIO + DMA
//! hardware backend, or the [`soft`] emulation.

pub mod soft;

#[cfg(not(feature = "host"))]
pub mod pio;

use crate::Result;
use crate::config::MatrixConfig;
use crate::framebuffer::ROWS;
use crate::ring_buffer::{RING_SIZE_BITS, RING_WORDS, RingBuffer};

/// Sequencer flag raised by the row sequencer once every row is off.
pub const ROW_READY_FLAG: u8 = 4;

/// Sequencer flag raised by the column sequencer once new data is latched.
pub const LATCH_DONE_FLAG: u8 = 5;

/// Row-enable lines are active low: only bit `row` is driven low.
#[must_use]
pub const fn row_pattern(row: usize) -> u32 {
    !(1u32 << row) & 0xFF
}

/// Row-pattern buffer contents: entry `r` enables row `r` only.
pub const ROW_PATTERNS: [u32; ROWS] = {
    let mut patterns = [0; ROWS];
    let mut row = 0;
    while row < ROWS {
        patterns[row] = row_pattern(row);
        row += 1;
    }
    patterns
};

/// Row pattern that keeps every row off.
pub const ROWS_OFF: u32 = 0xFF;

/// States of the column-shift sequencer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum CspState {
    /// Blocked until the row sequencer reports every row off.
    WaitRowReady,
    /// Blocked until a column word is queued.
    FetchWord,
    /// Clocking out the word, one bit per clock edge.
    Shift32 {
        /// Bits still to emit.
        remaining: u8,
        /// Whether the clock is high for the current bit.
        clock_high: bool,
    },
    /// Latch pulse; `high` is the level being driven.
    Latch {
        /// Latch line level.
        high: bool,
    },
    /// Raising the latch-done flag.
    SignalLatchDone,
}

/// States of the row-control sequencer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum RcpState {
    /// Driving every row off.
    DisableAll,
    /// Blocked until a row pattern is queued; rows stay off meanwhile.
    FetchPattern,
    /// Raising the row-ready flag.
    SignalSafe,
    /// Blocked until the column sequencer has latched.
    WaitLatchDone,
    /// Driving the fetched pattern onto the row lines.
    EnableRow,
    /// Holding the row on.
    Dwell {
        /// Sequencer cycles left.
        remaining: u32,
    },
}

/// One of the engine's three ring buffers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum BufferId {
    /// First column buffer.
    ColumnA,
    /// Second column buffer.
    ColumnB,
    /// Static row-pattern buffer.
    RowPatterns,
}

/// A ring buffer as seen by a stream: which buffer, and where it lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SourceBuffer {
    /// Which buffer.
    pub id: BufferId,
    /// Byte address of its first word (ring aligned).
    pub address: usize,
}

impl SourceBuffer {
    /// Describes `buffer` as the stream source `id`.
    #[must_use]
    pub const fn new(id: BufferId, buffer: &RingBuffer<'_>) -> Self {
        Self {
            id,
            address: buffer.address(),
        }
    }
}

/// The sequencer a stream feeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum Sequencer {
    /// Column-shift sequencer.
    ColumnShift,
    /// Row-control sequencer.
    RowControl,
}

/// How many units a stream moves before it stops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum TransferCount {
    /// Never stops on its own.
    Endless,
}

/// Everything needed to program one feeder stream.
///
/// The destination is the sequencer's input queue, and the stream is paced by that queue's
/// "has space" request, so it can never overrun.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDescriptor {
    /// Ring-wrapped source.
    pub source: SourceBuffer,
    /// Destination queue, which also paces the stream.
    pub destination: Sequencer,
    /// Bytes per transfer.
    pub unit_bytes: u8,
    /// `log2` of the source ring window in bytes.
    pub ring_size_bits: u8,
    /// Byte address of the word the stream reloads its source address from each time it
    /// wraps. Writing that word is how the source changes while the stream runs.
    pub reload: usize,
    /// Transfer count.
    pub count: TransferCount,
}

impl StreamDescriptor {
    /// An endless word stream from `source` into `destination`'s queue, one ring window per
    /// pass, taking the next pass's source from the word at `reload`.
    #[must_use]
    pub const fn endless(source: SourceBuffer, destination: Sequencer, reload: usize) -> Self {
        Self {
            source,
            destination,
            unit_bytes: 4,
            ring_size_bits: RING_SIZE_BITS,
            reload,
            count: TransferCount::Endless,
        }
    }
}

/// Read-only view of the engine's ring buffers, for feeders that move words in software.
#[derive(Clone, Copy, Debug)]
pub struct ScanMemory<'m> {
    columns: [&'m [u32]; 2],
    rows: &'m [u32],
}

impl<'m> ScanMemory<'m> {
    /// Bundles the two column buffers and the row-pattern buffer.
    #[must_use]
    pub const fn new(column_a: &'m [u32], column_b: &'m [u32], rows: &'m [u32]) -> Self {
        Self {
            columns: [column_a, column_b],
            rows,
        }
    }

    /// The words of buffer `id`.
    #[must_use]
    pub const fn words(&self, id: BufferId) -> &'m [u32] {
        match id {
            BufferId::ColumnA => self.columns[0],
            BufferId::ColumnB => self.columns[1],
            BufferId::RowPatterns => self.rows,
        }
    }

    /// The word at ring position `cursor` of buffer `id`.
    #[must_use]
    pub fn word(&self, id: BufferId, cursor: usize) -> u32 {
        self.words(id)
            .get(cursor % RING_WORDS)
            .copied()
            .unwrap_or(0)
    }
}

/// Software stand-in for a ring-wrapped stream: a source buffer and a position in it.
///
/// Used by feeders that move words with the CPU. Like the DMA reload chain, a redirect only
/// takes effect when the position wraps, so every pass of eight words comes from one buffer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RingCursor {
    source: Option<BufferId>,
    pending: Option<BufferId>,
    position: usize,
}

impl RingCursor {
    /// A cursor attached to no buffer; it feeds nothing.
    pub(crate) const fn idle() -> Self {
        Self {
            source: None,
            pending: None,
            position: 0,
        }
    }

    /// A cursor at the start of `id`.
    pub(crate) const fn armed(id: BufferId) -> Self {
        Self {
            source: Some(id),
            pending: None,
            position: 0,
        }
    }

    /// Moves an armed cursor to buffer `id` at its next wrap, or now if it sits on one.
    pub(crate) fn redirect(&mut self, id: BufferId) {
        let Some(current) = self.source else {
            return;
        };
        if self.position == 0 {
            self.source = Some(id);
            self.pending = None;
        } else if current == id {
            self.pending = None;
        } else {
            self.pending = Some(id);
        }
    }

    /// Whether words of buffer `id` may still be fed.
    pub(crate) fn reads(&self, id: BufferId) -> bool {
        self.source == Some(id)
    }

    /// Offers words to `push` until it refuses one.
    pub(crate) fn feed(&mut self, memory: &ScanMemory<'_>, mut push: impl FnMut(u32) -> bool) {
        while let Some(id) = self.source {
            if !push(memory.word(id, self.position)) {
                return;
            }
            self.position = (self.position + 1) % RING_WORDS;
            if self.position == 0 {
                self.source = self.pending.take().or(self.source);
            }
        }
    }
}

/// The seam between the engine and whatever generates the scan waveform.
///
/// The engine calls these in a fixed order. Start: [`arm`](Self::arm), then
/// [`start_sequencers`](Self::start_sequencers). Stop: [`halt_sequencers`](Self::halt_sequencers),
/// then [`disarm`](Self::disarm). Close: stop, then [`release`](Self::release).
pub trait ScanBackend {
    /// Timing and feeder configuration this backend was built with.
    fn config(&self) -> &MatrixConfig;

    /// Resets both sequencers to their entry state, then programs and starts both feeder
    /// streams so each queue is pre-filled before its sequencer runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot drive its outputs.
    fn arm(
        &mut self,
        columns: &StreamDescriptor,
        rows: &StreamDescriptor,
        memory: &ScanMemory<'_>,
    ) -> Result<()>;

    /// Lets both sequencers run.
    fn start_sequencers(&mut self);

    /// Stops both sequencers and forces every row off. No output follows once this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot drive its outputs.
    fn halt_sequencers(&mut self) -> Result<()>;

    /// Stops both feeder streams.
    fn disarm(&mut self);

    /// Points the live column stream at `source` from its next ring wrap on.
    ///
    /// The engine has already stored `source` in the column reload word, which is all a
    /// hardware reload chain needs; software feeders switch their cursor here.
    fn redirect_columns(&mut self, source: SourceBuffer);

    /// Returns once the column stream can no longer read `retired`, so the producer may
    /// overwrite it. Takes at most one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot drive its outputs while waiting.
    fn settle_columns(&mut self, retired: SourceBuffer, memory: &ScanMemory<'_>) -> Result<()>;

    /// Tops up the sequencer queues when words are moved by software.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot drive its outputs.
    fn refill(&mut self, memory: &ScanMemory<'_>) -> Result<()>;

    /// Gives up the backend's streams and sequencers after the final stop.
    fn release(&mut self);
}
