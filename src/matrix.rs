//! The display engine: lifecycle and double-buffered content updates for a 32×8 matrix.
//!
//! [`LedMatrix`] owns a scan backend, two column buffers, the row-pattern buffer and the
//! streams' reload words, all carved from one word arena. After [`LedMatrix::start`] the
//! backend scans on its own; the producer only calls [`LedMatrix::set_framebuffer`] and
//! [`LedMatrix::swap`] on its own schedule.
//!
//! Each stream restarts from its reload word every eight words, that is once per scan
//! frame. A swap only rewrites the column reload word, so every displayed frame comes whole
//! from one buffer.
//!
//! Lifecycle:
//!
//! | call | `Idle` | `Running` | `Stopped` |
//! |------|--------|-----------|-----------|
//! | `start` | → `Running` | error | → `Running` |
//! | `set_framebuffer` | error | back buffer only | back buffer only |
//! | `swap` | error | publishes | flips roles |
//! | `stop` | error | → `Stopped` | no-op |
//!
//! [`LedMatrix::close`] consumes the engine, so nothing can touch it afterwards.
//!
//! # Example
//!
//! ```
//! use shift_matrix::{
//!     Result,
//!     config::MatrixConfig,
//!     framebuffer::Framebuffer,
//!     matrix::LedMatrix,
//!     ring_buffer::MATRIX_ARENA_WORDS,
//!     scan::soft::SoftScan,
//! };
//! # use core::convert::Infallible;
//! # #[derive(Default)]
//! # struct NoPin;
//! # impl embedded_hal::digital::ErrorType for NoPin { type Error = Infallible; }
//! # impl embedded_hal::digital::OutputPin for NoPin {
//! #     fn set_low(&mut self) -> core::result::Result<(), Infallible> { Ok(()) }
//! #     fn set_high(&mut self) -> core::result::Result<(), Infallible> { Ok(()) }
//! # }
//!
//! fn example() -> Result<()> {
//!     let rows: [NoPin; 8] = Default::default();
//!     let scan = SoftScan::new(NoPin, NoPin, NoPin, rows, MatrixConfig::new());
//!     let mut arena = [0u32; MATRIX_ARENA_WORDS];
//!     let mut matrix = LedMatrix::new(scan, &mut arena)?;
//!
//!     let mut frame = Framebuffer::new();
//!     frame.set_pixel(0, 3, true);
//!     matrix.start(Some(&frame))?;
//!
//!     frame.set_pixel(1, 3, true);
//!     matrix.set_framebuffer(&frame)?; // invisible so far
//!     matrix.swap()?; // now shown
//!
//!     matrix.close()
//! }
//! # example().expect("example runs");
//! ```

use core::sync::atomic::{Ordering, fence};

#[cfg(not(feature = "host"))]
use defmt::{debug, info};
use derive_more::Display;
use embedded_hal::digital::OutputPin;
use static_cell::ConstStaticCell;

use crate::config::ScanTiming;
use crate::double_buffer::DoubleBuffer;
use crate::framebuffer::Framebuffer;
use crate::ring_buffer::{
    MATRIX_ARENA_WORDS, RELOAD_BYTES, RELOAD_WORDS, RING_BYTES, RING_WORDS, RingAllocator,
    RingBuffer,
};
use crate::scan::soft::SoftScan;
use crate::scan::{
    BufferId, ROW_PATTERNS, ScanBackend, ScanMemory, Sequencer, SourceBuffer, StreamDescriptor,
};
use crate::{Error, Resource, Result};

const COLUMN_RELOAD: usize = 0;
const ROW_RELOAD: usize = 1;

/// Engine lifecycle state.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum EngineState {
    /// Built, never started.
    Idle,
    /// Scanning.
    Running,
    /// Halted; may be restarted or closed.
    Stopped,
}

/// Producer-facing operations, as reported in [`Error::InvalidState`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum Operation {
    /// [`LedMatrix::start`].
    Start,
    /// [`LedMatrix::set_framebuffer`].
    SetFramebuffer,
    /// [`LedMatrix::swap`].
    Swap,
    /// [`LedMatrix::stop`].
    Stop,
}

/// Static arena for an engine that lives for the whole program.
///
/// ```
/// use shift_matrix::matrix::MatrixStatic;
///
/// static MATRIX_STATIC: MatrixStatic = MatrixStatic::new_static();
///
/// let arena = MATRIX_STATIC.arena().expect("first claim succeeds");
/// assert_eq!(arena.len(), shift_matrix::ring_buffer::MATRIX_ARENA_WORDS);
/// assert!(MATRIX_STATIC.arena().is_err());
/// ```
pub struct MatrixStatic {
    arena: ConstStaticCell<[u32; MATRIX_ARENA_WORDS]>,
}

impl MatrixStatic {
    /// Creates the static storage.
    #[must_use]
    pub const fn new_static() -> Self {
        Self {
            arena: ConstStaticCell::new([0; MATRIX_ARENA_WORDS]),
        }
    }

    /// Claims the arena. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the arena was already claimed.
    pub fn arena(&'static self) -> Result<&'static mut [u32; MATRIX_ARENA_WORDS]> {
        self.arena.try_take().ok_or(Error::ResourceExhausted {
            resource: Resource::EngineStatic,
        })
    }
}

/// Autonomous display engine for a 32×8 shift-register LED matrix.
///
/// See the [module documentation](mod@crate::matrix) for the lifecycle and an example.
pub struct LedMatrix<'a, B: ScanBackend> {
    backend: B,
    columns: DoubleBuffer<'a>,
    rows: RingBuffer<'a>,
    reload: RingBuffer<'a>,
    timing: ScanTiming,
    state: EngineState,
    released: bool,
}

impl<'a, B: ScanBackend> LedMatrix<'a, B> {
    /// Validates the backend's configuration and carves the ring buffers from `arena`.
    ///
    /// The arena is borrowed for the engine's whole life, so the buffers the streams read
    /// cannot be freed underneath them. [`MATRIX_ARENA_WORDS`] is always enough.
    ///
    /// # Errors
    ///
    /// A configuration error from [`MatrixConfig::validate`](crate::config::MatrixConfig::validate),
    /// or [`Error::ResourceExhausted`] if the arena is too small.
    pub fn new(backend: B, arena: &'a mut [u32]) -> Result<Self> {
        let timing = backend.config().validate()?;
        let mut allocator = RingAllocator::new(arena);
        let column_a = allocator.allocate(RING_WORDS, RING_BYTES)?;
        let column_b = allocator.allocate(RING_WORDS, RING_BYTES)?;
        let mut rows = allocator.allocate(RING_WORDS, RING_BYTES)?;
        for (word, pattern) in rows.words_mut().iter_mut().zip(ROW_PATTERNS) {
            *word = pattern;
        }
        let mut reload = allocator.allocate(RELOAD_WORDS, RELOAD_BYTES)?;
        reload.words_mut().fill(0);
        #[cfg(not(feature = "host"))]
        info!(
            "LedMatrix::new: buffers at {=usize:#x}, {=usize:#x}, rows at {=usize:#x}, reload at {=usize:#x}; {} Hz rows, {} Hz frames",
            column_a.address(),
            column_b.address(),
            rows.address(),
            reload.address(),
            timing.row_hz,
            timing.frame_hz
        );
        Ok(Self {
            backend,
            columns: DoubleBuffer::new(column_a, column_b),
            rows,
            reload,
            timing,
            state: EngineState::Idle,
            released: false,
        })
    }

    /// Arms the feeders and starts scanning.
    ///
    /// With `initial`, that frame is the first thing shown. Without it, the scan shows
    /// whatever was last swapped in (blank on a fresh engine).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if already running, or a backend error.
    pub fn start(&mut self, initial: Option<&Framebuffer>) -> Result<()> {
        self.check(Operation::Start, &[EngineState::Idle, EngineState::Stopped])?;
        if let Some(frame) = initial {
            self.columns.write(frame);
            self.columns.swap();
        }
        let front = self.columns.front_source();
        let row_source = SourceBuffer::new(BufferId::RowPatterns, &self.rows);
        self.set_reload(COLUMN_RELOAD, front);
        self.set_reload(ROW_RELOAD, row_source);
        let columns = StreamDescriptor::endless(
            front,
            Sequencer::ColumnShift,
            self.reload_address(COLUMN_RELOAD),
        );
        let rows = StreamDescriptor::endless(
            row_source,
            Sequencer::RowControl,
            self.reload_address(ROW_RELOAD),
        );
        let memory = scan_memory(&self.columns, &self.rows);
        if let Err(err) = self.backend.arm(&columns, &rows, &memory) {
            self.backend.disarm();
            return Err(err);
        }
        self.backend.start_sequencers();
        self.state = EngineState::Running;
        #[cfg(not(feature = "host"))]
        info!("LedMatrix::start: scanning from {=usize:#x}", front.address);
        Ok(())
    }

    /// Writes `frame` (remapped) into the back buffer. Nothing changes on the panel until
    /// [`swap`](Self::swap).
    ///
    /// Right after a swap the column stream may still be finishing its frame from the
    /// buffer that just became the back. In that case this waits for the frame to end
    /// (at most one frame) before writing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before the first [`start`](Self::start), or a backend error
    /// while waiting.
    pub fn set_framebuffer(&mut self, frame: &Framebuffer) -> Result<()> {
        self.check(
            Operation::SetFramebuffer,
            &[EngineState::Running, EngineState::Stopped],
        )?;
        if self.state == EngineState::Running {
            let back = self.columns.back_source();
            let memory = scan_memory(&self.columns, &self.rows);
            self.backend.settle_columns(back, &memory)?;
        }
        self.columns.write(frame);
        Ok(())
    }

    /// Publishes the back buffer.
    ///
    /// The roles flip, then the new front's address goes into the column reload word with a
    /// single aligned write. The stream finishes the frame it is on from the old buffer and
    /// takes the new one at its next ring wrap, so no displayed frame mixes two writes.
    /// A stopped engine only flips the roles; the next start streams the new front.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before the first [`start`](Self::start).
    pub fn swap(&mut self) -> Result<()> {
        self.check(Operation::Swap, &[EngineState::Running, EngineState::Stopped])?;
        let front = self.columns.swap();
        // The back-buffer writes must land before the stream can read them.
        fence(Ordering::SeqCst);
        self.set_reload(COLUMN_RELOAD, front);
        if self.state == EngineState::Running {
            self.backend.redirect_columns(front);
        }
        #[cfg(not(feature = "host"))]
        debug!("LedMatrix::swap: front at {=usize:#x}", front.address);
        Ok(())
    }

    /// Halts the sequencers (rows off), then the feeders. Once this returns the panel is
    /// dark and stays dark until [`start`](Self::start). Stopping a stopped engine does
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] before the first [`start`](Self::start), or a backend error
    /// while forcing the rows off (the feeders are stopped regardless).
    pub fn stop(&mut self) -> Result<()> {
        self.check(Operation::Stop, &[EngineState::Running, EngineState::Stopped])?;
        if self.state == EngineState::Stopped {
            return Ok(());
        }
        let halted = self.backend.halt_sequencers();
        self.backend.disarm();
        self.state = EngineState::Stopped;
        #[cfg(not(feature = "host"))]
        info!("LedMatrix::stop: stopped");
        halted
    }

    /// Tops up the sequencer queues when the backend is fed by software
    /// ([`FeedMode::Polling`](crate::config::FeedMode::Polling)). Call it at least once per
    /// few rows; a late call only stalls the scan with every row off.
    ///
    /// Does nothing unless running.
    ///
    /// # Errors
    ///
    /// A backend error.
    pub fn refill(&mut self) -> Result<()> {
        if self.state != EngineState::Running {
            return Ok(());
        }
        let memory = scan_memory(&self.columns, &self.rows);
        self.backend.refill(&memory)
    }

    /// Stops the engine if needed and releases the backend's streams and sequencers.
    ///
    /// # Errors
    ///
    /// A backend error from the final [`stop`](Self::stop); resources are released anyway.
    pub fn close(mut self) -> Result<()> {
        let result = self.shutdown();
        #[cfg(not(feature = "host"))]
        info!("LedMatrix::close: released");
        result
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Row and frame rates of the configured scan.
    #[must_use]
    pub const fn timing(&self) -> ScanTiming {
        self.timing
    }

    /// Remapped words the column stream is (or will be) reading.
    #[must_use]
    pub fn front_words(&self) -> &[u32] {
        self.columns.front_words()
    }

    /// Remapped words of the back buffer.
    #[must_use]
    pub fn back_words(&self) -> &[u32] {
        self.columns.back_words()
    }

    /// Row-pattern buffer contents.
    #[must_use]
    pub fn row_words(&self) -> &[u32] {
        self.rows.words()
    }

    /// Source addresses the column and row streams restart from at every ring wrap.
    #[must_use]
    pub fn reload_words(&self) -> &[u32] {
        self.reload.words()
    }

    /// The scan backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    fn check(&self, operation: Operation, allowed: &[EngineState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn reload_address(&self, index: usize) -> usize {
        self.reload.address() + index * core::mem::size_of::<u32>()
    }

    fn set_reload(&mut self, index: usize, source: SourceBuffer) {
        if let Some(word) = self.reload.words_mut().get_mut(index) {
            // Bus addresses are 32 bits wide.
            *word = source.address as u32;
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let result = if self.state == EngineState::Running {
            self.stop()
        } else {
            Ok(())
        };
        self.backend.release();
        self.released = true;
        result
    }
}

impl<B: ScanBackend> Drop for LedMatrix<'_, B> {
    fn drop(&mut self) {
        // Dropping without close() still halts the scan before the buffers go away.
        let _ = self.shutdown();
    }
}

impl<P: OutputPin> LedMatrix<'_, SoftScan<P>> {
    /// Advances the software scanner by one sequencer cycle.
    ///
    /// # Errors
    ///
    /// [`Error::Pin`] if a pin cannot be driven.
    pub fn tick(&mut self) -> Result<()> {
        let memory = scan_memory(&self.columns, &self.rows);
        self.backend.tick(&memory)
    }

    /// Advances the software scanner by `cycles` sequencer cycles.
    ///
    /// # Errors
    ///
    /// [`Error::Pin`] if a pin cannot be driven.
    pub fn run_cycles(&mut self, cycles: usize) -> Result<()> {
        for _ in 0..cycles {
            self.tick()?;
        }
        Ok(())
    }
}

fn scan_memory<'m>(columns: &'m DoubleBuffer<'_>, rows: &'m RingBuffer<'_>) -> ScanMemory<'m> {
    ScanMemory::new(
        columns.words_of(BufferId::ColumnA),
        columns.words_of(BufferId::ColumnB),
        rows.words(),
    )
}
