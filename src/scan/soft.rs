//! Software emulation of the scan protocol on plain output pins.
//!
//! [`SoftScan`] runs the same two sequencers and feeders as the PIO backend, one
//! sequencer cycle per [`SoftScan::tick`]. Call it from a fixed-rate timer (or a test loop)
//! to drive a panel on chips without programmable I/O. The ordering guarantees match the
//! hardware: columns shift only while rows are off, and rows light only after a latch.
//!
//! With [`FeedMode::Dma`] the feeders top up both queues on every tick; with
//! [`FeedMode::Polling`] words only move when [`ScanBackend::refill`] is called. Either way
//! a redirected column feed switches buffers only at its ring wrap.

use embedded_hal::digital::OutputPin;
use heapless::Deque;

use crate::config::{FeedMode, MatrixConfig};
use crate::framebuffer::ROWS;
use crate::scan::{
    CspState, RcpState, ROWS_OFF, RingCursor, ScanBackend, ScanMemory, SourceBuffer,
    StreamDescriptor,
};
use crate::{Error, Result};

/// Depth of each sequencer input queue (a joined PIO TX FIFO holds eight words).
pub const QUEUE_DEPTH: usize = 8;

const COLUMN_BITS: u8 = 32;
const MSB: u32 = 1 << 31;

/// Column-shift and row-control sequencers emulated on GPIO outputs.
///
/// All pins share one type `P`, which is what HALs hand out for plain push-pull outputs.
/// `rows[r]` drives row `r` and is active low.
pub struct SoftScan<P> {
    config: MatrixConfig,
    data: P,
    clock: P,
    latch: P,
    rows: [P; ROWS],
    column_feed: RingCursor,
    row_feed: RingCursor,
    column_queue: Deque<u32, QUEUE_DEPTH>,
    row_queue: Deque<u32, QUEUE_DEPTH>,
    csp: CspState,
    rcp: RcpState,
    shift_register: u32,
    row_register: u32,
    row_ready: bool,
    latch_done: bool,
    running: bool,
}

impl<P: OutputPin> SoftScan<P> {
    /// Wraps the panel pins. Nothing is driven until the engine arms the scan.
    #[must_use]
    pub const fn new(data: P, clock: P, latch: P, rows: [P; ROWS], config: MatrixConfig) -> Self {
        Self {
            config,
            data,
            clock,
            latch,
            rows,
            column_feed: RingCursor::idle(),
            row_feed: RingCursor::idle(),
            column_queue: Deque::new(),
            row_queue: Deque::new(),
            csp: CspState::WaitRowReady,
            rcp: RcpState::DisableAll,
            shift_register: 0,
            row_register: ROWS_OFF,
            row_ready: false,
            latch_done: false,
            running: false,
        }
    }

    /// Advances feeders and both sequencers by one cycle.
    ///
    /// # Errors
    ///
    /// [`Error::Pin`] if a pin cannot be driven.
    pub fn tick(&mut self, memory: &ScanMemory<'_>) -> Result<()> {
        if self.config.feed == FeedMode::Dma {
            self.top_up(memory);
        }
        if !self.running {
            return Ok(());
        }
        self.step_column_shift()?;
        self.step_row_control()
    }

    /// Current column-sequencer state.
    #[must_use]
    pub const fn column_state(&self) -> CspState {
        self.csp
    }

    /// Current row-sequencer state.
    #[must_use]
    pub const fn row_state(&self) -> RcpState {
        self.rcp
    }

    /// Words waiting in the column queue.
    #[must_use]
    pub fn queued_columns(&self) -> usize {
        self.column_queue.len()
    }

    /// Words waiting in the row queue.
    #[must_use]
    pub fn queued_rows(&self) -> usize {
        self.row_queue.len()
    }

    /// Whether the sequencers are running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Consumes the scanner, returning its pins as `(data, clock, latch, rows)`.
    pub fn into_pins(self) -> (P, P, P, [P; ROWS]) {
        (self.data, self.clock, self.latch, self.rows)
    }

    fn top_up(&mut self, memory: &ScanMemory<'_>) {
        let column_queue = &mut self.column_queue;
        self.column_feed
            .feed(memory, |word| column_queue.push_back(word).is_ok());
        let row_queue = &mut self.row_queue;
        self.row_feed
            .feed(memory, |word| row_queue.push_back(word).is_ok());
    }

    fn step_column_shift(&mut self) -> Result<()> {
        self.csp = match self.csp {
            CspState::WaitRowReady => {
                if self.row_ready {
                    self.row_ready = false;
                    CspState::FetchWord
                } else {
                    CspState::WaitRowReady
                }
            }
            CspState::FetchWord => match self.column_queue.pop_front() {
                Some(word) => {
                    self.shift_register = word;
                    CspState::Shift32 {
                        remaining: COLUMN_BITS,
                        clock_high: false,
                    }
                }
                None => CspState::FetchWord,
            },
            CspState::Shift32 {
                remaining,
                clock_high: false,
            } => {
                let bit = self.shift_register & MSB != 0;
                self.shift_register <<= 1;
                self.clock.set_low().map_err(|_| Error::Pin)?;
                self.data.set_state(bit.into()).map_err(|_| Error::Pin)?;
                CspState::Shift32 {
                    remaining,
                    clock_high: true,
                }
            }
            CspState::Shift32 {
                remaining,
                clock_high: true,
            } => {
                self.clock.set_high().map_err(|_| Error::Pin)?;
                match remaining.saturating_sub(1) {
                    0 => CspState::Latch { high: true },
                    remaining => CspState::Shift32 {
                        remaining,
                        clock_high: false,
                    },
                }
            }
            CspState::Latch { high: true } => {
                self.clock.set_low().map_err(|_| Error::Pin)?;
                self.latch.set_high().map_err(|_| Error::Pin)?;
                CspState::Latch { high: false }
            }
            CspState::Latch { high: false } => {
                self.latch.set_low().map_err(|_| Error::Pin)?;
                CspState::SignalLatchDone
            }
            CspState::SignalLatchDone => {
                self.latch_done = true;
                CspState::WaitRowReady
            }
        };
        Ok(())
    }

    fn step_row_control(&mut self) -> Result<()> {
        self.rcp = match self.rcp {
            RcpState::DisableAll => {
                self.drive_rows(ROWS_OFF)?;
                RcpState::FetchPattern
            }
            RcpState::FetchPattern => match self.row_queue.pop_front() {
                Some(pattern) => {
                    self.row_register = pattern;
                    RcpState::SignalSafe
                }
                None => RcpState::FetchPattern,
            },
            RcpState::SignalSafe => {
                self.row_ready = true;
                RcpState::WaitLatchDone
            }
            RcpState::WaitLatchDone => {
                if self.latch_done {
                    self.latch_done = false;
                    RcpState::EnableRow
                } else {
                    RcpState::WaitLatchDone
                }
            }
            RcpState::EnableRow => {
                self.drive_rows(self.row_register)?;
                RcpState::Dwell {
                    remaining: self.config.dwell_cycles,
                }
            }
            RcpState::Dwell { remaining } if remaining > 1 => RcpState::Dwell {
                remaining: remaining.saturating_sub(1),
            },
            RcpState::Dwell { .. } => RcpState::DisableAll,
        };
        Ok(())
    }

    fn drive_rows(&mut self, pattern: u32) -> Result<()> {
        for (row, pin) in self.rows.iter_mut().enumerate() {
            let high = pattern & (1 << row) != 0;
            pin.set_state(high.into()).map_err(|_| Error::Pin)?;
        }
        Ok(())
    }

    fn reset_sequencers(&mut self) {
        self.column_queue.clear();
        self.row_queue.clear();
        self.csp = CspState::WaitRowReady;
        self.rcp = RcpState::DisableAll;
        self.shift_register = 0;
        self.row_register = ROWS_OFF;
        self.row_ready = false;
        self.latch_done = false;
    }
}

impl<P: OutputPin> ScanBackend for SoftScan<P> {
    fn config(&self) -> &MatrixConfig {
        &self.config
    }

    fn arm(
        &mut self,
        columns: &StreamDescriptor,
        rows: &StreamDescriptor,
        memory: &ScanMemory<'_>,
    ) -> Result<()> {
        self.reset_sequencers();
        self.clock.set_low().map_err(|_| Error::Pin)?;
        self.latch.set_low().map_err(|_| Error::Pin)?;
        self.drive_rows(ROWS_OFF)?;
        self.column_feed = RingCursor::armed(columns.source.id);
        self.row_feed = RingCursor::armed(rows.source.id);
        self.top_up(memory);
        Ok(())
    }

    fn start_sequencers(&mut self) {
        self.running = true;
    }

    fn halt_sequencers(&mut self) -> Result<()> {
        self.running = false;
        self.drive_rows(ROWS_OFF)
    }

    fn disarm(&mut self) {
        self.column_feed = RingCursor::idle();
        self.row_feed = RingCursor::idle();
    }

    fn redirect_columns(&mut self, source: SourceBuffer) {
        self.column_feed.redirect(source.id);
    }

    fn settle_columns(&mut self, retired: SourceBuffer, memory: &ScanMemory<'_>) -> Result<()> {
        // Time only moves on ticks here, so waiting means running the scan.
        while self.running && self.column_feed.reads(retired.id) {
            self.top_up(memory);
            self.tick(memory)?;
        }
        Ok(())
    }

    fn refill(&mut self, memory: &ScanMemory<'_>) -> Result<()> {
        if self.config.feed == FeedMode::Polling {
            self.top_up(memory);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.disarm();
        self.reset_sequencers();
    }
}
