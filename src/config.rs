//! Scan timing and feeder configuration.
//!
//! The scan rate follows from two numbers: the sequencer clock `F` and the dwell `D`
//! (sequencer cycles a row stays lit). Rows advance at `F / D` and a full frame takes
//! [`ROWS`] rows, so the defaults (1.6 MHz, 1024 cycles) give about 1.56 kHz rows and
//! 195 Hz frames.
//!
//! The hardware sequencers spend a few dozen extra cycles per row shifting and latching, so
//! measured rates are slightly below these figures.

use crate::framebuffer::ROWS;
use crate::{Error, Result};

/// Default sequencer clock.
pub const DEFAULT_SEQUENCER_HZ: u32 = 1_600_000;

/// Default row dwell in sequencer cycles.
pub const DEFAULT_DWELL_CYCLES: u32 = 1024;

/// Lowest accepted frame rate; slower scans visibly flicker.
pub const MIN_FRAME_RATE_HZ: u32 = 60;

/// How words reach the sequencer queues.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum FeedMode {
    /// Two endless DMA streams keep the queues full with no CPU involvement.
    #[default]
    Dma,
    /// The CPU tops up the queues each time the producer calls
    /// [`LedMatrix::refill`](crate::matrix::LedMatrix::refill).
    Polling,
}

/// Engine configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub struct MatrixConfig {
    /// Sequencer clock in Hz.
    pub sequencer_hz: u32,
    /// Sequencer cycles each row stays lit.
    pub dwell_cycles: u32,
    /// Feeder strategy.
    pub feed: FeedMode,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixConfig {
    /// Default clock and dwell, DMA feeder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sequencer_hz: DEFAULT_SEQUENCER_HZ,
            dwell_cycles: DEFAULT_DWELL_CYCLES,
            feed: FeedMode::Dma,
        }
    }

    /// Replaces the sequencer clock.
    #[must_use]
    pub const fn with_sequencer_hz(self, sequencer_hz: u32) -> Self {
        Self {
            sequencer_hz,
            ..self
        }
    }

    /// Replaces the row dwell.
    #[must_use]
    pub const fn with_dwell_cycles(self, dwell_cycles: u32) -> Self {
        Self {
            dwell_cycles,
            ..self
        }
    }

    /// Replaces the feeder strategy.
    #[must_use]
    pub const fn with_feed(self, feed: FeedMode) -> Self {
        Self { feed, ..self }
    }

    /// Row and frame rates implied by this configuration.
    #[must_use]
    pub const fn timing(&self) -> ScanTiming {
        let row_hz = if self.dwell_cycles == 0 {
            0
        } else {
            self.sequencer_hz / self.dwell_cycles
        };
        ScanTiming {
            row_hz,
            frame_hz: row_hz / ROWS as u32,
        }
    }

    /// Checks that the configuration scans fast enough to avoid flicker.
    ///
    /// # Errors
    ///
    /// [`Error::DwellTooShort`] for a zero dwell, [`Error::SequencerClockOutOfRange`] for a
    /// zero clock, and [`Error::RefreshTooSlow`] when the frame rate is under
    /// [`MIN_FRAME_RATE_HZ`].
    pub const fn validate(&self) -> Result<ScanTiming> {
        if self.dwell_cycles == 0 {
            return Err(Error::DwellTooShort);
        }
        if self.sequencer_hz == 0 {
            return Err(Error::SequencerClockOutOfRange {
                sequencer_hz: self.sequencer_hz,
            });
        }
        let timing = self.timing();
        if timing.frame_hz < MIN_FRAME_RATE_HZ {
            return Err(Error::RefreshTooSlow {
                frame_hz: timing.frame_hz,
            });
        }
        Ok(timing)
    }
}

/// Derived scan rates, in whole Hz.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub struct ScanTiming {
    /// Rows per second.
    pub row_hz: u32,
    /// Full frames per second.
    pub frame_hz: u32,
}

/// Sequencer clock divider in 16.8 fixed point, as the PIO clock-divider register takes it.
///
/// # Errors
///
/// [`Error::SequencerClockOutOfRange`] unless `1.0 <= system_hz / sequencer_hz < 65536.0`.
pub fn clock_divider_bits(system_hz: u32, sequencer_hz: u32) -> Result<u32> {
    let out_of_range = Error::SequencerClockOutOfRange { sequencer_hz };
    if sequencer_hz == 0 {
        return Err(out_of_range);
    }
    let bits = (u64::from(system_hz) << 8) / u64::from(sequencer_hz);
    if bits < 1 << 8 {
        return Err(out_of_range);
    }
    u32::try_from(bits)
        .ok()
        .filter(|bits| *bits < 1 << 24)
        .ok_or(out_of_range)
}
