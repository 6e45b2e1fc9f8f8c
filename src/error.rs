//! Crate-wide error and result types.

use derive_more::{Display, Error};

use crate::matrix::{EngineState, Operation};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Hardware or memory resource that can run out while building an engine.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum Resource {
    /// A DMA channel was required but none was supplied.
    #[display("DMA channel")]
    DmaChannel,
    /// The buffer arena has no room for another aligned ring buffer.
    #[display("ring-buffer memory")]
    RingMemory,
    /// The engine's static storage was already claimed.
    #[display("engine static storage")]
    EngineStatic,
}

/// Errors surfaced at configuration and lifecycle boundaries.
///
/// Once the scan is running, nothing in the steady state produces an error: an empty
/// sequencer queue blocks rather than failing.
#[derive(Clone, Copy, Debug, Display, Error, Eq, PartialEq)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub enum Error {
    /// A required resource is not available.
    #[display("{resource} exhausted")]
    ResourceExhausted {
        /// The resource that ran out.
        resource: Resource,
    },

    /// An aligned block of `words` words cannot be placed on an `align`-byte boundary.
    #[display("cannot align {words} words to {align} bytes")]
    AlignmentViolation {
        /// Requested block length in 32-bit words.
        words: usize,
        /// Requested byte alignment.
        align: usize,
    },

    /// An operation was called in a lifecycle state that does not allow it.
    #[display("{operation} is not allowed while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: Operation,
        /// The engine state at the time of the call.
        state: EngineState,
    },

    /// The configured dwell and sequencer clock give a frame rate below the flicker limit.
    #[display("frame rate {frame_hz} Hz is below the flicker limit")]
    RefreshTooSlow {
        /// Resulting frame rate in Hz.
        frame_hz: u32,
    },

    /// The dwell must be at least one sequencer cycle.
    #[display("dwell must be at least one cycle")]
    DwellTooShort,

    /// The sequencer clock cannot be derived from the system clock.
    #[display("sequencer clock {sequencer_hz} Hz is out of range")]
    SequencerClockOutOfRange {
        /// Requested sequencer clock in Hz.
        sequencer_hz: u32,
    },

    /// The eight row-enable pins are not consecutive GPIOs.
    #[display("row pins must be eight consecutive GPIOs")]
    PinsNotConsecutive,

    /// A GPIO driven by the software scanner reported an error.
    #[display("output pin error")]
    Pin,
}
