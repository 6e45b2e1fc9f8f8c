#![cfg(feature = "host")]
#![allow(missing_docs)]
//! Host-level tests for the engine lifecycle, configuration checks and resource claims.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, OutputPin};
use shift_matrix::config::{
    DEFAULT_DWELL_CYCLES, DEFAULT_SEQUENCER_HZ, FeedMode, MIN_FRAME_RATE_HZ, MatrixConfig,
    clock_divider_bits,
};
use shift_matrix::framebuffer::Framebuffer;
use shift_matrix::matrix::{EngineState, LedMatrix, MatrixStatic, Operation};
use shift_matrix::remap::remap_word;
use shift_matrix::ring_buffer::MATRIX_ARENA_WORDS;
use shift_matrix::scan::soft::SoftScan;
use shift_matrix::{Error, Resource};

/// Pin that remembers its last level; rows start high (off).
#[derive(Clone)]
struct LevelPin(Rc<RefCell<bool>>);

impl LevelPin {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(true)))
    }

    fn is_high(&self) -> bool {
        *self.0.borrow()
    }
}

impl ErrorType for LevelPin {
    type Error = Infallible;
}

impl OutputPin for LevelPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        *self.0.borrow_mut() = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        *self.0.borrow_mut() = true;
        Ok(())
    }
}

/// Pin whose every write fails.
struct BrokenPin;

#[derive(Debug)]
struct BrokenPinError;

impl embedded_hal::digital::Error for BrokenPinError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

impl ErrorType for BrokenPin {
    type Error = BrokenPinError;
}

impl OutputPin for BrokenPin {
    fn set_low(&mut self) -> Result<(), BrokenPinError> {
        Err(BrokenPinError)
    }

    fn set_high(&mut self) -> Result<(), BrokenPinError> {
        Err(BrokenPinError)
    }
}

const FAST: MatrixConfig = MatrixConfig::new().with_dwell_cycles(16);

fn scan_with_rows(config: MatrixConfig) -> (SoftScan<LevelPin>, [LevelPin; 8]) {
    let rows: [LevelPin; 8] = std::array::from_fn(|_| LevelPin::new());
    let scan = SoftScan::new(
        LevelPin::new(),
        LevelPin::new(),
        LevelPin::new(),
        rows.clone(),
        config,
    );
    (scan, rows)
}

fn scan(config: MatrixConfig) -> SoftScan<LevelPin> {
    scan_with_rows(config).0
}

fn invalid(operation: Operation, state: EngineState) -> Error {
    Error::InvalidState { operation, state }
}

#[test]
fn new_engine_is_idle() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let matrix = LedMatrix::new(scan(MatrixConfig::new()), &mut arena).expect("engine builds");
    assert_eq!(matrix.state(), EngineState::Idle);
    assert!(matrix.front_words().iter().all(|word| *word == 0));
    assert!(matrix.back_words().iter().all(|word| *word == 0));
}

#[test]
fn default_timing_is_about_195_hz() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let matrix = LedMatrix::new(scan(MatrixConfig::new()), &mut arena).expect("engine builds");
    assert_eq!(DEFAULT_SEQUENCER_HZ, 1_600_000);
    assert_eq!(DEFAULT_DWELL_CYCLES, 1024);
    assert_eq!(matrix.timing().row_hz, 1562);
    assert_eq!(matrix.timing().frame_hz, 195);
}

#[test]
fn idle_engine_rejects_content_operations() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    let frame = Framebuffer::filled();
    assert_eq!(
        matrix.set_framebuffer(&frame),
        Err(invalid(Operation::SetFramebuffer, EngineState::Idle))
    );
    assert_eq!(
        matrix.swap(),
        Err(invalid(Operation::Swap, EngineState::Idle))
    );
    assert_eq!(
        matrix.stop(),
        Err(invalid(Operation::Stop, EngineState::Idle))
    );
    assert_eq!(matrix.state(), EngineState::Idle);
}

#[test]
fn start_twice_is_rejected() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    matrix.start(None).expect("first start");
    assert_eq!(
        matrix.start(None),
        Err(invalid(Operation::Start, EngineState::Running))
    );
    assert_eq!(matrix.state(), EngineState::Running);
}

#[test]
fn stop_is_idempotent() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    matrix.start(None).expect("engine starts");
    matrix.stop().expect("first stop");
    matrix.stop().expect("second stop is a no-op");
    assert_eq!(matrix.state(), EngineState::Stopped);
}

#[test]
fn start_with_initial_frame_shows_it_first() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    let frame = Framebuffer([0x0000_0010; 8]);
    matrix.start(Some(&frame)).expect("engine starts");
    assert_eq!(matrix.front_words(), [remap_word(0x0000_0010); 8].as_slice());
    assert!(matrix.back_words().iter().all(|word| *word == 0));
}

#[test]
fn stopped_engine_accepts_content_updates() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    matrix.start(None).expect("engine starts");
    matrix.stop().expect("engine stops");
    let frame = Framebuffer([0x0300_0000; 8]);
    matrix.set_framebuffer(&frame).expect("stopped accepts writes");
    matrix.swap().expect("stopped accepts swaps");
    assert_eq!(matrix.front_words(), [remap_word(0x0300_0000); 8].as_slice());
    matrix.start(None).expect("restart");
    assert_eq!(matrix.state(), EngineState::Running);
}

#[test]
fn swap_rewrites_only_the_column_reload_word() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    matrix.start(None).expect("engine starts");
    let armed = matrix.reload_words().to_vec();
    assert_eq!(armed.len(), 2);
    assert_ne!(armed[0], 0);
    assert_ne!(armed[1], 0);

    matrix.swap().expect("running");
    let swapped = matrix.reload_words().to_vec();
    assert_ne!(swapped[0], armed[0]);
    assert_eq!(swapped[1], armed[1], "row patterns never move");
    // Column buffers sit one or more ring windows apart.
    assert_eq!(swapped[0].abs_diff(armed[0]) % 32, 0);

    matrix.swap().expect("running");
    assert_eq!(matrix.reload_words(), armed.as_slice());

    matrix.stop().expect("running");
    matrix.swap().expect("stopped");
    assert_eq!(matrix.reload_words(), swapped.as_slice());
}

#[test]
fn stop_turns_every_row_off() {
    let (scan, rows) = scan_with_rows(FAST);
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan, &mut arena).expect("engine builds");
    matrix
        .start(Some(&Framebuffer::filled()))
        .expect("engine starts");
    // Run until some row is lit, then stop mid-dwell.
    let mut lit = false;
    for _ in 0..1_000 {
        matrix.tick().expect("pins never fail");
        if rows.iter().any(|row| !row.is_high()) {
            lit = true;
            break;
        }
    }
    assert!(lit, "a row lights within one row period");
    matrix.stop().expect("running");
    assert!(rows.iter().all(LevelPin::is_high));
}

#[test]
fn close_and_drop_turn_every_row_off() {
    let (scan, rows) = scan_with_rows(FAST);
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan, &mut arena).expect("engine builds");
    matrix.start(None).expect("engine starts");
    matrix.run_cycles(100).expect("pins never fail");
    matrix.close().expect("close stops and releases");
    assert!(rows.iter().all(LevelPin::is_high));

    let (scan, rows) = scan_with_rows(FAST);
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    {
        let mut matrix = LedMatrix::new(scan, &mut arena).expect("engine builds");
        matrix.start(None).expect("engine starts");
        matrix.run_cycles(100).expect("pins never fail");
    }
    assert!(rows.iter().all(LevelPin::is_high));
}

#[test]
fn close_from_idle_and_stopped() {
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    matrix.close().expect("idle close");

    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan(FAST), &mut arena).expect("engine builds");
    matrix.start(None).expect("engine starts");
    matrix.stop().expect("engine stops");
    matrix.close().expect("stopped close");
}

#[test]
fn arena_too_small_is_exhausted() {
    let mut arena = [0u32; 16];
    let result = LedMatrix::new(scan(FAST), &mut arena).map(|matrix| matrix.state());
    assert_eq!(
        result,
        Err(Error::ResourceExhausted {
            resource: Resource::RingMemory
        })
    );
}

#[test]
fn slow_refresh_is_rejected() {
    let config = MatrixConfig::new().with_dwell_cycles(4096);
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let result = LedMatrix::new(scan(config), &mut arena).map(|matrix| matrix.state());
    assert_eq!(result, Err(Error::RefreshTooSlow { frame_hz: 48 }));
    assert!(48 < MIN_FRAME_RATE_HZ);
}

#[test]
fn config_validation() {
    assert_eq!(
        MatrixConfig::new().with_dwell_cycles(0).validate(),
        Err(Error::DwellTooShort)
    );
    assert_eq!(
        MatrixConfig::new().with_sequencer_hz(0).validate(),
        Err(Error::SequencerClockOutOfRange { sequencer_hz: 0 })
    );
    let timing = MatrixConfig::new()
        .with_feed(FeedMode::Polling)
        .validate()
        .expect("defaults are valid");
    assert_eq!(timing.frame_hz, 195);
    // Exactly the limit is accepted: 60 Hz * 8 rows * 1000 cycles.
    assert!(
        MatrixConfig::new()
            .with_sequencer_hz(480_000)
            .with_dwell_cycles(1000)
            .validate()
            .is_ok()
    );
}

#[test]
fn clock_divider_range() {
    // 125 MHz / 1.6 MHz = 78.125
    assert_eq!(
        clock_divider_bits(125_000_000, 1_600_000),
        Ok(78 * 256 + 32)
    );
    assert_eq!(clock_divider_bits(150_000_000, 150_000_000), Ok(256));
    assert_eq!(
        clock_divider_bits(125_000_000, 200_000_000),
        Err(Error::SequencerClockOutOfRange {
            sequencer_hz: 200_000_000
        })
    );
    assert_eq!(
        clock_divider_bits(125_000_000, 1_000),
        Err(Error::SequencerClockOutOfRange {
            sequencer_hz: 1_000
        })
    );
}

#[test]
fn static_arena_is_claimed_once() {
    static MATRIX_STATIC: MatrixStatic = MatrixStatic::new_static();
    let arena = MATRIX_STATIC.arena().expect("first claim");
    assert!(matches!(
        MATRIX_STATIC.arena(),
        Err(Error::ResourceExhausted {
            resource: Resource::EngineStatic
        })
    ));
    let matrix = LedMatrix::new(scan(FAST), arena).expect("engine builds");
    assert_eq!(matrix.state(), EngineState::Idle);
}

#[test]
fn pin_errors_surface_from_start() {
    let rows = std::array::from_fn(|_| BrokenPin);
    let scan = SoftScan::new(BrokenPin, BrokenPin, BrokenPin, rows, FAST);
    let mut arena = [0u32; MATRIX_ARENA_WORDS];
    let mut matrix = LedMatrix::new(scan, &mut arena).expect("engine builds");
    assert_eq!(matrix.start(None), Err(Error::Pin));
    assert_eq!(matrix.state(), EngineState::Idle);
}

#[test]
fn errors_display_their_context() {
    assert_eq!(
        invalid(Operation::Swap, EngineState::Idle).to_string(),
        "Swap is not allowed while Idle"
    );
    assert_eq!(
        Error::ResourceExhausted {
            resource: Resource::DmaChannel
        }
        .to_string(),
        "DMA channel exhausted"
    );
}
