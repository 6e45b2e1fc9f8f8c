//! An autonomous display engine for a 32×8 LED matrix on Pico 1 and 2.
//!
//! Once started, the panel refreshes with no CPU involvement: two PIO state machines
//! generate the column-shift and row-scan waveforms, and two DMA channels stream their
//! data out of 32-byte ring buffers forever. The CPU only touches the engine to publish a
//! new frame ([`matrix::LedMatrix::set_framebuffer`] then [`matrix::LedMatrix::swap`]).
//!
//! # Glossary
//!
//! Resources used on the Pico 1 and Pico 2:
//!
//! - **PIO ([Programmable I/O](https://medium.com/data-science/nine-pico-pio-wats-with-rust-part-1-9d062067dc25)):** one block; state machines 0 and 1.
//! - **DMA ([Direct Memory Access](https://en.wikipedia.org/wiki/Direct_memory_access)):** two channels, one per state machine.
//! - **Ring buffer:** an 8-word buffer aligned to 32 bytes, so a DMA read address can
//!   wrap over it forever.
#![cfg_attr(not(feature = "host"), no_std)]
#![cfg_attr(not(feature = "host"), no_main)]

// Compile-time checks: exactly one board must be selected (unless testing with host feature)
#[cfg(all(not(any(feature = "pico1", feature = "pico2")), not(feature = "host")))]
compile_error!("Must enable exactly one board feature: 'pico1' or 'pico2'");

#[cfg(all(feature = "pico1", feature = "pico2"))]
compile_error!("Cannot enable both 'pico1' and 'pico2' features simultaneously");

// Compile-time checks: exactly one architecture must be selected (unless testing with host feature)
#[cfg(all(not(any(feature = "arm", feature = "riscv")), not(feature = "host")))]
compile_error!("Must enable exactly one architecture feature: 'arm' or 'riscv'");

#[cfg(all(feature = "arm", feature = "riscv"))]
compile_error!("Cannot enable both 'arm' and 'riscv' features simultaneously");

// Compile-time check: pico1 only supports ARM
#[cfg(all(feature = "pico1", feature = "riscv"))]
compile_error!("Pico 1 (RP2040) only supports ARM architecture, not RISC-V");

pub mod config;
pub mod double_buffer;
mod error;
pub mod framebuffer;
pub mod matrix;
// PIO interrupt bindings used by scan::pio
#[cfg(not(feature = "host"))]
#[doc(hidden)]
pub mod pio_irqs;
pub mod remap;
pub mod ring_buffer;
pub mod scan;
#[cfg(feature = "host")]
pub mod to_png;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Resource, Result};
