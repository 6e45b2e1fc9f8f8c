#![no_std]
#![no_main]
#![cfg(not(feature = "host"))]

use core::{convert::Infallible, panic};

use defmt::info;
use embassy_executor::Spawner;
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::Pio;
use embassy_time::Timer;
use shift_matrix::{
    Result,
    config::MatrixConfig,
    framebuffer::{COLUMNS, Framebuffer, ROWS},
    matrix::{LedMatrix, MatrixStatic},
    scan::pio::{DmaChannels, MatrixPio, PioScan},
};
use {defmt_rtt as _, panic_probe as _};

// Column data on GPIO 0, shift clock on GPIO 1, latch on GPIO 2, rows on GPIO 8..=15.
static MATRIX_STATIC: MatrixStatic = MatrixStatic::new_static();

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("{err}");
}

async fn inner_main(_spawner: Spawner) -> Result<Infallible> {
    let p = embassy_rp::init(Default::default());

    let mut pio = Pio::new(p.PIO0, PIO0::irqs());
    let data = pio.common.make_pio_pin(p.PIN_0);
    let clock = pio.common.make_pio_pin(p.PIN_1);
    let latch = pio.common.make_pio_pin(p.PIN_2);
    let rows = [
        pio.common.make_pio_pin(p.PIN_8),
        pio.common.make_pio_pin(p.PIN_9),
        pio.common.make_pio_pin(p.PIN_10),
        pio.common.make_pio_pin(p.PIN_11),
        pio.common.make_pio_pin(p.PIN_12),
        pio.common.make_pio_pin(p.PIN_13),
        pio.common.make_pio_pin(p.PIN_14),
        pio.common.make_pio_pin(p.PIN_15),
    ];
    let channels = DmaChannels::new(p.DMA_CH0, p.DMA_CH1, p.DMA_CH2, p.DMA_CH3);
    let scan = PioScan::new(
        pio,
        data,
        clock,
        latch,
        rows,
        Some(channels),
        MatrixConfig::new(),
    )?;
    let mut matrix = LedMatrix::new(scan, MATRIX_STATIC.arena()?)?;

    // Frame 0: a diagonal, shown until the walk begins.
    let mut frame = Framebuffer::new();
    for row in 0..ROWS {
        frame.set_pixel(row, row, true);
    }
    matrix.start(Some(&frame))?;
    info!(
        "Scanning at {} Hz per frame; the CPU is now free",
        matrix.timing().frame_hz
    );
    Timer::after_secs(2).await;

    // Walk one lit column across the panel. The scan never stops; each swap lands on a
    // frame boundary.
    loop {
        for column in 0..COLUMNS {
            frame.clear();
            for row in 0..ROWS {
                frame.set_pixel(column, row, true);
            }
            matrix.set_framebuffer(&frame)?;
            matrix.swap()?;
            Timer::after_millis(60).await;
        }
    }
}
