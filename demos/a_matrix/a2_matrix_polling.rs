#![no_std]
#![no_main]
#![cfg(not(feature = "host"))]

use core::{convert::Infallible, panic};

use defmt::info;
use embassy_executor::Spawner;
use embassy_rp::peripherals::PIO1;
use embassy_rp::pio::Pio;
use embassy_time::{Duration, Instant, Timer};
use embedded_graphics::{
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
};
use shift_matrix::{
    Result,
    config::{FeedMode, MatrixConfig},
    framebuffer::Framebuffer,
    matrix::{LedMatrix, MatrixStatic},
    scan::pio::{MatrixPio, PioScan},
};
use {defmt_rtt as _, panic_probe as _};

// Same wiring as a1, on PIO1 and with no DMA channels: the CPU tops up the FIFOs.
static MATRIX_STATIC: MatrixStatic = MatrixStatic::new_static();

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("{err}");
}

async fn inner_main(_spawner: Spawner) -> Result<Infallible> {
    let p = embassy_rp::init(Default::default());

    let mut pio = Pio::new(p.PIO1, PIO1::irqs());
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
    let config = MatrixConfig::new().with_feed(FeedMode::Polling);
    let scan = PioScan::new(pio, data, clock, latch, rows, None, config)?;
    let mut matrix = LedMatrix::new(scan, MATRIX_STATIC.arena()?)?;
    matrix.start(None)?;
    info!("Polling feed: refilling every 500 us");

    // A growing box, redrawn every 200 ms between refills.
    let mut size = 1u32;
    let mut next_frame = Instant::now();
    loop {
        if Instant::now() >= next_frame {
            let mut frame = Framebuffer::new();
            let Ok(()) = Rectangle::new(Point::new(0, 0), Size::new(size * 4, size))
                .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
                .draw(&mut frame);
            matrix.set_framebuffer(&frame)?;
            matrix.swap()?;
            size = size % 8 + 1;
            next_frame += Duration::from_millis(200);
        }
        matrix.refill()?;
        // A row lasts about 640 us at the default rate; eight queued rows cover this wait.
        Timer::after_micros(500).await;
    }
}
