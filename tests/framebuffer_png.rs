#![cfg(feature = "host")]
#![allow(missing_docs)]
//! Host-level tests for drawing into a framebuffer and previewing it as PNG.

use std::error::Error;
use std::fs::File;
use std::path::Path;

use embedded_graphics::{
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
};
use png::{Decoder, Transformations};
use shift_matrix::framebuffer::{COLUMNS, Framebuffer, ROWS};
use shift_matrix::to_png::{write_frame_png, write_frames_apng};

const MAX_DIMENSION: u32 = 320;
// 320 px over 32 columns, shrunk until the LED border fits: 9 px cells, 3 px border.
const CELL: u32 = 9;
const BORDER: u32 = 3;

struct Decoded {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl Decoded {
    fn red_at_center(&self, column: usize, row: usize) -> u16 {
        let center = (CELL - 1) / 2;
        let x = BORDER + column as u32 * CELL + center;
        let y = BORDER + row as u32 * CELL + center;
        let index = ((y * self.width + x) * 6) as usize;
        u16::from_be_bytes([self.bytes[index], self.bytes[index + 1]])
    }
}

fn decode(path: &Path) -> Result<Decoded, Box<dyn Error>> {
    let mut decoder = Decoder::new(File::open(path)?);
    decoder.set_transformations(Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    let mut bytes = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut bytes)?;
    bytes.truncate(info.buffer_size());
    Ok(Decoded {
        width: info.width,
        height: info.height,
        bytes,
    })
}

#[test]
fn drawing_sets_column_bits() -> Result<(), Box<dyn Error>> {
    let mut frame = Framebuffer::new();
    Rectangle::new(Framebuffer::TOP_LEFT, Framebuffer::SIZE)
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(&mut frame)?;

    assert_eq!(frame[0], u32::MAX);
    assert_eq!(frame[ROWS - 1], u32::MAX);
    for row in 1..ROWS - 1 {
        assert_eq!(frame[row], 1 | (1 << (COLUMNS - 1)));
    }

    // Off-panel pixels are clipped.
    Line::new(Point::new(-4, 3), Point::new(40, 3))
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::Off, 1))
        .draw(&mut frame)?;
    assert_eq!(frame[3], 0);
    Ok(())
}

#[test]
fn png_shows_lit_and_unlit_leds() -> Result<(), Box<dyn Error>> {
    let mut frame = Framebuffer::new();
    frame.set_pixel(0, 0, true);
    frame.set_pixel(31, 7, true);
    frame.set_pixel(12, 4, true);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("frame.png");
    write_frame_png(&frame, &path, MAX_DIMENSION)?;

    let decoded = decode(&path)?;
    assert_eq!(decoded.width, COLUMNS as u32 * CELL + 2 * BORDER);
    assert_eq!(decoded.height, ROWS as u32 * CELL + 2 * BORDER);
    assert!(decoded.width <= MAX_DIMENSION);

    for row in 0..ROWS {
        for column in 0..COLUMNS {
            let red = decoded.red_at_center(column, row);
            if frame.pixel(column, row) {
                assert_eq!(red, u16::MAX, "({column}, {row}) is lit");
            } else {
                assert!(red < 2_000, "({column}, {row}) is dark, got {red}");
            }
        }
    }
    Ok(())
}

#[test]
fn apng_holds_every_frame() -> Result<(), Box<dyn Error>> {
    let frames: Vec<Framebuffer> = (0..COLUMNS)
        .step_by(8)
        .map(|column| {
            let mut frame = Framebuffer::new();
            for row in 0..ROWS {
                frame.set_pixel(column, row, true);
            }
            frame
        })
        .collect();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("walk.png");
    write_frames_apng(&frames, &path, MAX_DIMENSION, 100)?;

    let decoder = Decoder::new(File::open(&path)?);
    let reader = decoder.read_info()?;
    let animation = reader
        .info()
        .animation_control
        .ok_or("APNG must carry an animation control chunk")?;
    assert_eq!(animation.num_frames, 4);
    assert_eq!(animation.num_plays, 0);
    Ok(())
}

#[test]
fn previews_reject_bad_arguments() {
    let dir = tempfile::tempdir().expect("temp dir");
    let frame = Framebuffer::filled();
    assert!(write_frame_png(&frame, dir.path().join("tiny.png"), 40).is_err());
    assert!(write_frames_apng(&[], dir.path().join("empty.png"), MAX_DIMENSION, 100).is_err());
    assert!(write_frames_apng(&[frame], dir.path().join("still.png"), MAX_DIMENSION, 0).is_err());
}
