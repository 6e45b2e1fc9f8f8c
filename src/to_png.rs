//! Host-side previews: render a [`Framebuffer`] as round LEDs in a PNG or looping APNG.
#![cfg(feature = "host")]

use crate::framebuffer::{COLUMNS, Framebuffer, ROWS};
use png::{BitDepth, ColorType, Encoder, ScaledFloat};
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Colour of a lit LED in previews (a typical red matrix).
pub const LIT_COLOR: [u8; 3] = [255, 32, 16];

/// Colour of an unlit LED in previews.
pub const UNLIT_COLOR: [u8; 3] = [24, 8, 8];

const PREVIEW_INVERSE_GAMMA: f32 = 2.2;

/// Render a `Framebuffer` into a PNG file sized to the requested maximum dimension.
///
/// # Errors
///
/// Returns an error if the file cannot be created or encoded.
pub fn write_frame_png(
    frame: &Framebuffer,
    output_path: impl AsRef<Path>,
    target_max_dimension: u32,
) -> Result<(), Box<dyn Error>> {
    let output_path = output_path.as_ref();
    let cell_size = select_cell_size(target_max_dimension)?;
    let (width, height, pixels) = panel_pixels(frame, cell_size);
    create_parent(output_path)?;

    let file = File::create(output_path)?;
    let mut writer = encoder(file, width, height).write_header()?;
    writer.write_image_data(&pixels)?;
    println!("wrote PNG to {}", output_path.display());
    Ok(())
}

/// Render a sequence of `Framebuffer` values into a looping APNG file.
///
/// # Errors
///
/// Returns an error if `frames` is empty, the delay does not fit the APNG header, or the
/// file cannot be created or encoded.
pub fn write_frames_apng(
    frames: &[Framebuffer],
    output_path: impl AsRef<Path>,
    target_max_dimension: u32,
    frame_delay_ms: u32,
) -> Result<(), Box<dyn Error>> {
    if frames.is_empty() {
        return Err("frames must not be empty".into());
    }
    if frame_delay_ms == 0 {
        return Err("frame_delay_ms must be positive".into());
    }
    let output_path = output_path.as_ref();
    let cell_size = select_cell_size(target_max_dimension)?;
    let frame_count = u32::try_from(frames.len())?;
    let delay_num = u16::try_from(frame_delay_ms)?;
    let delay_den = 1000u16;
    create_parent(output_path)?;

    let file = File::create(output_path)?;
    let (width, height) = panel_size(cell_size);
    let mut encoder = encoder(file, width, height);
    encoder.set_animated(frame_count, 0)?;
    let mut writer = encoder.write_header()?;
    for frame in frames {
        let (_, _, pixels) = panel_pixels(frame, cell_size);
        writer.set_frame_delay(delay_num, delay_den)?;
        writer.write_image_data(&pixels)?;
    }
    writer.finish()?;
    println!("wrote APNG to {}", output_path.display());
    Ok(())
}

fn encoder(file: File, width: u32, height: u32) -> Encoder<'static, BufWriter<File>> {
    let mut encoder = Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(ColorType::Rgb);
    encoder.set_depth(BitDepth::Sixteen);
    encoder.set_source_gamma(ScaledFloat::new(1.0));
    encoder
}

fn create_parent(output_path: &Path) -> std::io::Result<()> {
    match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn led_radius(cell_size: u32) -> u32 {
    let led_margin = (cell_size / 8).max(1);
    cell_size.saturating_sub(led_margin * 2) / 2
}

fn panel_size(cell_size: u32) -> (u32, u32) {
    let border = led_radius(cell_size);
    (
        COLUMNS as u32 * cell_size + border * 2,
        ROWS as u32 * cell_size + border * 2,
    )
}

fn select_cell_size(target_max_dimension: u32) -> Result<u32, Box<dyn Error>> {
    // Below this an LED has no room for its fade ring.
    const MIN_CELL_SIZE: u32 = 8;
    let mut cell_size = target_max_dimension / COLUMNS as u32;
    while cell_size >= MIN_CELL_SIZE {
        let (width, height) = panel_size(cell_size);
        if width.max(height) <= target_max_dimension {
            return Ok(cell_size);
        }
        cell_size -= 1;
    }
    Err(format!("target_max_dimension {target_max_dimension} is too small").into())
}

fn panel_pixels(frame: &Framebuffer, cell_size: u32) -> (u32, u32, Vec<u8>) {
    let led_radius = led_radius(cell_size);
    let fade_width = (led_radius / 3).max(1);
    let border = led_radius;
    let (width, height) = panel_size(cell_size);
    let mut bytes = vec![0u8; (width * height * 3 * 2) as usize];
    let center = (cell_size - 1) as i32 / 2;
    let led_radius_f = led_radius as f32;
    let inner_radius_f = led_radius.saturating_sub(fade_width) as f32;
    let radius_sq = (led_radius as i32) * (led_radius as i32);

    for row_index in 0..ROWS {
        for column_index in 0..COLUMNS {
            let color = if frame.pixel(column_index, row_index) {
                LIT_COLOR
            } else {
                UNLIT_COLOR
            };
            let linear = color.map(inverse_gamma_to_linear);
            let cell_origin_x = (column_index as u32) * cell_size;
            let cell_origin_y = (row_index as u32) * cell_size;

            for local_y in 0..cell_size {
                let delta_y = local_y as i32 - center;
                for local_x in 0..cell_size {
                    let delta_x = local_x as i32 - center;
                    let distance_sq = delta_x * delta_x + delta_y * delta_y;
                    if distance_sq > radius_sq {
                        continue;
                    }
                    let distance = (distance_sq as f32).sqrt();
                    let intensity = if distance <= inner_radius_f {
                        1.0
                    } else {
                        let fade_span = led_radius_f - inner_radius_f;
                        (1.0 - (distance - inner_radius_f) / fade_span).max(0.0)
                    };
                    let x = border + cell_origin_x + local_x;
                    let y = border + cell_origin_y + local_y;
                    let pixel_index = ((y * width + x) * 3 * 2) as usize;
                    for (channel, value) in linear.iter().enumerate() {
                        let level = linear_to_u16(value * intensity);
                        bytes[pixel_index + channel * 2..pixel_index + channel * 2 + 2]
                            .copy_from_slice(&level.to_be_bytes());
                    }
                }
            }
        }
    }

    (width, height, bytes)
}

fn inverse_gamma_to_linear(channel: u8) -> f32 {
    let normalized = f32::from(channel) / 255.0;
    normalized.powf(PREVIEW_INVERSE_GAMMA)
}

fn linear_to_u16(value: f32) -> u16 {
    let clamped = value.clamp(0.0, 1.0);
    (clamped * 65535.0).round() as u16
}
