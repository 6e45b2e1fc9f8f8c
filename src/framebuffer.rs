//! The producer-side frame: eight 32-bit column words, one per row.
//!
//! Bit `c` of word `r` is the pixel at column `c`, row `r`. A [`Framebuffer`] is plain data;
//! the engine copies (and remaps) it into its own buffers, so the producer is free to reuse it
//! after handing it over.
//!
//! # Example
//!
//! ```
//! use embedded_graphics::{
//!     pixelcolor::BinaryColor,
//!     prelude::*,
//!     primitives::{Line, PrimitiveStyle},
//! };
//! use shift_matrix::framebuffer::Framebuffer;
//!
//! let mut frame = Framebuffer::new();
//! Line::new(Point::new(0, 0), Point::new(7, 7))
//!     .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
//!     .draw(&mut frame)
//!     .expect("drawing into a frame cannot fail");
//!
//! assert!(frame.pixel(3, 3));
//! assert_eq!(frame[3], 1 << 3);
//! ```

use core::convert::Infallible;
use core::ops::{Deref, DerefMut};

use embedded_graphics::{
    pixelcolor::BinaryColor,
    prelude::{DrawTarget, OriginDimensions, Pixel, Point, Size},
};

/// Number of columns driven by the shift-register chain.
pub const COLUMNS: usize = 32;

/// Number of multiplexed rows.
pub const ROWS: usize = 8;

/// One full frame of pixel data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(not(feature = "host"), derive(defmt::Format))]
pub struct Framebuffer(pub [u32; ROWS]);

impl Framebuffer {
    /// Frame width in pixels.
    pub const WIDTH: usize = COLUMNS;
    /// Frame height in pixels.
    pub const HEIGHT: usize = ROWS;
    /// Frame dimensions for `embedded-graphics`.
    pub const SIZE: Size = Size::new(COLUMNS as u32, ROWS as u32);
    /// Top-left corner for `embedded-graphics`.
    pub const TOP_LEFT: Point = Point::new(0, 0);

    /// A blank frame.
    #[must_use]
    pub const fn new() -> Self {
        Self([0; ROWS])
    }

    /// A frame with every pixel lit.
    #[must_use]
    pub const fn filled() -> Self {
        Self([u32::MAX; ROWS])
    }

    /// Whether the pixel at (`column`, `row`) is lit. Out-of-range coordinates read as off.
    #[must_use]
    pub fn pixel(&self, column: usize, row: usize) -> bool {
        if column >= COLUMNS {
            return false;
        }
        self.0.get(row).is_some_and(|word| word & (1 << column) != 0)
    }

    /// Lights or clears the pixel at (`column`, `row`). Out-of-range coordinates are ignored.
    pub fn set_pixel(&mut self, column: usize, row: usize, on: bool) {
        if column >= COLUMNS {
            return;
        }
        if let Some(word) = self.0.get_mut(row) {
            if on {
                *word |= 1 << column;
            } else {
                *word &= !(1 << column);
            }
        }
    }

    /// Clears every pixel.
    pub fn clear(&mut self) {
        self.0 = [0; ROWS];
    }
}

impl Deref for Framebuffer {
    type Target = [u32; ROWS];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Framebuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<[u32; ROWS]> for Framebuffer {
    fn from(words: [u32; ROWS]) -> Self {
        Self(words)
    }
}

impl From<Framebuffer> for [u32; ROWS] {
    fn from(frame: Framebuffer) -> Self {
        frame.0
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Self::SIZE
    }
}

impl DrawTarget for Framebuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> core::result::Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            let (Ok(column), Ok(row)) = (usize::try_from(coord.x), usize::try_from(coord.y)) else {
                continue;
            };
            self.set_pixel(column, row, color.is_on());
        }
        Ok(())
    }
}
