//! 1-bit frame buffer for the e-paper panel.
//!
//! The panel is organised as rows of bytes, eight horizontal pixels per byte,
//! most significant bit first. A set bit is ink (black). The buffer implements
//! embedded-graphics' `DrawTarget`, and finished frames are handed to a
//! [`FrameSink`]: the terminal in development mode, a PBM file for the panel
//! driver on the device.

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use std::convert::Infallible;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl FrameBuffer {
    /// A blank (all paper) frame.
    pub fn new(width: u32, height: u32) -> Self {
        // Buffer size: each row has (width+7)/8 bytes, total height rows
        let bytes_per_row = width.div_ceil(8);
        Self {
            width,
            height,
            bits: vec![0x00; (bytes_per_row * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed rows, one bit per pixel, set = ink.
    pub fn bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn blank(&mut self) {
        self.bits.fill(0x00);
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, ink: bool) {
        if let Some((index, mask)) = self.locate(x, y) {
            if ink {
                self.bits[index] |= mask;
            } else {
                self.bits[index] &= !mask;
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> bool {
        self.locate(x, y)
            .map(|(index, mask)| self.bits[index] & mask != 0)
            .unwrap_or(false)
    }

    pub fn ink_count(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    fn locate(&self, x: u32, y: u32) -> Option<(usize, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bytes_per_row = self.width.div_ceil(8);
        let index = (y * bytes_per_row + x / 8) as usize;
        Some((index, 0x80 >> (x % 8)))
    }

    /// Terminal rendering, two pixel rows per text line.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(((self.width + 1) * self.height.div_ceil(2)) as usize);
        for y in (0..self.height).step_by(2) {
            for x in 0..self.width {
                let top = self.pixel(x, y);
                let bottom = self.pixel(x, y + 1);
                out.push(match (top, bottom) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            out.push('\n');
        }
        out
    }

    /// Binary PBM (P4). PBM also uses set bits for black, so rows copy verbatim.
    pub fn to_pbm(&self) -> Vec<u8> {
        let mut out = format!("P4\n{} {}\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.bits);
        out
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as u32, point.y as u32, color.is_on());
            }
        }
        Ok(())
    }
}

/// Where finished frames go.
pub trait FrameSink {
    fn present(&mut self, frame: &FrameBuffer) -> io::Result<()>;
}

/// Development mode: print each frame to stdout.
#[derive(Debug, Default)]
pub struct AsciiSink;

impl FrameSink for AsciiSink {
    fn present(&mut self, frame: &FrameBuffer) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", "─".repeat(frame.width() as usize))?;
        stdout.write_all(frame.to_ascii().as_bytes())?;
        stdout.flush()
    }
}

/// Device mode: write each frame as a PBM image for the panel driver to pick up.
/// Written through a temp file so the driver never reads half a frame.
#[derive(Debug)]
pub struct PbmFileSink {
    path: PathBuf,
}

impl PbmFileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSink for PbmFileSink {
    fn present(&mut self, frame: &FrameBuffer) -> io::Result<()> {
        let staging = self.path.with_extension("pbm.tmp");
        fs::write(&staging, frame.to_pbm())?;
        fs::rename(&staging, &self.path)
    }
}
