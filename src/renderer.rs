//! # Panel Rendering
//!
//! Lays out the ISS screen on the e-paper panel:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ 06871        │                          │
//! │ miles away   │        world map         │
//! │ North Pacific│     ·  ·  ●              │
//! │ Ocean        │                          │
//! │ Nov 30 17:40 │                          │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! The text column sits left of the map. The footer strip carries the update
//! time, and a failed poll overwrites only that strip, so the last good
//! position stays visible underneath the error.
//!
//! Drawing goes through embedded-graphics into a [`FrameBuffer`], which is then
//! handed to a [`FrameSink`]. The map artwork itself is out of scope; the
//! background is an outline with the equator and meridian so the marker still
//! has a frame of reference.

use crate::config::Config;
use crate::framebuffer::{FrameBuffer, FrameSink};
use crate::label::TextMeasurer;
use crate::projection::Viewport;
use crate::{PixelPoint, TrackerError, TrackerResult};
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10, FONT_6X9},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};

/// Text shown in the footer when a poll fails.
pub const NETWORK_ERROR_TEXT: &str = "Network Error.";

const DISTANCE_FONT: &MonoFont<'static> = &FONT_10X20;
const LABEL_FONT: &MonoFont<'static> = &FONT_6X10;
const FOOTER_FONT: &MonoFont<'static> = &FONT_6X9;

const MARKER_DIAMETER: u32 = 9;
const TRAIL_DIAMETER: u32 = 5;

/// Everything the position screen shows.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionFrame<'a> {
    pub distance_miles: u32,
    pub label: &'a str,
    pub marker: PixelPoint,
    /// Earlier positions, drawn as small dots.
    pub trail: Vec<PixelPoint>,
    pub observed_at: &'a str,
}

impl PositionFrame<'_> {
    /// Always five digits, like an odometer.
    pub fn distance_text(&self) -> String {
        format!("{:05}", self.distance_miles)
    }
}

/// The display capability used by provisioning and the poll loop.
pub trait Canvas: TextMeasurer {
    /// Full redraw of the position screen.
    fn render_position(&mut self, frame: &PositionFrame<'_>) -> TrackerResult<()>;

    /// Overlay `message` on the footer, leaving the rest of the frame as is.
    fn render_fetch_error(&mut self, message: &str) -> TrackerResult<()>;

    /// Full redraw with centred status lines (splash, setup, WiFi errors).
    fn render_status(&mut self, lines: &[&str]) -> TrackerResult<()>;
}

/// Pixel positions derived from the display configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub map: Viewport,
    pub text_left: i32,
}

impl Layout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.display.width,
            height: config.display.height,
            map: config.map_viewport(),
            text_left: config.display.text_left_offset,
        }
    }

    /// Top of the footer strip.
    pub fn footer_y(&self) -> i32 {
        self.height as i32 - FOOTER_FONT.character_size.height as i32
    }

    /// Width available to the text column, left of the map.
    pub fn column_width(&self) -> u32 {
        (self.map.left_offset - self.text_left).max(0) as u32
    }
}

/// [`Canvas`] drawing into a [`FrameBuffer`] and presenting it through a sink.
pub struct EinkCanvas<S> {
    layout: Layout,
    buffer: FrameBuffer,
    sink: S,
}

impl<S: FrameSink> EinkCanvas<S> {
    pub fn new(layout: Layout, sink: S) -> Self {
        Self {
            buffer: FrameBuffer::new(layout.width, layout.height),
            layout,
            sink,
        }
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn present(&mut self) -> TrackerResult<()> {
        self.sink
            .present(&self.buffer)
            .map_err(|e| TrackerError::Display(e.to_string()))
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32, font: &MonoFont<'_>) {
        let style = MonoTextStyle::new(font, BinaryColor::On);
        Text::with_baseline(text, Point::new(x, y), style, Baseline::Top)
            .draw(&mut self.buffer)
            .ok();
    }

    fn draw_map_background(&mut self) {
        let map = self.layout.map;
        let outline = PrimitiveStyle::with_stroke(BinaryColor::On, 1);
        Rectangle::new(
            Point::new(map.left_offset, map.top_offset),
            Size::new(map.width, map.height),
        )
        .into_styled(outline)
        .draw(&mut self.buffer)
        .ok();

        // Dotted equator and meridian
        let equator = map.top_offset + map.equator_y();
        for x in (map.left_offset..map.left_offset + map.width as i32).step_by(4) {
            self.buffer.set_pixel(x as u32, equator as u32, true);
        }
        let meridian = map.left_offset + map.meridian_x();
        for y in (map.top_offset..map.top_offset + map.height as i32).step_by(4) {
            self.buffer.set_pixel(meridian as u32, y as u32, true);
        }
    }

    fn draw_marker(&mut self, point: PixelPoint, diameter: u32) {
        Circle::with_center(Point::new(point.x, point.y), diameter)
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(&mut self.buffer)
            .ok();
    }

    fn clear_footer(&mut self) {
        let top = self.layout.footer_y() - 1;
        Rectangle::new(
            Point::new(0, top),
            Size::new(self.layout.width, (self.layout.height as i32 - top) as u32),
        )
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::Off))
        .draw(&mut self.buffer)
        .ok();
    }
}

impl<S> TextMeasurer for EinkCanvas<S> {
    fn text_width(&self, text: &str) -> u32 {
        mono_width(LABEL_FONT, text)
    }
}

impl<S: FrameSink> Canvas for EinkCanvas<S> {
    fn render_position(&mut self, frame: &PositionFrame<'_>) -> TrackerResult<()> {
        self.buffer.blank();
        self.draw_map_background();

        let left = self.layout.text_left;
        self.draw_text(&frame.distance_text(), left, 2, DISTANCE_FONT);
        self.draw_text("miles away", left, 24, LABEL_FONT);

        let line_height = LABEL_FONT.character_size.height as i32 + 1;
        let chars_per_line = (self.layout.column_width() / glyph_advance(LABEL_FONT)) as usize;
        let last_line_y = self.layout.footer_y() - line_height;
        let mut y = 38;
        for line in wrap_words(frame.label, chars_per_line) {
            if y > last_line_y {
                break;
            }
            self.draw_text(&line, left, y, LABEL_FONT);
            y += line_height;
        }

        for point in &frame.trail {
            self.draw_marker(*point, TRAIL_DIAMETER);
        }
        self.draw_marker(frame.marker, MARKER_DIAMETER);

        let footer_y = self.layout.footer_y();
        self.draw_text(frame.observed_at, left, footer_y, FOOTER_FONT);

        self.present()
    }

    fn render_fetch_error(&mut self, message: &str) -> TrackerResult<()> {
        self.clear_footer();
        let footer_y = self.layout.footer_y();
        self.draw_text(message, self.layout.text_left, footer_y, FOOTER_FONT);
        self.present()
    }

    fn render_status(&mut self, lines: &[&str]) -> TrackerResult<()> {
        self.buffer.blank();

        let fonts: Vec<&MonoFont<'static>> = lines
            .iter()
            .map(|line| {
                if mono_width(DISTANCE_FONT, line) <= self.layout.width {
                    DISTANCE_FONT
                } else {
                    LABEL_FONT
                }
            })
            .collect();

        let gap = 8;
        let block_height: i32 = fonts
            .iter()
            .map(|f| f.character_size.height as i32 + gap)
            .sum::<i32>()
            - gap;
        let mut y = (self.layout.height as i32 - block_height).max(0) / 2;

        for (line, font) in lines.iter().zip(fonts) {
            let x = (self.layout.width as i32 - mono_width(font, line) as i32).max(0) / 2;
            self.draw_text(line, x, y, font);
            y += font.character_size.height as i32 + gap;
        }

        Line::new(
            Point::new(0, self.layout.height as i32 - 1),
            Point::new(self.layout.width as i32 - 1, self.layout.height as i32 - 1),
        )
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(&mut self.buffer)
        .ok();

        self.present()
    }
}

fn glyph_advance(font: &MonoFont<'_>) -> u32 {
    font.character_size.width + font.character_spacing
}

fn mono_width(font: &MonoFont<'_>, text: &str) -> u32 {
    text.chars().count() as u32 * glyph_advance(font)
}

/// Greedy word wrap. Words longer than a line are split.
pub fn wrap_words(text: &str, chars_per_line: usize) -> Vec<String> {
    let chars_per_line = chars_per_line.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > chars_per_line {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..chars_per_line).collect());
        }
        if word.is_empty() {
            continue;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word.len() > chars_per_line {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
