//! # Geographic Projection
//!
//! Maps a latitude/longitude pair onto the world map drawn on the panel. The map
//! is an equirectangular image, so the projection is two independent linear
//! scalings:
//!
//! - **Longitude**: `width / 360` pixels per degree, measured from the meridian
//!   column (`width / 2`). West is left.
//! - **Latitude**: `height / 180` pixels per degree, measured from the equator
//!   row (`height / 2`). North is up.
//!
//! Both axes are rounded to the nearest pixel, then shifted by where the map
//! sits on the panel.

use crate::{Coordinates, PixelPoint};

/// Where the map sits on the panel and how big it is, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub left_offset: i32,
    pub top_offset: i32,
}

impl Viewport {
    /// The meridian column, relative to the map's left edge.
    pub fn meridian_x(&self) -> i32 {
        (self.width / 2) as i32
    }

    /// The equator row, relative to the map's top edge.
    pub fn equator_y(&self) -> i32 {
        (self.height / 2) as i32
    }
}

/// Project `coords` into panel pixel space.
///
/// Out-of-range input is clamped first, so the result is always on the map.
/// Half-pixel offsets round to even, matching the firmware the maps were
/// drawn for.
///
/// # Example
/// ```
/// use iss_locator_lib::projection::{project, Viewport};
/// use iss_locator_lib::{Coordinates, PixelPoint};
///
/// let map = Viewport { width: 192, height: 128, left_offset: 104, top_offset: 0 };
/// assert_eq!(project(Coordinates::new(0.0, 0.0), &map), PixelPoint::new(200, 64));
/// ```
pub fn project(coords: Coordinates, viewport: &Viewport) -> PixelPoint {
    let coords = coords.clamped();

    let meridian_offset_px = coords.longitude.abs() * (viewport.width as f64 / 360.0);
    let meridian_x = viewport.meridian_x() as f64;
    let x = if coords.longitude < 0.0 {
        meridian_x - meridian_offset_px
    } else {
        meridian_x + meridian_offset_px
    };

    let equator_offset_px = coords.latitude.abs() * (viewport.height as f64 / 180.0);
    let equator_y = viewport.equator_y() as f64;
    let y = if coords.latitude >= 0.0 {
        equator_y - equator_offset_px
    } else {
        equator_y + equator_offset_px
    };

    PixelPoint::new(
        x.round_ties_even() as i32 + viewport.left_offset,
        y.round_ties_even() as i32 + viewport.top_offset,
    )
}
