//! # Location Label Fitting
//!
//! Turns a [`PlaceDescriptor`] into the line of text shown under the distance.
//! The panel only has room for a few short lines, so long land labels are
//! shortened in two steps:
//!
//! 1. With locality, region and country all present, the region is dropped.
//! 2. Anything still too wide is cut using an average glyph width and ends in
//!    `"..."`.
//!
//! Step 2 is an estimate. It trusts `average_glyph_px` instead of measuring
//! each candidate, so the result can still be a few pixels over budget with
//! proportional fonts or a long ellipsis. Ocean names are never shortened.

use crate::PlaceDescriptor;

/// Shown when the service knows nothing about the place below the station.
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

const ELLIPSIS: &str = "...";

/// Pixel width of a string in the font the label is drawn with.
pub trait TextMeasurer {
    fn text_width(&self, text: &str) -> u32;
}

/// Fitting parameters for the location label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelFitter {
    /// Total pixel budget for the label.
    pub max_width: u32,
    /// Assumed width of one character when estimating how much to cut.
    pub average_glyph_px: u32,
    /// Extra pixels cut so the ellipsis has somewhere to go.
    pub ellipsis_margin_px: u32,
}

impl LabelFitter {
    pub const fn new(max_width: u32) -> Self {
        Self {
            max_width,
            average_glyph_px: 6,
            ellipsis_margin_px: 12,
        }
    }

    /// Produce the display label for `place`.
    pub fn fit<M: TextMeasurer + ?Sized>(&self, place: &PlaceDescriptor, measure: &M) -> String {
        let (locality, region, country) = match place {
            PlaceDescriptor::Ocean(name) => return name.clone(),
            PlaceDescriptor::Land {
                locality,
                region,
                country,
            } => (
                clean_field(locality.as_deref()),
                clean_field(region.as_deref()),
                clean_field(country.as_deref()),
            ),
        };

        let mut label = join_fields(&[locality.as_deref(), region.as_deref(), country.as_deref()]);
        if label.is_empty() {
            return UNKNOWN_LOCATION.to_string();
        }

        if measure.text_width(&label) <= self.max_width {
            return label;
        }

        if locality.is_some() && region.is_some() && country.is_some() {
            label = join_fields(&[locality.as_deref(), country.as_deref()]);
        }

        let width = measure.text_width(&label);
        if width <= self.max_width {
            return label;
        }

        self.truncate(&label, width)
    }

    fn truncate(&self, label: &str, width: u32) -> String {
        let overflow = (width + self.ellipsis_margin_px).saturating_sub(self.max_width);
        let cut = (overflow / self.average_glyph_px.max(1)) as usize;
        let keep = label.chars().count().saturating_sub(cut);

        let kept: String = label.chars().take(keep).collect();
        format!("{}{}", kept.trim_matches(' '), ELLIPSIS)
    }
}

/// Fit `place` into `max_pixel_width` with the default glyph estimate.
pub fn fit<M: TextMeasurer + ?Sized>(
    place: &PlaceDescriptor,
    max_pixel_width: u32,
    measure: &M,
) -> String {
    LabelFitter::new(max_pixel_width).fit(place, measure)
}

/// Place names use '-' and '/' as joiners; both read better as spaces on the panel.
fn clean_field(field: Option<&str>) -> Option<String> {
    field
        .map(|f| f.replace(['-', '/'], " "))
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
}

fn join_fields(fields: &[Option<&str>]) -> String {
    let joined = fields
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    joined.trim_matches(|c| c == ' ' || c == ',').to_string()
}
