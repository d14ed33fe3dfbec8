//! # ISS Locator Core Library
//!
//! This library holds the control logic for a small battery-powered e-paper device
//! that shows where the International Space Station is right now. Everything that
//! touches real hardware (panel, radio, buttons, LED, flash) sits behind a small
//! capability trait so the logic can be exercised on a desktop.
//!
//! ## Data Flow
//! 1. **Boot**: look for stored WiFi credentials ([`credentials`])
//! 2. **Provision**: no credentials, or they stopped working → captive portal
//!    ([`provisioning`], [`portal`])
//! 3. **Poll**: connected → fetch the ISS position every few minutes
//!    ([`poll_loop`], [`service`])
//! 4. **Render**: project onto the map, fit the place name, draw the trail
//!    ([`projection`], [`label`], [`history`], [`renderer`])
//!
//! ## Core Types
//! - [`Coordinates`]: a latitude/longitude pair as reported by the position service
//! - [`PixelPoint`]: a device-space pixel position
//! - [`PlaceDescriptor`]: what the station is over (an ocean or a place on land)
//! - [`PositionUpdate`]: one successful poll result
//! - [`Credentials`]: the persisted WiFi + home location record
//! - [`NetworkMode`]: where the provisioning state machine currently is

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// Module declarations
pub mod config;
pub mod credentials;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod history;
pub mod label;
pub mod network;
pub mod poll_loop;
pub mod portal;
pub mod projection;
pub mod provisioning;
pub mod renderer;
pub mod service;

#[cfg(test)]
mod tests;

pub use error::{TrackerError, TrackerResult};

/// A geographic position in decimal degrees.
///
/// Latitude is expected in `[-90, 90]` and longitude in `[-180, 180]`. The
/// position service is trusted to stay inside those ranges; [`Coordinates::clamped`]
/// is available for callers that want to be strict.
///
/// # Example
/// ```
/// use iss_locator_lib::Coordinates;
///
/// let iss = Coordinates::new(1.756, -109.3535);
/// assert!(iss.longitude < 0.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Clamp both components into their documented ranges.
    pub fn clamped(self) -> Self {
        Self {
            latitude: self.latitude.clamp(-90.0, 90.0),
            longitude: self.longitude.clamp(-180.0, 180.0),
        }
    }

    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A point in device pixel space. `(0, 0)` is the top-left corner of the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// What the station is currently over.
///
/// The service sends either an `ocean` name or any mix of
/// `locality`/`region`/`country`, never both forms at once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaceDescriptor {
    Ocean(String),
    Land {
        locality: Option<String>,
        region: Option<String>,
        country: Option<String>,
    },
}

impl PlaceDescriptor {
    /// A land descriptor with no fields at all.
    pub fn unknown() -> Self {
        PlaceDescriptor::Land {
            locality: None,
            region: None,
            country: None,
        }
    }
}

/// One successful poll of the position service.
///
/// Created per fetch and consumed by the render step. Only the projected
/// [`PixelPoint`] outlives it (in the history ring).
#[derive(Clone, Debug, PartialEq)]
pub struct PositionUpdate {
    pub coords: Coordinates,
    /// Great-circle distance from the device's configured location.
    pub distance_miles: u32,
    pub place: PlaceDescriptor,
    /// Pre-formatted "last updated" text from the service, e.g. `"Nov 30 17:40 UTC"`.
    pub observed_at: String,
    /// Service-side time of the observation, when the service reports one.
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Stored WiFi credentials plus the user's home location.
///
/// The record is written once by the captive portal and read once per boot.
/// Field names on disk match the portal's form fields so the file stays
/// readable by hand.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
    #[serde(rename = "lat", deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(rename = "lng", deserialize_with = "coordinate")]
    pub longitude: f64,
}

impl Credentials {
    pub fn location(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .finish()
    }
}

/// Older records stored the form values verbatim, so coordinates may be strings.
fn coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Why joining the stored network failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectFailure {
    WrongPassword,
    NetworkNotFound,
    Timeout,
    Unknown,
}

impl ConnectFailure {
    /// The text shown on the panel.
    pub fn message(&self) -> &'static str {
        match self {
            ConnectFailure::WrongPassword => "Wrong WiFi password.",
            ConnectFailure::NetworkNotFound => "Wrong WiFi SSID.",
            ConnectFailure::Timeout => "WiFi connection timed out.",
            ConnectFailure::Unknown => "Unknown WiFi error.",
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// State of the provisioning state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    Provisioning,
    Connecting,
    Connected,
    Failed(ConnectFailure),
}
