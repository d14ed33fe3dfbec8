//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the iss-config.toml file.
//! It provides a centralized way to configure the position service, refresh timing,
//! panel layout, captive-portal details and GPIO pins.
//!
//! Every section has defaults matching the original device, so a partial file (or
//! no file at all) still yields a working configuration.

use crate::label::LabelFitter;
use crate::projection::Viewport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "iss-config.toml";

/// Application configuration loaded from iss-config.toml
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Remote position service
    pub service: ServiceConfig,
    /// Poll loop and provisioning timing
    pub tracker: TrackerConfig,
    /// Location offered by the setup form
    pub location: LocationConfig,
    /// Panel and map layout
    pub display: DisplayConfig,
    /// Captive portal and credential storage
    pub portal: PortalConfig,
    /// GPIO assignments (only used with the `hardware` feature)
    pub hardware: HardwareConfig,
}

/// Position service endpoint and access token
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service URL, queried as `<url>?lat=..&lng=..`
    pub url: String,
    /// Sent as the `X-ISS-Locator-Token` header
    pub token: String,
    /// Optional device identifier, sent as `deviceid`
    pub device_id: Option<String>,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
}

/// What to do when the stored network cannot be joined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Delete the credentials and go straight to setup mode.
    #[default]
    Reprovision,
    /// Show the error until both reset buttons are held, then delete and reboot.
    AwaitManualReset,
}

/// Poll loop and provisioning timing
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between position fetches
    pub refresh_interval_secs: u64,
    /// Lamp turns on at or below this distance
    pub close_by_distance_miles: u32,
    /// Number of positions kept in the trail (current one included)
    pub max_location_history: usize,
    /// Loop tick in milliseconds; bounds reset-button latency
    pub tick_millis: u64,
    /// Give up joining the stored network after this many seconds
    pub connect_timeout_secs: u64,
    /// How often to ask the network stack for its link status
    pub connect_poll_millis: u64,
    pub failure_policy: FailurePolicy,
}

/// Default location offered in the setup form
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LocationConfig {
    pub default_latitude: f64,
    pub default_longitude: f64,
    /// Human-readable name for the default location
    pub default_place: String,
}

/// Panel and map layout
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Panel width in pixels
    pub width: u32,
    /// Panel height in pixels
    pub height: u32,
    /// World map width; the map is right-aligned on the panel
    pub map_width: u32,
    pub map_height: u32,
    pub map_top_offset: i32,
    /// Pixel budget for the location label (wrapped over several lines)
    pub label_max_width: u32,
    /// Left margin for the text column
    pub text_left_offset: i32,
    /// Where device mode writes rendered frames (PBM) for the panel driver
    pub frame_path: PathBuf,
}

/// Captive portal and credential storage
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Access point name shown on the setup screen
    pub ap_name: String,
    /// Host name the portal answers to; everything else is redirected here
    pub ap_domain: String,
    pub listen_addr: SocketAddr,
    /// JSON credential record; its absence means "run setup"
    pub credentials_path: PathBuf,
    /// Delay between the confirmation page and the reboot
    pub reboot_delay_millis: u64,
}

/// GPIO assignments (BCM numbering)
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// The two buttons that must be held together to wipe credentials
    pub reset_pins: [u8; 2],
    /// Proximity lamp
    pub lamp_pin: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            url: "http://localhost:8080/isslocator".to_string(),
            token: "change-me".to_string(),
            device_id: None,
            timeout_secs: 20,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            refresh_interval_secs: 300,
            close_by_distance_miles: 1000,
            max_location_history: crate::history::MAX_LOCATION_HISTORY,
            tick_millis: 200,
            connect_timeout_secs: 30,
            connect_poll_millis: 200,
            failure_policy: FailurePolicy::Reprovision,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            default_latitude: 52.9676828,
            default_longitude: -1.1616151,
            default_place: "Nottingham, UK".to_string(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            width: 296,  // Badger-class 2.9" panel
            height: 128, // Badger-class 2.9" panel
            map_width: 192,
            map_height: 128,
            map_top_offset: 0,
            label_max_width: 330,
            text_left_offset: 2,
            frame_path: PathBuf::from("/tmp/iss-frame.pbm"),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            ap_name: "ISS Locator".to_string(),
            ap_domain: "iss.locator".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            credentials_path: PathBuf::from("wifi.json"),
            reboot_delay_millis: 1000,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        HardwareConfig {
            reset_pins: [5, 6],
            lamp_pin: 26,
        }
    }
}

impl Config {
    /// Load configuration from iss-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(service = %config.service.url, "loaded configuration");
                    config
                }
                Err(e) => {
                    warn!("invalid config file format: {}", e);
                    warn!("using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                info!(
                    "no config file at {}, using default configuration",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }

    /// Save current configuration as pretty TOML
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!("configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Where the world map sits on the panel (right-aligned).
    pub fn map_viewport(&self) -> Viewport {
        let d = &self.display;
        Viewport {
            width: d.map_width,
            height: d.map_height,
            left_offset: d.width.saturating_sub(d.map_width) as i32,
            top_offset: d.map_top_offset,
        }
    }

    pub fn label_fitter(&self) -> LabelFitter {
        LabelFitter::new(self.display.label_max_width)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.refresh_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tracker.tick_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker.connect_timeout_secs)
    }

    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tracker.connect_poll_millis)
    }

    pub fn reboot_delay(&self) -> Duration {
        Duration::from_millis(self.portal.reboot_delay_millis)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_secs)
    }
}
