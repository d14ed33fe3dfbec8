//! # Poll Loop
//!
//! Runs once the device is online. Every tick it:
//!
//! 1. Checks the reset chord. If both buttons are held the stored credentials
//!    are deleted and the loop exits so the caller can reboot into setup.
//! 2. Fetches a new position when one is due (first tick, then every
//!    `refresh_interval`). Failed attempts wait a full interval too.
//! 3. Redraws the screen on success, or overlays `"Network Error."` on the
//!    footer on failure, leaving the last good frame and the lamp alone.
//!
//! Fetch failures are never fatal and there is no backoff beyond the fixed
//! interval.

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::device::{Clock, IndicatorLamp, InputSignal, ResetChord};
use crate::history::HistoryRing;
use crate::label::LabelFitter;
use crate::projection::{project, Viewport};
use crate::renderer::{Canvas, PositionFrame, NETWORK_ERROR_TEXT};
use crate::service::{fetch_position, HttpClient, PositionRequest};
use crate::{PositionUpdate, TrackerResult};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub refresh_interval: Duration,
    pub tick_interval: Duration,
    /// Lamp lights when the station is this close or closer.
    pub close_by_distance_miles: u32,
    pub max_location_history: usize,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_interval: config.refresh_interval(),
            tick_interval: config.tick_interval(),
            close_by_distance_miles: config.tracker.close_by_distance_miles,
            max_location_history: config.tracker.max_location_history,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The hardware the loop drives.
pub struct Peripherals<C, L, K, I, S> {
    pub canvas: C,
    pub lamp: L,
    pub clock: K,
    pub reset: ResetChord<I>,
    pub store: S,
}

/// What one tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing due yet.
    Idle,
    Updated { distance_miles: u32 },
    FetchFailed,
    ResetRequested,
}

/// Why [`PollLoop::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Credentials were deleted; reboot into setup mode.
    ResetRequested,
}

pub struct PollLoop<H, C, L, K, I, S> {
    client: H,
    request: PositionRequest,
    io: Peripherals<C, L, K, I, S>,
    viewport: Viewport,
    fitter: LabelFitter,
    history: HistoryRing,
    settings: PollSettings,
    last_poll: Option<Instant>,
}

impl<H, C, L, K, I, S> PollLoop<H, C, L, K, I, S>
where
    H: HttpClient,
    C: Canvas,
    L: IndicatorLamp,
    K: Clock,
    I: InputSignal,
    S: CredentialStore,
{
    pub fn new(
        client: H,
        request: PositionRequest,
        io: Peripherals<C, L, K, I, S>,
        viewport: Viewport,
        fitter: LabelFitter,
        settings: PollSettings,
    ) -> Self {
        Self {
            client,
            request,
            io,
            viewport,
            fitter,
            history: HistoryRing::new(settings.max_location_history),
            settings,
            last_poll: None,
        }
    }

    pub fn peripherals(&self) -> &Peripherals<C, L, K, I, S> {
        &self.io
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    fn poll_due(&self) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => self.io.clock.elapsed_since(last) >= self.settings.refresh_interval,
        }
    }

    /// One iteration of the loop, without the trailing sleep.
    pub async fn tick(&mut self) -> TrackerResult<TickOutcome> {
        if self.io.reset.is_engaged() {
            self.io.store.delete()?;
            info!("reset chord held, deleted stored credentials");
            return Ok(TickOutcome::ResetRequested);
        }

        if !self.poll_due() {
            return Ok(TickOutcome::Idle);
        }

        debug!("polling position service");
        let fetched = fetch_position(&self.client, &self.request).await;
        self.last_poll = Some(self.io.clock.now());

        match fetched {
            Ok(update) => {
                let distance_miles = update.distance_miles;
                self.show(&update);
                Ok(TickOutcome::Updated { distance_miles })
            }
            Err(e) => {
                warn!("{}", e);
                if let Err(e) = self.io.canvas.render_fetch_error(NETWORK_ERROR_TEXT) {
                    warn!("error overlay failed: {}", e);
                }
                Ok(TickOutcome::FetchFailed)
            }
        }
    }

    fn show(&mut self, update: &PositionUpdate) {
        let marker = project(update.coords, &self.viewport);
        self.history.push(marker);
        let label = self.fitter.fit(&update.place, &self.io.canvas);

        info!(
            distance = update.distance_miles,
            place = %label,
            x = marker.x,
            y = marker.y,
            "position updated"
        );

        let frame = PositionFrame {
            distance_miles: update.distance_miles,
            label: &label,
            marker,
            trail: self.history.trail().copied().collect(),
            observed_at: &update.observed_at,
        };
        if let Err(e) = self.io.canvas.render_position(&frame) {
            warn!("position render failed: {}", e);
        }

        self.io
            .lamp
            .set_lit(update.distance_miles <= self.settings.close_by_distance_miles);
    }

    /// Tick forever, sleeping `tick_interval` in between, until a reset.
    pub async fn run(&mut self) -> TrackerResult<LoopExit> {
        info!(
            refresh_secs = self.settings.refresh_interval.as_secs(),
            "poll loop started"
        );
        loop {
            if self.tick().await? == TickOutcome::ResetRequested {
                return Ok(LoopExit::ResetRequested);
            }
            tokio::time::sleep(self.settings.tick_interval).await;
        }
    }
}
