//! Small hardware capabilities: buttons, the proximity lamp, a monotonic clock
//! and the reboot switch, plus the stand-ins used in development mode.

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// A momentary input such as a front-panel button.
pub trait InputSignal {
    fn is_held(&self) -> bool;
}

/// The two inputs that must be held together to wipe credentials.
pub struct ResetChord<I> {
    first: I,
    second: I,
}

impl<I: InputSignal> ResetChord<I> {
    pub fn new(first: I, second: I) -> Self {
        Self { first, second }
    }

    pub fn is_engaged(&self) -> bool {
        self.first.is_held() && self.second.is_held()
    }
}

/// The proximity lamp.
pub trait IndicatorLamp {
    fn set_lit(&mut self, lit: bool);
}

/// Monotonic time source for scheduling.
pub trait Clock {
    fn now(&self) -> Instant;

    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Tokio's clock, so paused-time tests drive it too.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Restarts the device. Called from a background task, hence `Send + Sync`.
pub trait Rebooter: Send + Sync + 'static {
    fn reboot(&self);
}

/// Development stand-in for buttons nobody can press.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unpressed;

impl InputSignal for Unpressed {
    fn is_held(&self) -> bool {
        false
    }
}

/// Development stand-in for the LED: logs transitions.
#[derive(Debug, Default)]
pub struct LoggingLamp {
    lit: Option<bool>,
}

impl LoggingLamp {
    pub fn is_lit(&self) -> bool {
        self.lit.unwrap_or(false)
    }
}

impl IndicatorLamp for LoggingLamp {
    fn set_lit(&mut self, lit: bool) {
        if self.lit != Some(lit) {
            info!(lit, "proximity lamp");
        }
        self.lit = Some(lit);
    }
}
