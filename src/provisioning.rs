//! # Network Provisioning
//!
//! Decides at boot whether the device can go online or has to ask the user for
//! WiFi details.
//!
//! ```text
//! no record ──────────────────────────────► Provisioning (captive portal)
//! record ──► Connecting ──► Connected ────► poll loop
//!                 │
//!                 └──────► Failed(reason) ─► policy
//! ```
//!
//! ## Failure Policies
//! Stale credentials must never be retried silently, and the user must be able
//! to recover without reflashing. Two deployments are supported, picked by
//! [`FailurePolicy`]:
//!
//! - **Reprovision**: delete the record and fall through to the captive portal.
//! - **AwaitManualReset**: keep the reason on screen until both reset buttons
//!   are held, then delete the record and reboot.
//!
//! ## Connect Polling
//! The link status is sampled every `poll_interval` until the stack reports a
//! terminal status. An overall timeout turns a stack that never settles into
//! `Failed(Timeout)`.

use crate::config::{Config, FailurePolicy};
use crate::credentials::CredentialStore;
use crate::device::{InputSignal, ResetChord};
use crate::network::{LinkStatus, NetworkStack};
use crate::renderer::Canvas;
use crate::{ConnectFailure, Credentials, NetworkMode, TrackerError, TrackerResult};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Second line of the failure screen under [`FailurePolicy::AwaitManualReset`].
pub const MANUAL_RESET_HINT: &str = "Press A and C buttons to reset.";
/// Second line of the failure screen under [`FailurePolicy::Reprovision`].
pub const REPROVISION_HINT: &str = "Starting setup mode...";

/// Timing and policy knobs for provisioning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvisioningSettings {
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    /// How often the reset chord is sampled while waiting for a manual reset.
    pub reset_poll_interval: Duration,
    /// How long "Connected!" stays up before the first poll.
    pub connected_notice: Duration,
    /// How long the failure reason stays up before setup mode takes over.
    pub failure_notice: Duration,
    pub failure_policy: FailurePolicy,
}

impl ProvisioningSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            poll_interval: config.connect_poll_interval(),
            reset_poll_interval: config.tick_interval(),
            connected_notice: Duration::from_secs(2),
            failure_notice: Duration::from_secs(3),
            failure_policy: config.tracker.failure_policy,
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of inspecting the credential store at boot.
#[derive(Clone, Debug, PartialEq)]
pub enum BootDecision {
    Connect(Credentials),
    Provision,
}

/// Where the boot sequence ended up.
#[derive(Clone, Debug, PartialEq)]
pub enum BootOutcome {
    /// Joined the stored network; run the poll loop with these credentials.
    Online(Credentials),
    /// No usable credentials; run the captive portal.
    Provision,
    /// Credentials were wiped by the user; restart the device.
    Reboot,
}

pub struct ProvisioningStateMachine<S, N> {
    store: S,
    network: N,
    settings: ProvisioningSettings,
    mode: Option<NetworkMode>,
}

impl<S: CredentialStore, N: NetworkStack> ProvisioningStateMachine<S, N> {
    pub fn new(store: S, network: N, settings: ProvisioningSettings) -> Self {
        Self {
            store,
            network,
            settings,
            mode: None,
        }
    }

    /// `None` until [`Self::boot`] has run.
    pub fn mode(&self) -> Option<NetworkMode> {
        self.mode
    }

    /// Read the credential record and pick the boot path.
    pub fn boot(&mut self) -> BootDecision {
        let decision = match self.store.require() {
            Ok(credentials) => BootDecision::Connect(credentials),
            Err(TrackerError::CredentialsMissing) => {
                debug!("no stored credentials");
                BootDecision::Provision
            }
            Err(e) => {
                warn!("credential store unreadable, entering setup: {}", e);
                BootDecision::Provision
            }
        };

        self.mode = Some(match decision {
            BootDecision::Connect(_) => NetworkMode::Connecting,
            BootDecision::Provision => NetworkMode::Provisioning,
        });
        decision
    }

    /// Join the stored network and wait for a terminal link status.
    pub async fn connect(&mut self, credentials: &Credentials) -> NetworkMode {
        self.mode = Some(NetworkMode::Connecting);
        info!(ssid = %credentials.ssid, "connecting");

        let mode = match self
            .network
            .connect(&credentials.ssid, &credentials.password)
        {
            Ok(()) => self.wait_for_link().await,
            Err(e) => {
                warn!("connect request rejected: {}", e);
                NetworkMode::Failed(ConnectFailure::Unknown)
            }
        };

        match mode {
            NetworkMode::Connected => info!("connected"),
            NetworkMode::Failed(reason) => warn!(%reason, "connect failed"),
            _ => {}
        }
        self.mode = Some(mode);
        mode
    }

    /// [`Self::connect`], with a failed join reported as
    /// [`TrackerError::ConnectFailed`].
    pub async fn join(&mut self, credentials: &Credentials) -> TrackerResult<()> {
        match self.connect(credentials).await {
            NetworkMode::Connected => Ok(()),
            NetworkMode::Failed(reason) => Err(TrackerError::ConnectFailed { reason }),
            // connect() only returns terminal modes
            mode => {
                warn!(?mode, "unexpected mode after connect");
                Err(TrackerError::ConnectFailed {
                    reason: ConnectFailure::Unknown,
                })
            }
        }
    }

    async fn wait_for_link(&mut self) -> NetworkMode {
        let deadline = Instant::now() + self.settings.connect_timeout;
        loop {
            let status = self.network.status();
            if status.is_terminal() {
                return mode_for(status);
            }
            if Instant::now() >= deadline {
                return NetworkMode::Failed(ConnectFailure::Timeout);
            }
            debug!(?status, "still connecting");
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Apply the configured policy after a failed connect.
    ///
    /// Under `Reprovision` the record is deleted here and the machine moves to
    /// `Provisioning`. Under `AwaitManualReset` nothing is deleted until
    /// [`Self::await_manual_reset`] sees the chord.
    pub fn handle_failure(&mut self, reason: ConnectFailure) -> TrackerResult<FailurePolicy> {
        match self.settings.failure_policy {
            FailurePolicy::Reprovision => {
                self.store.delete()?;
                info!(%reason, "deleted stored credentials, entering setup");
                self.mode = Some(NetworkMode::Provisioning);
            }
            FailurePolicy::AwaitManualReset => {
                info!(%reason, "waiting for manual reset");
            }
        }
        Ok(self.settings.failure_policy)
    }

    /// Block until both reset inputs are held, then delete the record.
    pub async fn await_manual_reset<I: InputSignal>(
        &mut self,
        chord: &ResetChord<I>,
    ) -> TrackerResult<()> {
        while !chord.is_engaged() {
            sleep(self.settings.reset_poll_interval).await;
        }
        self.store.delete()?;
        info!("reset chord held, deleted stored credentials");
        Ok(())
    }

    /// The whole boot sequence, with status screens.
    pub async fn establish<C: Canvas, I: InputSignal>(
        &mut self,
        canvas: &mut C,
        chord: &ResetChord<I>,
    ) -> TrackerResult<BootOutcome> {
        let credentials = match self.boot() {
            BootDecision::Connect(credentials) => credentials,
            BootDecision::Provision => return Ok(BootOutcome::Provision),
        };

        show(canvas, &["Connecting..."]);
        match self.join(&credentials).await {
            Ok(()) => {
                show(canvas, &["Connected!"]);
                sleep(self.settings.connected_notice).await;
                Ok(BootOutcome::Online(credentials))
            }
            Err(TrackerError::ConnectFailed { reason }) => {
                let hint = match self.settings.failure_policy {
                    FailurePolicy::Reprovision => REPROVISION_HINT,
                    FailurePolicy::AwaitManualReset => MANUAL_RESET_HINT,
                };
                show(canvas, &[reason.message(), hint]);

                match self.handle_failure(reason)? {
                    FailurePolicy::Reprovision => {
                        sleep(self.settings.failure_notice).await;
                        Ok(BootOutcome::Provision)
                    }
                    FailurePolicy::AwaitManualReset => {
                        self.await_manual_reset(chord).await?;
                        Ok(BootOutcome::Reboot)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn mode_for(status: LinkStatus) -> NetworkMode {
    match status {
        LinkStatus::GotAddress => NetworkMode::Connected,
        LinkStatus::WrongPassword => NetworkMode::Failed(ConnectFailure::WrongPassword),
        LinkStatus::NetworkNotFound => NetworkMode::Failed(ConnectFailure::NetworkNotFound),
        LinkStatus::Failed | LinkStatus::Idle | LinkStatus::Connecting => {
            NetworkMode::Failed(ConnectFailure::Unknown)
        }
    }
}

/// Status screens are best effort; a dead panel must not stop provisioning.
fn show<C: Canvas>(canvas: &mut C, lines: &[&str]) {
    if let Err(e) = canvas.render_status(lines) {
        warn!("status screen failed: {}", e);
    }
}
