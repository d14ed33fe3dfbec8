//! # ISS Locator Entry Point
//!
//! Boots the device: splash screen, WiFi provisioning, then either the captive
//! portal (no working credentials) or the position poll loop.
//!
//! ## Modes
//! - `--stdout`: development mode. Frames are printed as ASCII art, the lamp is
//!   logged, buttons never press and the host's own network is used.
//! - default: device mode. WiFi through NetworkManager, frames written as PBM
//!   images for the panel driver, reboots through systemd. Buttons and the LED
//!   use GPIO when built with `--features hardware`.
//!
//! `--config <path>` reads settings from a TOML file other than
//! `iss-config.toml`. Log verbosity follows `RUST_LOG` (default `info`).

mod nmcli;
mod system;

#[cfg(all(target_os = "linux", feature = "hardware"))]
mod gpio_rppal;

use anyhow::Context;
use iss_locator_lib::config::Config;
use iss_locator_lib::credentials::FileCredentialStore;
use iss_locator_lib::device::{
    IndicatorLamp, InputSignal, LoggingLamp, MonotonicClock, Rebooter, ResetChord, Unpressed,
};
use iss_locator_lib::framebuffer::{AsciiSink, PbmFileSink};
use iss_locator_lib::network::{HostNetwork, NetworkStack};
use iss_locator_lib::poll_loop::{LoopExit, Peripherals, PollLoop, PollSettings};
use iss_locator_lib::portal::{enter_setup_mode, serve, CaptivePortal};
use iss_locator_lib::provisioning::{BootOutcome, ProvisioningSettings, ProvisioningStateMachine};
use iss_locator_lib::renderer::{Canvas, EinkCanvas, Layout};
use iss_locator_lib::service::{PositionRequest, ReqwestClient};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SPLASH: [&str; 2] = ["ISS Locator", "Finding the station..."];
const SPLASH_DURATION: Duration = Duration::from_secs(3);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let development_mode = args.iter().any(|arg| arg == "--stdout");
    let config = match config_path(&args) {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(start(config, development_mode))
}

fn config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

async fn start(config: Config, development_mode: bool) -> anyhow::Result<()> {
    let layout = Layout::from_config(&config);

    if development_mode {
        info!("development mode: ASCII frames, host network");
        let canvas = EinkCanvas::new(layout, AsciiSink);
        return run(
            &config,
            canvas,
            HostNetwork::default(),
            LoggingLamp::default(),
            ResetChord::new(Unpressed, Unpressed),
            Arc::new(system::ProcessExit),
        )
        .await;
    }

    let canvas = EinkCanvas::new(layout, PbmFileSink::new(&config.display.frame_path));
    let network = nmcli::NmcliNetwork::new();
    let rebooter = Arc::new(system::SystemReboot);

    #[cfg(all(target_os = "linux", feature = "hardware"))]
    let (reset, lamp) = gpio_rppal::open(&config.hardware)?;

    #[cfg(not(all(target_os = "linux", feature = "hardware")))]
    let (reset, lamp) = {
        warn!("built without the hardware feature: reset buttons and lamp are simulated");
        (ResetChord::new(Unpressed, Unpressed), LoggingLamp::default())
    };

    run(&config, canvas, network, lamp, reset, rebooter).await
}

async fn run<C, N, L, I, R>(
    config: &Config,
    mut canvas: C,
    mut network: N,
    lamp: L,
    reset: ResetChord<I>,
    rebooter: Arc<R>,
) -> anyhow::Result<()>
where
    C: Canvas,
    N: NetworkStack,
    L: IndicatorLamp,
    I: InputSignal,
    R: Rebooter,
{
    if let Err(e) = canvas.render_status(&SPLASH) {
        warn!("splash screen failed: {}", e);
    }
    tokio::time::sleep(SPLASH_DURATION).await;

    let mut store = FileCredentialStore::new(&config.portal.credentials_path);
    let outcome = ProvisioningStateMachine::new(
        &mut store,
        &mut network,
        ProvisioningSettings::from_config(config),
    )
    .establish(&mut canvas, &reset)
    .await?;

    match outcome {
        BootOutcome::Online(credentials) => {
            let client = ReqwestClient::new(config.service_timeout())?;
            let request = PositionRequest {
                url: config.service.url.clone(),
                token: config.service.token.clone(),
                device_id: config.service.device_id.clone(),
                home: credentials.location(),
            };
            let mut poll_loop = PollLoop::new(
                client,
                request,
                Peripherals {
                    canvas,
                    lamp,
                    clock: MonotonicClock,
                    reset,
                    store,
                },
                config.map_viewport(),
                config.label_fitter(),
                PollSettings::from_config(config),
            );
            match poll_loop.run().await? {
                LoopExit::ResetRequested => rebooter.reboot(),
            }
        }
        BootOutcome::Provision => {
            let networks = enter_setup_mode(&mut network, &mut canvas, &config.portal.ap_name)?;
            let listener = TcpListener::bind(config.portal.listen_addr)
                .await
                .with_context(|| format!("bind portal on {}", config.portal.listen_addr))?;
            let portal = CaptivePortal::new(
                store,
                config.portal.ap_domain.clone(),
                config.location.clone(),
                networks,
            );
            serve(listener, portal, rebooter, config.reboot_delay()).await?;
        }
        BootOutcome::Reboot => rebooter.reboot(),
    }
    Ok(())
}
