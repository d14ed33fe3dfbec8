//! # Scenario Tests
//!
//! These tests wire several modules together the way the binary does: the
//! service reply flows through projection, label fitting and the renderer,
//! and a failed WiFi join flows through setup mode back to a working boot.
//! Hardware is replaced by the fakes in [`fakes`].


use crate::config::{Config, FailurePolicy};
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::device::{MonotonicClock, ResetChord};
use crate::network::{LinkStatus, ScannedNetwork};
use crate::poll_loop::{Peripherals, PollLoop, PollSettings, TickOutcome};
use crate::portal::{enter_setup_mode, CaptivePortal, PortalRequest};
use crate::provisioning::{
    BootDecision, BootOutcome, ProvisioningSettings, ProvisioningStateMachine,
};
use crate::renderer::{EinkCanvas, Layout};
use crate::service::PositionRequest;
use crate::framebuffer::PbmFileSink;
use crate::{Coordinates, PixelPoint};
use fakes::{
    sample_credentials, CannedHttp, CanvasCall, HeldAfter, MemoryStore, RecordingCanvas,
    RecordingLamp, ScriptedNetwork,
};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const NORTH_PACIFIC: &str = r#"{"lat":1.756,"lon":-109.3535,"dist":6871,"ocean":"North Pacific Ocean","updatedAt":"Nov 30 17:40 UTC"}"#;

fn request_for(home: Coordinates) -> PositionRequest {
    PositionRequest {
        url: "http://service.test/isslocator".to_string(),
        token: "token".to_string(),
        device_id: Some("badger-test".to_string()),
        home,
    }
}

/// A mid-ocean reply on a 192×128 map that starts 203 px from the left edge.
///
/// The station is just north of the equator and well west of Greenwich, so the
/// marker must land left of the map's centre column and close to its middle row.
#[tokio::test(start_paused = true)]
async fn north_pacific_reply_renders_label_marker_and_distance() {
    let mut config = Config::default();
    config.display.width = 395;
    let viewport = config.map_viewport();
    assert_eq!(viewport.left_offset, 203);

    let http = CannedHttp::new([Ok(NORTH_PACIFIC.to_string())]);
    let button = HeldAfter::never();
    let mut lp = PollLoop::new(
        &http,
        request_for(sample_credentials().location()),
        Peripherals {
            canvas: RecordingCanvas::default(),
            lamp: RecordingLamp::default(),
            clock: MonotonicClock,
            reset: ResetChord::new(&button, &button),
            store: MemoryStore::with(sample_credentials()),
        },
        viewport,
        config.label_fitter(),
        PollSettings::from_config(&config),
    );

    assert_eq!(
        lp.tick().await.unwrap(),
        TickOutcome::Updated {
            distance_miles: 6871
        }
    );

    let io = lp.peripherals();
    let Some(CanvasCall::Position {
        distance,
        label,
        marker,
        ..
    }) = io.canvas.calls.first()
    else {
        panic!("expected a position frame, got {:?}", io.canvas.calls);
    };
    assert_eq!(distance, "06871");
    assert_eq!(label, "North Pacific Ocean");

    let centre_x = viewport.left_offset + viewport.meridian_x();
    assert!(
        marker.x > viewport.left_offset && marker.x < centre_x,
        "marker x {} should sit in the western half of the map",
        marker.x
    );
    assert!(
        (marker.y - viewport.equator_y()).abs() <= 2,
        "marker y {} should sit near the equator",
        marker.y
    );
    assert_eq!(*marker, PixelPoint::new(241, 63));

    assert_eq!(io.lamp.states, vec![false], "6871 miles is not close by");
}

/// Frames reach the PBM file, and a later fetch failure only touches the footer.
#[tokio::test(start_paused = true)]
async fn error_overlay_keeps_last_good_frame_on_disk() {
    let dir = TempDir::new().unwrap();
    let frame_path = dir.path().join("frame.pbm");
    let config = Config::default();

    let http = CannedHttp::new([
        Ok(NORTH_PACIFIC.to_string()),
        Err("connection reset".to_string()),
    ]);
    let button = HeldAfter::never();
    let mut lp = PollLoop::new(
        &http,
        request_for(sample_credentials().location()),
        Peripherals {
            canvas: EinkCanvas::new(Layout::from_config(&config), PbmFileSink::new(&frame_path)),
            lamp: RecordingLamp::default(),
            clock: MonotonicClock,
            reset: ResetChord::new(&button, &button),
            store: MemoryStore::with(sample_credentials()),
        },
        config.map_viewport(),
        config.label_fitter(),
        PollSettings::from_config(&config),
    );

    lp.tick().await.unwrap();
    let first = fs::read(&frame_path).unwrap();
    assert!(first.starts_with(b"P4\n296 128\n"));

    // Default layout puts the map at 104 px, so the marker centre is (142, 63)
    assert!(lp.peripherals().canvas.frame().pixel(142, 63));

    tokio::time::advance(Duration::from_secs(300)).await;
    assert_eq!(lp.tick().await.unwrap(), TickOutcome::FetchFailed);

    let second = fs::read(&frame_path).unwrap();
    assert_eq!(first.len(), second.len());
    assert_ne!(first, second, "overlay should change the footer");
    assert!(lp.peripherals().canvas.frame().pixel(142, 63));

    // Rows above the footer strip are byte-for-byte unchanged
    let header_len = b"P4\n296 128\n".len();
    let bytes_per_row = 296usize.div_ceil(8);
    let footer_top = (Layout::from_config(&config).footer_y() - 1) as usize;
    let untouched = header_len + bytes_per_row * footer_top;
    assert_eq!(first[..untouched], second[..untouched]);

    assert_eq!(lp.peripherals().lamp.states, vec![false]);
}

/// Stale password → setup mode → new credentials → a clean boot that goes online.
#[tokio::test(start_paused = true)]
async fn stale_credentials_recover_through_setup_mode() {
    let mut store = MemoryStore::with(sample_credentials());
    let settings = ProvisioningSettings {
        failure_policy: FailurePolicy::Reprovision,
        ..ProvisioningSettings::default()
    };
    let no_reset = ResetChord::new(HeldAfter::never(), HeldAfter::never());

    // First boot: the router's password changed
    let mut net = ScriptedNetwork::statuses(&[LinkStatus::Connecting, LinkStatus::WrongPassword]);
    net.scan_results = vec![
        ScannedNetwork::new("HomeNet", -50),
        ScannedNetwork::new("HomeNet", -35),
    ];
    let mut canvas = RecordingCanvas::default();
    let outcome = ProvisioningStateMachine::new(&mut store, &mut net, settings)
        .establish(&mut canvas, &no_reset)
        .await
        .unwrap();
    assert_eq!(outcome, BootOutcome::Provision);
    assert!(store.record.is_none());

    let networks = enter_setup_mode(&mut net, &mut canvas, "ISS Locator").unwrap();
    assert_eq!(networks, vec![ScannedNetwork::new("HomeNet", -35)]);

    let config = Config::default();
    let mut portal = CaptivePortal::new(
        &mut store,
        config.portal.ap_domain.clone(),
        config.location.clone(),
        networks,
    );
    let reply = portal.handle(&PortalRequest::post(
        "/configure",
        "iss.locator",
        "ssid=HomeNet&password=new-password&lat=40.7&lng=-74.0",
    ));
    assert!(reply.reboot_after);
    drop(portal);

    // Second boot: the new password works
    let mut net = ScriptedNetwork::statuses(&[LinkStatus::GotAddress]);
    let outcome = ProvisioningStateMachine::new(&mut store, &mut net, settings)
        .establish(&mut canvas, &no_reset)
        .await
        .unwrap();
    let BootOutcome::Online(credentials) = outcome else {
        panic!("expected to go online, got {outcome:?}");
    };
    assert_eq!(credentials.password, "new-password");
    assert_eq!(credentials.location(), Coordinates::new(40.7, -74.0));
    assert_eq!(
        net.joined,
        vec![("HomeNet".to_string(), "new-password".to_string())]
    );
}

/// What the portal writes is exactly what the next boot reads back from disk.
#[test]
fn portal_submission_survives_reboot_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wifi.json");
    let config = Config::default();

    let mut portal = CaptivePortal::new(
        FileCredentialStore::new(&path),
        config.portal.ap_domain.clone(),
        config.location.clone(),
        Vec::new(),
    );
    let reply = portal.handle(&PortalRequest::post(
        "/configure",
        "iss.locator",
        "ssid=Caf%C3%A9+WiFi&password=s%26cret&lat=-33.86&lng=151.21",
    ));
    assert_eq!(reply.status, 200);

    let mut store = FileCredentialStore::new(&path);
    let mut net = ScriptedNetwork::default();
    let mut machine =
        ProvisioningStateMachine::new(&mut store, &mut net, ProvisioningSettings::default());
    let BootDecision::Connect(credentials) = machine.boot() else {
        panic!("credentials should be on disk");
    };
    assert_eq!(credentials.ssid, "Café WiFi");
    assert_eq!(credentials.password, "s&cret");
    assert_eq!(credentials.latitude, -33.86);
    assert_eq!(credentials.longitude, 151.21);

    drop(machine);
    store.delete().unwrap();
    assert!(!path.exists());
}
