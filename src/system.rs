//! Ways to restart.

use iss_locator_lib::device::Rebooter;
use std::process::Command;
use tracing::{error, info};

/// Device mode: ask systemd for a full reboot.
#[derive(Debug, Default)]
pub struct SystemReboot;

impl Rebooter for SystemReboot {
    fn reboot(&self) {
        info!("rebooting");
        match Command::new("systemctl").arg("reboot").status() {
            Ok(status) if status.success() => {}
            Ok(status) => error!(%status, "systemctl reboot failed"),
            Err(e) => error!("could not run systemctl: {}", e),
        }
    }
}

/// Development mode: exit and let the shell (or a supervisor) start us again.
#[derive(Debug, Default)]
pub struct ProcessExit;

impl Rebooter for ProcessExit {
    fn reboot(&self) {
        info!("restart requested, exiting");
        std::process::exit(0);
    }
}
