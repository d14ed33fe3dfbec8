//! NetworkManager adapter for the WiFi capability.
//!
//! Everything goes through the `nmcli` command line tool so the binary needs no
//! D-Bus bindings. Joining runs as a child process that [`NetworkStack::status`]
//! polls with `try_wait`, so the provisioning timeout stays in charge.
//!
//! The setup access point is an open, shared-mode connection. Catching every
//! DNS name needs one line of dnsmasq config on the device:
//! `address=/#/10.42.0.1` in `/etc/NetworkManager/dnsmasq-shared.d/captive.conf`.

use iss_locator_lib::network::{LinkStatus, NetworkStack, ScannedNetwork};
use iss_locator_lib::{TrackerError, TrackerResult};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

const SETUP_CONNECTION: &str = "iss-locator-setup";

#[derive(Debug, Default)]
pub struct NmcliNetwork {
    join: Option<Child>,
    settled: Option<LinkStatus>,
}

impl NmcliNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

fn nmcli(args: &[&str]) -> TrackerResult<String> {
    debug!(?args, "nmcli");
    let output = Command::new("nmcli")
        .args(args)
        .output()
        .map_err(|e| TrackerError::Network(format!("could not run nmcli: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(TrackerError::Network(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// Map a finished `nmcli device wifi connect` onto a link status.
fn classify_join(success: bool, stderr: &str) -> LinkStatus {
    if success {
        return LinkStatus::GotAddress;
    }
    let stderr = stderr.to_lowercase();
    if stderr.contains("secrets were required") || stderr.contains("password") {
        LinkStatus::WrongPassword
    } else if stderr.contains("no network with ssid") {
        LinkStatus::NetworkNotFound
    } else {
        LinkStatus::Failed
    }
}

/// Parse `nmcli -t -f SSID,SIGNAL device wifi list` output.
///
/// Terse mode escapes `:` and `\` inside values, so the signal is whatever
/// follows the last unescaped colon.
fn parse_scan(stdout: &str) -> Vec<ScannedNetwork> {
    stdout
        .lines()
        .filter_map(|line| {
            let (ssid, signal) = split_terse(line)?;
            let signal = signal.trim().parse().ok()?;
            Some(ScannedNetwork::new(ssid, signal))
        })
        .collect()
}

fn split_terse(line: &str) -> Option<(String, &str)> {
    let mut ssid = String::new();
    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    ssid.push(escaped);
                }
            }
            ':' => return Some((ssid, &line[i + 1..])),
            c => ssid.push(c),
        }
    }
    None
}

impl NetworkStack for NmcliNetwork {
    fn connect(&mut self, ssid: &str, password: &str) -> TrackerResult<()> {
        // Leftover setup AP would hold the radio
        let _ = nmcli(&["connection", "down", SETUP_CONNECTION]);

        let mut command = Command::new("nmcli");
        command.args(["--wait", "25", "device", "wifi", "connect", ssid]);
        if !password.is_empty() {
            command.args(["password", password]);
        }
        let child = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TrackerError::Network(format!("could not run nmcli: {e}")))?;

        self.join = Some(child);
        self.settled = None;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if let Some(status) = self.settled {
            return status;
        }
        let Some(child) = self.join.as_mut() else {
            return LinkStatus::Idle;
        };

        match child.try_wait() {
            Ok(None) => LinkStatus::Connecting,
            Ok(Some(exit)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                let status = classify_join(exit.success(), &stderr);
                if status != LinkStatus::GotAddress {
                    warn!(stderr = %stderr.trim(), "nmcli connect failed");
                }
                self.join = None;
                self.settled = Some(status);
                status
            }
            Err(e) => {
                warn!("lost track of nmcli: {}", e);
                self.join = None;
                self.settled = Some(LinkStatus::Failed);
                LinkStatus::Failed
            }
        }
    }

    fn scan(&mut self) -> TrackerResult<Vec<ScannedNetwork>> {
        let stdout = nmcli(&[
            "-t", "-f", "SSID,SIGNAL", "device", "wifi", "list", "--rescan", "yes",
        ])?;
        Ok(parse_scan(&stdout))
    }

    fn start_access_point(&mut self, name: &str) -> TrackerResult<()> {
        let _ = nmcli(&["connection", "delete", SETUP_CONNECTION]);
        nmcli(&[
            "connection",
            "add",
            "type",
            "wifi",
            "ifname",
            "*",
            "con-name",
            SETUP_CONNECTION,
            "autoconnect",
            "no",
            "ssid",
            name,
            "802-11-wireless.mode",
            "ap",
            "ipv4.method",
            "shared",
        ])?;
        nmcli(&["connection", "up", SETUP_CONNECTION])?;
        info!(name, "setup access point up");
        Ok(())
    }
}

impl Drop for NmcliNetwork {
    fn drop(&mut self) {
        if let Some(mut child) = self.join.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
