//! WiFi capability used by provisioning.
//!
//! The radio itself is out of scope; adapters translate whatever the platform
//! reports into [`LinkStatus`].

use crate::TrackerResult;
use tracing::info;

/// Link state as reported while joining a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    GotAddress,
    WrongPassword,
    NetworkNotFound,
    /// Any other failure the stack gave up on.
    Failed,
}

impl LinkStatus {
    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LinkStatus::Idle | LinkStatus::Connecting)
    }
}

/// One entry of a WiFi scan. Higher `signal` is stronger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedNetwork {
    pub ssid: String,
    pub signal: i32,
}

impl ScannedNetwork {
    pub fn new(ssid: impl Into<String>, signal: i32) -> Self {
        Self {
            ssid: ssid.into(),
            signal,
        }
    }
}

pub trait NetworkStack {
    /// Start joining `ssid`. Progress is observed through [`NetworkStack::status`].
    fn connect(&mut self, ssid: &str, password: &str) -> TrackerResult<()>;

    fn status(&mut self) -> LinkStatus;

    fn scan(&mut self) -> TrackerResult<Vec<ScannedNetwork>>;

    /// Raise an open access point named `name` with DNS capture.
    fn start_access_point(&mut self, name: &str) -> TrackerResult<()>;
}

impl<N: NetworkStack + ?Sized> NetworkStack for &mut N {
    fn connect(&mut self, ssid: &str, password: &str) -> TrackerResult<()> {
        (**self).connect(ssid, password)
    }

    fn status(&mut self) -> LinkStatus {
        (**self).status()
    }

    fn scan(&mut self) -> TrackerResult<Vec<ScannedNetwork>> {
        (**self).scan()
    }

    fn start_access_point(&mut self, name: &str) -> TrackerResult<()> {
        (**self).start_access_point(name)
    }
}

/// Development stand-in: the host is already online, so joining always
/// succeeds and the "access point" is just the portal on `listen_addr`.
#[derive(Debug, Default)]
pub struct HostNetwork {
    joined: bool,
}

impl NetworkStack for HostNetwork {
    fn connect(&mut self, ssid: &str, _password: &str) -> TrackerResult<()> {
        info!(ssid, "host network: treating as joined");
        self.joined = true;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if self.joined {
            LinkStatus::GotAddress
        } else {
            LinkStatus::Idle
        }
    }

    fn scan(&mut self) -> TrackerResult<Vec<ScannedNetwork>> {
        Ok(Vec::new())
    }

    fn start_access_point(&mut self, name: &str) -> TrackerResult<()> {
        info!(name, "host network: access point simulated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_and_connecting_keep_polling() {
        assert!(!LinkStatus::Idle.is_terminal());
        assert!(!LinkStatus::Connecting.is_terminal());
        assert!(LinkStatus::GotAddress.is_terminal());
        assert!(LinkStatus::WrongPassword.is_terminal());
        assert!(LinkStatus::NetworkNotFound.is_terminal());
        assert!(LinkStatus::Failed.is_terminal());
    }

    #[test]
    fn host_network_joins_immediately() {
        let mut net = HostNetwork::default();
        assert_eq!(net.status(), LinkStatus::Idle);
        net.connect("anything", "pw").unwrap();
        assert_eq!(net.status(), LinkStatus::GotAddress);
        assert!(net.scan().unwrap().is_empty());
    }
}
