//! # Captive Portal
//!
//! While the device has no working credentials it raises an open access point
//! and serves a single configuration form. DNS capture on the access point
//! sends every lookup to the device, so any page the user's phone opens lands
//! here and gets redirected to `http://<ap_domain>/`.
//!
//! ## Routes
//! | Request              | Reply                                           |
//! |----------------------|-------------------------------------------------|
//! | wrong `Host`         | `302` to `http://<ap_domain>/`                  |
//! | `GET /`              | form with home location defaults and networks   |
//! | `POST /configure`    | persist credentials, confirmation, then reboot  |
//! | anything else        | `404 Not found.`                                |
//!
//! Routing ([`CaptivePortal::handle`]) is pure apart from the credential store.
//! [`serve`] wraps it in a small HTTP/1.1 server on a tokio listener.

use crate::config::LocationConfig;
use crate::credentials::CredentialStore;
use crate::device::Rebooter;
use crate::network::{NetworkStack, ScannedNetwork};
use crate::renderer::Canvas;
use crate::{Coordinates, Credentials, TrackerError, TrackerResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MAX_HEADER_BYTES: usize = 8 * 1024;
const MAX_BODY_BYTES: usize = 4 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const READ_POLL: Duration = Duration::from_millis(20);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lines of the on-device setup screen.
pub fn setup_screen(ap_name: &str) -> [&str; 3] {
    ["SETUP MODE", "Connect to WiFi network", ap_name]
}

/// Clean up a raw scan for the form: no blank names, one entry per name with
/// its strongest signal, strongest first. Ties keep discovery order.
pub fn rank_networks(scan: Vec<ScannedNetwork>) -> Vec<ScannedNetwork> {
    let mut ranked: Vec<ScannedNetwork> = Vec::with_capacity(scan.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for network in scan {
        let ssid = network.ssid.trim_matches('\0').trim();
        if ssid.is_empty() {
            continue;
        }
        match seen.get(ssid) {
            Some(&index) => {
                if ranked[index].signal < network.signal {
                    ranked[index].signal = network.signal;
                }
            }
            None => {
                seen.insert(ssid.to_string(), ranked.len());
                ranked.push(ScannedNetwork::new(ssid, network.signal));
            }
        }
    }

    // Stable sort keeps discovery order among equal signals
    ranked.sort_by(|a, b| b.signal.cmp(&a.signal));
    ranked
}

/// Scan, raise the access point and show the setup screen.
///
/// The scan runs first because most radios cannot scan while serving an AP.
/// A failed scan still brings the portal up, the user can type the name.
pub fn enter_setup_mode<N: NetworkStack, C: Canvas>(
    network: &mut N,
    canvas: &mut C,
    ap_name: &str,
) -> TrackerResult<Vec<ScannedNetwork>> {
    info!("entering setup mode");
    let scan = network.scan().unwrap_or_else(|e| {
        warn!("network scan failed: {}", e);
        Vec::new()
    });
    let ranked = rank_networks(scan);
    debug!(count = ranked.len(), "networks found");

    network.start_access_point(ap_name)?;

    if let Err(e) = canvas.render_status(&setup_screen(ap_name)) {
        warn!("setup screen failed: {}", e);
    }
    Ok(ranked)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortalRequest {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub host: Option<String>,
    pub body: Vec<u8>,
}

impl PortalRequest {
    pub fn get(path: &str, host: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            host: Some(host.to_string()),
            body: Vec::new(),
        }
    }

    pub fn post(path: &str, host: &str, body: &str) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            host: Some(host.to_string()),
            body: body.as_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortalReply {
    pub status: u16,
    pub content_type: &'static str,
    /// `Location` header for redirects.
    pub location: Option<String>,
    pub body: String,
    /// Restart the device once this reply has been delivered.
    pub reboot_after: bool,
}

impl PortalReply {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            location: None,
            body,
            reboot_after: false,
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            location: None,
            body: body.to_string(),
            reboot_after: false,
        }
    }

    fn redirect(domain: &str) -> Self {
        let target = format!("http://{domain}/");
        let body = page(
            "Redirecting",
            &format!(
                "<p>Continue to <a href=\"{0}\">{0}</a>.</p>",
                escape_html(&target)
            ),
        );
        Self {
            location: Some(target),
            ..Self::html(302, body)
        }
    }

    fn reason_phrase(&self) -> &'static str {
        match self.status {
            200 => "OK",
            302 => "Found",
            400 => "Bad Request",
            404 => "Not Found",
            _ => "Internal Server Error",
        }
    }

    /// Serialize as an HTTP/1.1 response that closes the connection.
    pub fn to_http(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.reason_phrase(),
            self.content_type,
            self.body.len()
        );
        if let Some(location) = &self.location {
            let _ = write!(head, "Location: {location}\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}

/// Form fields posted by the configuration page.
#[derive(Debug, Deserialize)]
struct ConfigForm {
    ssid: String,
    password: String,
    lat: String,
    lng: String,
}

impl ConfigForm {
    fn into_credentials(self) -> TrackerResult<Credentials> {
        let ssid = self.ssid.trim();
        if ssid.is_empty() {
            return Err(TrackerError::ConfigSubmissionInvalid(
                "network name is empty".to_string(),
            ));
        }

        let home = Coordinates::new(
            parse_degrees(&self.lat, "latitude")?,
            parse_degrees(&self.lng, "longitude")?,
        );
        if !home.in_range() {
            return Err(TrackerError::ConfigSubmissionInvalid(
                "latitude must be within 90 and longitude within 180 degrees".to_string(),
            ));
        }

        Ok(Credentials {
            ssid: ssid.to_string(),
            password: self.password,
            latitude: home.latitude,
            longitude: home.longitude,
        })
    }
}

fn parse_degrees(raw: &str, field: &str) -> TrackerResult<f64> {
    raw.trim()
        .parse()
        .map_err(|_| TrackerError::ConfigSubmissionInvalid(format!("{field} is not a number")))
}

pub struct CaptivePortal<S> {
    store: S,
    ap_domain: String,
    defaults: LocationConfig,
    networks: Vec<ScannedNetwork>,
    /// Network name of the record already saved this session.
    configured: Option<String>,
}

impl<S: CredentialStore> CaptivePortal<S> {
    pub fn new(
        store: S,
        ap_domain: impl Into<String>,
        defaults: LocationConfig,
        networks: Vec<ScannedNetwork>,
    ) -> Self {
        Self {
            store,
            ap_domain: ap_domain.into(),
            defaults,
            networks,
            configured: None,
        }
    }

    pub fn handle(&mut self, request: &PortalRequest) -> PortalReply {
        if !self.host_matches(request.host.as_deref()) {
            debug!(host = ?request.host, path = %request.path, "redirecting to portal");
            return PortalReply::redirect(&self.ap_domain.to_lowercase());
        }

        match (&request.method, request.path.as_str()) {
            (Method::Get, "/") => PortalReply::html(200, self.form_page()),
            (Method::Post, "/configure") => self.configure(&request.body),
            _ => PortalReply::text(404, "Not found."),
        }
    }

    fn host_matches(&self, host: Option<&str>) -> bool {
        let Some(host) = host else {
            return false;
        };
        let name = host.trim().split(':').next().unwrap_or_default();
        name.eq_ignore_ascii_case(&self.ap_domain)
    }

    fn configure(&mut self, body: &[u8]) -> PortalReply {
        // A reboot is already pending; keep the first record
        if let Some(ssid) = &self.configured {
            debug!(ssid = %ssid, "ignoring repeat submission");
            return PortalReply {
                reboot_after: true,
                ..PortalReply::html(200, configured_page(ssid))
            };
        }

        let submitted = serde_urlencoded::from_bytes::<ConfigForm>(body)
            .map_err(|e| TrackerError::ConfigSubmissionInvalid(e.to_string()))
            .and_then(ConfigForm::into_credentials);

        let credentials = match submitted {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("rejected configuration: {}", e);
                return PortalReply::html(400, error_page(&e.to_string()));
            }
        };

        if let Err(e) = self.store.save(&credentials) {
            warn!("could not save credentials: {}", e);
            return PortalReply::html(500, error_page("Could not save settings."));
        }
        info!(ssid = %credentials.ssid, "saved credentials");
        self.configured = Some(credentials.ssid.clone());

        PortalReply {
            reboot_after: true,
            ..PortalReply::html(200, configured_page(&credentials.ssid))
        }
    }

    fn form_page(&self) -> String {
        let mut options = String::new();
        for network in &self.networks {
            let _ = write!(
                options,
                "<option value=\"{}\">",
                escape_html(&network.ssid)
            );
        }

        let body = format!(
            concat!(
                "<form method=\"post\" action=\"/configure\">",
                "<label>WiFi network<br><input name=\"ssid\" list=\"networks\" required></label>",
                "<datalist id=\"networks\">{options}</datalist><br>",
                "<label>Password<br><input name=\"password\" type=\"password\"></label><br>",
                "<p>Your location (default: {place})</p>",
                "<label>Latitude<br><input name=\"lat\" value=\"{lat}\" required></label><br>",
                "<label>Longitude<br><input name=\"lng\" value=\"{lng}\" required></label><br>",
                "<button type=\"submit\">Save</button>",
                "</form>"
            ),
            options = options,
            place = escape_html(&self.defaults.default_place),
            lat = self.defaults.default_latitude,
            lng = self.defaults.default_longitude,
        );
        page("ISS Locator setup", &body)
    }
}

fn configured_page(ssid: &str) -> String {
    page(
        "Saved",
        &format!(
            "<p>Settings saved. The ISS Locator will now restart and join <b>{}</b>.</p>",
            escape_html(ssid)
        ),
    )
}

fn error_page(message: &str) -> String {
    page(
        "Invalid settings",
        &format!(
            "<p>{}</p><p><a href=\"/\">Back</a></p>",
            escape_html(message)
        ),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">",
            "<title>{title}</title></head><body><h1>{title}</h1>{body}</body></html>"
        ),
        title = escape_html(title),
        body = body,
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Parse one request out of the bytes received so far.
///
/// `Ok(None)` means the request line, headers or `Content-Length` body are
/// still incomplete.
pub fn parse_request(received: &[u8]) -> TrackerResult<Option<PortalRequest>> {
    let Some(head_len) = header_end(received) else {
        if received.len() > MAX_HEADER_BYTES {
            return Err(TrackerError::Network("request headers too large".to_string()));
        }
        return Ok(None);
    };
    if head_len > MAX_HEADER_BYTES {
        return Err(TrackerError::Network("request headers too large".to_string()));
    }

    let head = String::from_utf8_lossy(&received[..head_len]);
    let mut lines = head.lines().map(|line| line.trim_end_matches('\r'));

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(TrackerError::Network(format!(
            "malformed request line: {request_line:?}"
        )));
    };
    let path = target.split('?').next().unwrap_or("/").to_string();

    let mut host = None;
    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("host") {
            host = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| TrackerError::Network(format!("bad Content-Length: {value}")))?;
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(TrackerError::Network(format!(
            "request body too large: {content_length} bytes"
        )));
    }
    let Some(body) = received.get(head_len..head_len + content_length) else {
        return Ok(None);
    };

    Ok(Some(PortalRequest {
        method: Method::parse(method),
        path,
        host,
        body: body.to_vec(),
    }))
}

/// Length of the header block including its blank line. Bare `\n` line
/// endings are accepted.
fn header_end(received: &[u8]) -> Option<usize> {
    (0..received.len()).find_map(|i| match &received[i..] {
        [b'\n', b'\n', ..] => Some(i + 2),
        [b'\n', b'\r', b'\n', ..] => Some(i + 3),
        _ => None,
    })
}

enum Progress {
    Waiting,
    Request(PortalRequest),
    Malformed(TrackerError),
    Gone,
}

/// A client whose request has not fully arrived yet.
struct PendingConnection {
    stream: TcpStream,
    peer: SocketAddr,
    received: Vec<u8>,
    opened: Instant,
}

impl PendingConnection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            received: Vec::new(),
            opened: Instant::now(),
        }
    }

    /// Take whatever the socket has buffered without waiting for more.
    fn advance(&mut self) -> Progress {
        let mut chunk = [0u8; 1024];
        let mut closed = false;
        while self.received.len() <= MAX_HEADER_BYTES + MAX_BODY_BYTES {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => self.received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(peer = %self.peer, "read failed: {}", e);
                    return Progress::Gone;
                }
            }
        }

        match parse_request(&self.received) {
            Ok(Some(request)) => Progress::Request(request),
            Ok(None) if closed => {
                debug!(peer = %self.peer, "closed mid-request");
                Progress::Gone
            }
            Ok(None) if self.opened.elapsed() >= READ_TIMEOUT => {
                debug!(peer = %self.peer, "request timed out");
                Progress::Gone
            }
            Ok(None) => Progress::Waiting,
            Err(e) => Progress::Malformed(e),
        }
    }

    async fn deliver(mut self, reply: &PortalReply) {
        let written = tokio::time::timeout(WRITE_TIMEOUT, async {
            self.stream.write_all(&reply.to_http()).await?;
            self.stream.flush().await?;
            self.stream.shutdown().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %self.peer, "could not deliver reply: {}", e),
            Err(_) => debug!(peer = %self.peer, "reply timed out"),
        }
    }
}

/// Run the portal until the process is restarted.
///
/// Every open connection is read from the same loop, so a client that
/// connects and sends nothing never holds up the others. The first reply that
/// asks for a reboot fires a single background task which waits
/// `reboot_delay` and then calls [`Rebooter::reboot`]; the credential record is
/// already on disk by then.
pub async fn serve<S, R>(
    listener: TcpListener,
    mut portal: CaptivePortal<S>,
    rebooter: Arc<R>,
    reboot_delay: Duration,
) -> TrackerResult<()>
where
    S: CredentialStore,
    R: Rebooter,
{
    let (reboot_tx, reboot_rx) = oneshot::channel::<()>();
    let mut reboot_tx = Some(reboot_tx);
    tokio::spawn(async move {
        if reboot_rx.await.is_ok() {
            tokio::time::sleep(reboot_delay).await;
            info!("rebooting to apply new settings");
            rebooter.reboot();
        }
    });

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "captive portal listening");
    }

    let mut pending: Vec<PendingConnection> = Vec::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "portal connection");
                    pending.push(PendingConnection::new(stream, peer));
                }
                Err(e) => warn!("accept failed: {}", e),
            },
            _ = tokio::time::sleep(READ_POLL), if !pending.is_empty() => {}
        }

        let mut i = 0;
        while i < pending.len() {
            let reply = match pending[i].advance() {
                Progress::Waiting => {
                    i += 1;
                    continue;
                }
                Progress::Gone => {
                    pending.swap_remove(i);
                    continue;
                }
                Progress::Request(request) => portal.handle(&request),
                Progress::Malformed(e) => {
                    debug!("bad request: {}", e);
                    PortalReply::text(400, "Bad request.")
                }
            };

            pending.swap_remove(i).deliver(&reply).await;
            if reply.reboot_after {
                if let Some(tx) = reboot_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fakes::{MemoryStore, RecordingCanvas, CanvasCall, ScriptedNetwork};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    const DOMAIN: &str = "iss.locator";

    fn portal(store: &mut MemoryStore) -> CaptivePortal<&mut MemoryStore> {
        CaptivePortal::new(
            store,
            DOMAIN,
            LocationConfig::default(),
            vec![
                ScannedNetwork::new("HomeNet", -40),
                ScannedNetwork::new("Cafe <Guest>", -70),
            ],
        )
    }

    #[test]
    fn ranking_dedupes_drops_blank_and_sorts() {
        let scan = vec![
            ScannedNetwork::new("Cafe", -70),
            ScannedNetwork::new("", -20),
            ScannedNetwork::new("Home\0\0", -55),
            ScannedNetwork::new("Cafe", -45),
            ScannedNetwork::new("Office", -55),
            ScannedNetwork::new("Home", -60),
        ];
        assert_eq!(
            rank_networks(scan),
            vec![
                ScannedNetwork::new("Cafe", -45),
                ScannedNetwork::new("Home", -55),
                ScannedNetwork::new("Office", -55),
            ]
        );
    }

    #[test]
    fn foreign_host_is_redirected() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);

        let reply = portal.handle(&PortalRequest::get("/generate_204", "connectivitycheck.gstatic.com"));
        assert_eq!(reply.status, 302);
        assert_eq!(reply.location.as_deref(), Some("http://iss.locator/"));
        assert!(!reply.reboot_after);

        let missing_host = PortalRequest {
            host: None,
            ..PortalRequest::get("/", DOMAIN)
        };
        assert_eq!(portal.handle(&missing_host).status, 302);
    }

    #[test]
    fn host_check_ignores_case_and_port() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);
        assert_eq!(portal.handle(&PortalRequest::get("/", "ISS.Locator:80")).status, 200);
    }

    #[test]
    fn form_lists_networks_and_location_defaults() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);
        let reply = portal.handle(&PortalRequest::get("/", DOMAIN));

        assert_eq!(reply.status, 200);
        assert!(reply.body.contains("<option value=\"HomeNet\">"));
        assert!(reply.body.contains("Cafe &lt;Guest&gt;"));
        assert!(reply.body.contains("value=\"52.9676828\""));
        assert!(reply.body.contains("value=\"-1.1616151\""));
        assert!(reply.body.contains("Nottingham, UK"));
    }

    #[test]
    fn valid_submission_is_saved_and_reboots() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);
        let reply = portal.handle(&PortalRequest::post(
            "/configure",
            DOMAIN,
            "ssid=Home+Net&password=p%40ss&lat=51.5&lng=-0.12",
        ));
        drop(portal);

        assert_eq!(reply.status, 200);
        assert!(reply.reboot_after);
        assert!(reply.body.contains("<b>Home Net</b>"));

        let saved = store.record.unwrap();
        assert_eq!(saved.ssid, "Home Net");
        assert_eq!(saved.password, "p@ss");
        assert_eq!(saved.latitude, 51.5);
        assert_eq!(saved.longitude, -0.12);
    }

    #[test]
    fn invalid_submissions_are_rejected_without_saving() {
        let bodies = [
            "ssid=&password=x&lat=1&lng=2",
            "ssid=Home&lat=1&lng=2",
            "ssid=Home&password=x&lat=north&lng=2",
            "ssid=Home&password=x&lat=91&lng=2",
            "ssid=Home&password=x&lat=1&lng=-180.5",
            "ssid=Home&password=x&lat=NaN&lng=2",
            "ssid=Home&password=x&lat=1&lng=inf",
        ];
        for body in bodies {
            let mut store = MemoryStore::default();
            let mut portal = portal(&mut store);
            let reply = portal.handle(&PortalRequest::post("/configure", DOMAIN, body));
            drop(portal);
            assert_eq!(reply.status, 400, "{body}");
            assert!(!reply.reboot_after);
            assert!(store.record.is_none(), "{body}");
        }
    }

    #[test]
    fn repeat_submission_keeps_first_record() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);
        portal.handle(&PortalRequest::post(
            "/configure",
            DOMAIN,
            "ssid=First&password=one&lat=10&lng=20",
        ));
        let reply = portal.handle(&PortalRequest::post(
            "/configure",
            DOMAIN,
            "ssid=Second&password=two&lat=30&lng=40",
        ));
        drop(portal);

        assert_eq!(reply.status, 200);
        assert!(reply.reboot_after);
        assert!(reply.body.contains("<b>First</b>"));

        let saved = store.record.unwrap();
        assert_eq!(saved.ssid, "First");
        assert_eq!(saved.password, "one");
        assert_eq!(saved.latitude, 10.0);
    }

    #[test]
    fn open_network_with_empty_password_is_accepted() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);
        let reply = portal.handle(&PortalRequest::post(
            "/configure",
            DOMAIN,
            "ssid=Open&password=&lat=0&lng=0",
        ));
        assert_eq!(reply.status, 200);
    }

    #[test]
    fn unknown_routes_are_not_found() {
        let mut store = MemoryStore::default();
        let mut portal = portal(&mut store);
        for request in [
            PortalRequest::get("/configure", DOMAIN),
            PortalRequest::get("/favicon.ico", DOMAIN),
            PortalRequest::post("/", DOMAIN, ""),
        ] {
            let reply = portal.handle(&request);
            assert_eq!(reply.status, 404);
            assert_eq!(reply.body, "Not found.");
        }
    }

    #[test]
    fn reply_serializes_status_headers_and_body() {
        let reply = PortalReply::redirect(DOMAIN);
        let text = String::from_utf8(reply.to_http()).unwrap();
        assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(text.contains("Location: http://iss.locator/\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", reply.body.len())));
        assert!(text.ends_with(&reply.body));
    }

    #[test]
    fn request_parser_reads_line_headers_and_body() {
        let raw = b"POST /configure?x=1 HTTP/1.1\r\nHost: iss.locator\r\ncontent-length: 9\r\n\r\nssid=Home";
        let request = parse_request(raw).unwrap().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/configure");
        assert_eq!(request.host.as_deref(), Some("iss.locator"));
        assert_eq!(request.body, b"ssid=Home");

        let bare = parse_request(b"GET / HTTP/1.0\nHost: iss.locator\n\n").unwrap().unwrap();
        assert_eq!(bare.method, Method::Get);
        assert_eq!(bare.host.as_deref(), Some("iss.locator"));
    }

    #[test]
    fn request_parser_waits_for_the_rest() {
        assert!(parse_request(b"").unwrap().is_none());
        assert!(parse_request(b"GET / HTTP/1.1\r\nHost: iss").unwrap().is_none());
        assert!(parse_request(b"POST /configure HTTP/1.1\r\nContent-Length: 9\r\n\r\nssid")
            .unwrap()
            .is_none());
    }

    #[test]
    fn request_parser_rejects_oversized_and_malformed_input() {
        assert!(parse_request(b"POST / HTTP/1.1\r\nContent-Length: 999999\r\n\r\n").is_err());
        assert!(parse_request(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n").is_err());
        assert!(parse_request(b"NONSENSE\r\n\r\n").is_err());

        let mut unterminated = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        unterminated.extend(std::iter::repeat(b'a').take(MAX_HEADER_BYTES));
        assert!(parse_request(&unterminated).is_err());

        unterminated.extend_from_slice(b"\r\n\r\n");
        assert!(parse_request(&unterminated).is_err());
    }

    #[test]
    fn setup_mode_scans_before_raising_access_point() {
        let mut net = ScriptedNetwork::default();
        net.scan_results = vec![
            ScannedNetwork::new("B", -80),
            ScannedNetwork::new("A", -30),
        ];
        let mut canvas = RecordingCanvas::default();

        let ranked = enter_setup_mode(&mut net, &mut canvas, "ISS Locator").unwrap();
        assert_eq!(ranked[0].ssid, "A");
        assert_eq!(net.events, vec!["scan".to_string(), "ap:ISS Locator".to_string()]);
        assert_eq!(
            canvas.calls,
            vec![CanvasCall::status(&["SETUP MODE", "Connect to WiFi network", "ISS Locator"])]
        );
    }

    struct CountingRebooter(AtomicUsize);

    impl Rebooter for CountingRebooter {
        fn reboot(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn exchange(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn server_saves_then_reboots_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let rebooter = Arc::new(CountingRebooter(AtomicUsize::new(0)));
        let mut store = MemoryStore::default();

        let body = "ssid=Home&password=pw&lat=1.5&lng=2.5";
        let post = format!(
            "POST /configure HTTP/1.1\r\nHost: iss.locator\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );

        {
            let server = serve(
                listener,
                portal(&mut store),
                rebooter.clone(),
                Duration::from_millis(20),
            );
            tokio::pin!(server);

            let client = async {
                let first = exchange(addr, &post).await;
                let second = exchange(addr, &post).await;
                (first, second)
            };

            tokio::select! {
                _ = &mut server => panic!("server stopped"),
                (first, second) = client => {
                    assert!(first.starts_with("HTTP/1.1 200 OK"));
                    assert!(second.starts_with("HTTP/1.1 200 OK"));
                }
            }
        }

        assert_eq!(store.record.as_ref().map(|c| c.ssid.as_str()), Some("Home"));

        for _ in 0..100 {
            if rebooter.0.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rebooter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_redirects_and_keeps_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let rebooter = Arc::new(CountingRebooter(AtomicUsize::new(0)));
        let mut store = MemoryStore::default();

        let server = serve(
            listener,
            portal(&mut store),
            rebooter.clone(),
            Duration::from_millis(1),
        );
        let client = async {
            let redirect = exchange(addr, "GET /hotspot HTTP/1.1\r\nHost: example.com\r\n\r\n").await;
            let form = exchange(addr, "GET / HTTP/1.1\r\nHost: iss.locator\r\n\r\n").await;
            (redirect, form)
        };

        tokio::select! {
            _ = server => panic!("server stopped"),
            (redirect, form) = client => {
                assert!(redirect.starts_with("HTTP/1.1 302 Found"));
                assert!(form.contains("<form"));
            }
        }
        assert_eq!(rebooter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn silent_client_does_not_hold_up_the_form() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let rebooter = Arc::new(CountingRebooter(AtomicUsize::new(0)));
        let mut store = MemoryStore::default();

        let server = serve(
            listener,
            portal(&mut store),
            rebooter.clone(),
            Duration::from_millis(1),
        );
        let client = async {
            let _silent = TcpStream::connect(addr).await.unwrap();
            let started = std::time::Instant::now();
            let form = exchange(addr, "GET / HTTP/1.1\r\nHost: iss.locator\r\n\r\n").await;
            (form, started.elapsed())
        };

        tokio::select! {
            _ = server => panic!("server stopped"),
            (form, elapsed) = client => {
                assert!(form.contains("<form"));
                assert!(elapsed < Duration::from_secs(1), "form took {elapsed:?}");
            }
        }
    }
}
