//! # ISS Position Service Client
//!
//! Fetches the station's current position from the companion cloud function and
//! turns the reply into a [`PositionUpdate`].
//!
//! ## Request
//! `GET <url>?lat=<home lat>&lng=<home lng>[&deviceid=<id>]` with the shared
//! secret in the `X-ISS-Locator-Token` header.
//!
//! ## Response
//! ```json
//! {"lat":1.756,"lon":-109.3535,"dist":6871,"ocean":"North Pacific Ocean",
//!  "updatedAt":"Nov 30 17:40 UTC","timestamp":1701366000000}
//! ```
//! Over land the `ocean` key is replaced by any of `locality`, `region` and
//! `country`.
//!
//! ## Error Handling
//! The service gives no structured error detail, so every failure (transport,
//! timeout, HTTP status, bad JSON, a reply carrying an `error` key) collapses
//! into one [`FetchError`]. The poll loop treats it as transient.

use crate::{Coordinates, PlaceDescriptor, PositionUpdate};
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the shared secret.
pub const TOKEN_HEADER: &str = "X-ISS-Locator-Token";

/// Any failure to obtain a position.
#[derive(Error, Debug)]
#[error("position fetch failed: {detail}")]
pub struct FetchError {
    detail: String,
}

impl FetchError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::new(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::new(format!("bad payload: {e}"))
    }
}

/// Minimal HTTP GET capability.
#[allow(async_fn_in_trait)]
pub trait HttpClient {
    /// Perform a GET and return the body of a 2xx reply.
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<String, FetchError>;
}

impl<H: HttpClient + ?Sized> HttpClient for &H {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<String, FetchError> {
        (**self).get(url, query, headers).await
    }
}

/// [`HttpClient`] backed by reqwest with rustls.
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = builder(timeout).build()?;
        Ok(Self { client })
    }
}

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("iss-locator/", env!("CARGO_PKG_VERSION")))
}

impl HttpClient for ReqwestClient {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<String, FetchError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let body = request.send().await?.error_for_status()?.text().await?;
        Ok(body)
    }
}

/// Everything needed to ask the service where the station is.
#[derive(Clone, Debug)]
pub struct PositionRequest {
    pub url: String,
    pub token: String,
    pub device_id: Option<String>,
    /// Where the device lives; the service measures distance from here.
    pub home: Coordinates,
}

impl PositionRequest {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("lat", self.home.latitude.to_string()),
            ("lng", self.home.longitude.to_string()),
        ];
        if let Some(id) = &self.device_id {
            query.push(("deviceid", id.clone()));
        }
        query
    }
}

/// Wire shape of the service reply. Optional keys stay optional here and are
/// resolved into a [`PlaceDescriptor`] once, in [`decode_position`].
#[derive(Debug, Deserialize)]
struct ServiceResponse {
    lat: f64,
    lon: f64,
    dist: f64,
    #[serde(rename = "updatedAt")]
    updated_at: String,
    timestamp: Option<i64>,
    ocean: Option<String>,
    locality: Option<String>,
    region: Option<String>,
    country: Option<String>,
    error: Option<serde_json::Value>,
}

/// Decode a service reply.
pub fn decode_position(body: &str) -> Result<PositionUpdate, FetchError> {
    let reply: ServiceResponse = serde_json::from_str(body)?;

    if let Some(error) = reply.error {
        return Err(FetchError::new(format!("service reported error: {error}")));
    }

    let place = match reply.ocean {
        Some(name) => PlaceDescriptor::Ocean(name),
        None => PlaceDescriptor::Land {
            locality: reply.locality,
            region: reply.region,
            country: reply.country,
        },
    };

    Ok(PositionUpdate {
        coords: Coordinates::new(reply.lat, reply.lon),
        distance_miles: reply.dist.round().clamp(0.0, u32::MAX as f64) as u32,
        place,
        observed_at: reply.updated_at,
        timestamp: reply.timestamp.and_then(DateTime::from_timestamp_millis),
    })
}

/// Fetch and decode the current position.
pub async fn fetch_position<H: HttpClient>(
    client: &H,
    request: &PositionRequest,
) -> Result<PositionUpdate, FetchError> {
    let query = request.query();
    let headers = [(TOKEN_HEADER, request.token.as_str())];
    let body = client.get(&request.url, &query, &headers).await?;
    decode_position(&body)
}
