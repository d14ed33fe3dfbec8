//! Crate-wide error type.
//!
//! Poll-loop failures are transient and never leave the loop; everything else
//! ends the current boot attempt and is shown on the panel.

use crate::service::FetchError;
use crate::ConnectFailure;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// No credential record on disk. A boot signal, not a fault.
    #[error("no stored credentials")]
    CredentialsMissing,

    /// The stored network could not be joined.
    #[error("connect failed: {reason}")]
    ConnectFailed { reason: ConnectFailure },

    /// Transport, HTTP status or decode failure talking to the position service.
    #[error(transparent)]
    FetchFailed(#[from] FetchError),

    /// The captive-portal form was missing a field or had a bad value.
    #[error("invalid configuration form: {0}")]
    ConfigSubmissionInvalid(String),

    #[error("credential storage: {0}")]
    Storage(#[from] io::Error),

    #[error("credential encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The network stack adapter reported an error of its own.
    #[error("network stack: {0}")]
    Network(String),

    #[error("display: {0}")]
    Display(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
