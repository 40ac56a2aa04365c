use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the session and command handling layers
#[derive(Error, Debug)]
pub enum Error {
    #[error("device `{0}` not found")]
    DeviceNotFound(String),
    #[error("device `{0}` is not paired, pair it with bluetoothctl first")]
    NotPaired(String),
    #[error("not connected")]
    NotConnected,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation finished without reporting an outcome")]
    NoOutcome,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
