use std::time::Duration;

use thiserror::Error;

/// Failures while acquiring metadata or feeds.  All of them are absorbed by
/// the session; they only ever show up as an error flag next to stale data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("all {attempts} sources exhausted, last error: {last}")]
    AllSourcesExhausted {
        attempts: usize,
        last: Box<FetchError>,
    },

    #[error("source chain is empty")]
    EmptyChain,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => FetchError::Transport(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(format!("json: {e}"))
    }
}

impl From<xmltree::ParseError> for FetchError {
    fn from(e: xmltree::ParseError) -> Self {
        FetchError::Parse(format!("xml: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// `play()` was refused: autoplay policy, dead stream, decode failure.
    #[error("playback rejected: {0}")]
    Rejected(String),

    #[error("media element error: {0}")]
    Media(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("casting is not supported on this device")]
    Unavailable,

    #[error("no cast devices found")]
    NoDevices,

    #[error("cast request cancelled by the user")]
    Cancelled,

    #[error("cast session failed: {0}")]
    Session(String),

    #[error("remote media load failed: {0}")]
    LoadMedia(String),
}
