//! Error types for the session core.
//!
//! Every network or parse failure is converted into one of these at the
//! component boundary; nothing from reqwest or the sink leaks further.

use std::time::Duration;
use thiserror::Error;

/// Construction-time errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("candidate list is empty")]
    NoCandidates,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("failed to build status client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a single candidate did not reach `prepared`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink reported error {code}: {message}")]
    Open { code: i32, message: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("stream ended")]
    Ended,

    #[error("sink dropped its event channel")]
    Closed,
}

/// Terminal failure of a session.  Requires an explicit `start()` to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    #[error("all {attempts} stream candidates failed (last: {last})")]
    AllCandidatesExhausted { attempts: usize, last: SinkError },

    #[error("stream failed during playback: {0}")]
    MidStream(SinkError),
}

/// A status poll that produced no snapshot.  Never affects session state.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{}", friendly_network_error(.0))]
    Transport(#[from] reqwest::Error),

    #[error("status endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed status document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("status document is not a JSON object")]
    NotAnObject,
}

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Status request timed out".to_string();
    }
    if e.is_decode() || e.is_body() {
        return "Invalid response from status endpoint".to_string();
    }
    format!("Network error: {e}")
}
