use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Start,
    Stop,
    /// Volume in percent; out-of-range values are clamped by the controller.
    Volume { value: i32 },
    GetState,
}

/// Messages sent from the daemon to clients (pushes)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full view.
    Hello {
        protocol_version: u32,
        state: SessionView,
    },
    State {
        data: SessionView,
    },
    Snapshot {
        data: TrackSnapshot,
    },
    /// Terminal session failure with a human-readable reason.
    Failure {
        message: String,
    },
    Log {
        message: String,
    },
}

/// Lifecycle of the single playback session.
///
/// Transitions:
///   Idle | Stopped | Failed -> Connecting   (start)
///   Connecting -> Playing                   (sink prepared)
///   Connecting -> Failed                    (all candidates exhausted)
///   Playing -> Failed                       (mid-stream sink error)
///   any -> Stopped                          (stop)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Playing,
    Stopped,
    Failed,
}

impl SessionState {
    /// True while a session owns (or is acquiring) a sink.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Playing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Playing => "playing",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }
}

/// Parsed now-playing metadata.  Replaced wholesale on every successful
/// status fetch; the default value is the empty snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TrackSnapshot {
    pub current_track: String,
    pub next_track: String,
    pub playlist_name: String,
    pub bitrate_label: String,
    /// `None` only for the empty snapshot.
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl TrackSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Observable view of the daemon.  `rev` is a monotonically increasing
/// counter incremented on every change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionView {
    #[serde(default)]
    pub rev: u64,
    pub state: SessionState,
    pub snapshot: TrackSnapshot,
    /// Volume in percent (0-100).
    pub volume: u8,
    pub candidates: Vec<String>,
    /// Reason of the last terminal failure, cleared when a new session starts.
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
