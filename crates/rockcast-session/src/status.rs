//! Now-playing status document: fetch and tolerant parse.
//!
//! The endpoint returns a loosely structured JSON object.  Every field is
//! optional; a missing or oddly typed field falls back to a fixed label
//! instead of failing the whole document.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::{FetchError, SessionError};
use rockcast_proto::protocol::TrackSnapshot;

pub const UNKNOWN_TRACK: &str = "Unknown track";
pub const NO_NEXT_TRACK: &str = "No data";
pub const DEFAULT_PLAYLIST: &str = "Live broadcast";
pub const DEFAULT_KBPS: u64 = 128;

/// Anything that can produce a fresh snapshot.  [`StatusClient`] is the HTTP
/// implementation; tests substitute scripted sources.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<TrackSnapshot, FetchError>;
}

/// HTTP client for the status endpoint.
#[derive(Debug, Clone)]
pub struct StatusClient {
    client: reqwest::Client,
    url: String,
}

impl StatusClient {
    /// `timeout` bounds both connecting and the whole request.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rockcast/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl StatusSource for StatusClient {
    async fn fetch(&self) -> Result<TrackSnapshot, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let doc: Value = serde_json::from_slice(&body)?;
        debug!("status: fetched {} bytes from {}", body.len(), self.url);
        parse_status(&doc)
    }
}

/// Turn a status document into a snapshot stamped with the current time.
pub fn parse_status(doc: &Value) -> Result<TrackSnapshot, FetchError> {
    if !doc.is_object() {
        return Err(FetchError::NotAnObject);
    }
    Ok(TrackSnapshot {
        current_track: current_track(doc),
        next_track: next_track(doc),
        playlist_name: playlist_name(doc.get("playlist").and_then(Value::as_str)),
        bitrate_label: bitrate_label(doc),
        fetched_at: Some(Utc::now()),
    })
}

fn non_empty<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn current_track(doc: &Value) -> String {
    match (non_empty(doc, "artist"), non_empty(doc, "song")) {
        (Some(artist), Some(song)) => format!("{artist} - {song}"),
        (_, Some(song)) => song.to_string(),
        _ => non_empty(doc, "title").unwrap_or(UNKNOWN_TRACK).to_string(),
    }
}

fn next_track(doc: &Value) -> String {
    doc.get("nextsongs")
        .and_then(Value::as_array)
        .and_then(|songs| songs.first())
        .and_then(|first| non_empty(first, "song"))
        .unwrap_or(NO_NEXT_TRACK)
        .to_string()
}

/// `"Rock_Metal_001"` → `"Rock Metal"`.  Only a numeric serial after the last
/// underscore is dropped, so `"Alt_Rock"` keeps both words.
pub fn playlist_name(raw: Option<&str>) -> String {
    let raw = raw.map(str::trim).unwrap_or_default();
    let base = match raw.rsplit_once('_') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => head,
        _ => raw,
    };
    let name = base.replace('_', " ");
    let name = name.trim();
    if name.is_empty() {
        DEFAULT_PLAYLIST.to_string()
    } else {
        name.to_string()
    }
}

fn bitrate_label(doc: &Value) -> String {
    let kbps = match doc.get("kbps") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|k| *k > 0)
    .unwrap_or(DEFAULT_KBPS);
    format!("{kbps} kbps MP3")
}
