#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rockcast_proto::config::SessionConfig;
use rockcast_session::{
    FetchError, SessionFailure, SessionObserver, SessionState, SinkEvent, SinkEventSender,
    SinkEvents, StatusSource, StreamSink, TrackSnapshot,
};
use tokio::sync::mpsc;

// ── sink ──────────────────────────────────────────────────────────────────────

/// What the fake sink does when a URL is opened.
#[derive(Debug, Clone)]
pub enum OpenScript {
    Prepare,
    Fail(i32),
    /// Never answer; the controller has to time out.
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Open(String),
    Gain(f32),
    Release,
}

#[derive(Default)]
struct FakeSinkInner {
    scripts: HashMap<String, OpenScript>,
    calls: Vec<SinkCall>,
    live: Option<SinkEventSender>,
}

/// Scripted sink: every URL prepares unless told otherwise.
#[derive(Default)]
pub struct FakeSink {
    inner: Mutex<FakeSinkInner>,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, script: OpenScript) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(url.to_string(), script);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn opens(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Open(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn gains(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Gain(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().live.is_some()
    }

    /// Push an event on the currently open stream (e.g. a mid-stream error).
    pub fn emit(&self, event: SinkEvent) {
        if let Some(tx) = self.inner.lock().unwrap().live.as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl StreamSink for FakeSink {
    fn open(&self, url: &str) -> SinkEvents {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.live.is_none(), "open({url}) while a stream is still open");
        inner.calls.push(SinkCall::Open(url.to_string()));

        let (tx, events) = SinkEvents::channel();
        match inner.scripts.get(url).cloned().unwrap_or(OpenScript::Prepare) {
            OpenScript::Prepare => {
                let _ = tx.send(SinkEvent::Prepared);
            }
            OpenScript::Fail(code) => {
                let _ = tx.send(SinkEvent::Error {
                    code,
                    message: format!("cannot open {url}"),
                });
            }
            OpenScript::Hang => {}
        }
        inner.live = Some(tx);
        events
    }

    fn set_gain(&self, gain: f32) {
        self.inner.lock().unwrap().calls.push(SinkCall::Gain(gain));
    }

    fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(SinkCall::Release);
        inner.live = None;
    }
}

// ── observer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    State(SessionState),
    Snapshot(TrackSnapshot),
    Failure(SessionFailure),
    Stale,
}

/// Forwards every notification into a channel the test reads from.
pub struct RecordingObserver {
    tx: mpsc::UnboundedSender<Note>,
}

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, Notes) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), Notes { rx })
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state_changed(&self, state: SessionState) {
        let _ = self.tx.send(Note::State(state));
    }

    fn on_snapshot_changed(&self, snapshot: &TrackSnapshot) {
        let _ = self.tx.send(Note::Snapshot(snapshot.clone()));
    }

    fn on_failure(&self, failure: &SessionFailure) {
        let _ = self.tx.send(Note::Failure(failure.clone()));
    }

    fn on_snapshot_stale(&self, _error: &FetchError) {
        let _ = self.tx.send(Note::Stale);
    }
}

pub struct Notes {
    rx: mpsc::UnboundedReceiver<Note>,
}

impl Notes {
    pub async fn next(&mut self) -> Note {
        tokio::time::timeout(Duration::from_secs(600), self.rx.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("observer channel closed")
    }

    /// Skip notifications until one matches; returns everything seen on the way.
    pub async fn until(&mut self, want: impl Fn(&Note) -> bool) -> Vec<Note> {
        let mut seen = Vec::new();
        loop {
            let note = self.next().await;
            let done = want(&note);
            seen.push(note);
            if done {
                return seen;
            }
        }
    }

    pub async fn until_state(&mut self, state: SessionState) -> Vec<Note> {
        self.until(|n| *n == Note::State(state)).await
    }

    pub fn drain(&mut self) -> Vec<Note> {
        let mut out = Vec::new();
        while let Ok(note) = self.rx.try_recv() {
            out.push(note);
        }
        out
    }
}

// ── status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Fetch {
    Ok(TrackSnapshot),
    Fail,
}

/// Plays back a fixed sequence of poll outcomes, then repeats the last one.
pub struct ScriptedStatus {
    script: Mutex<VecDeque<Fetch>>,
    last: Mutex<Option<Fetch>>,
    calls: Mutex<usize>,
}

impl ScriptedStatus {
    pub fn new(script: Vec<Fetch>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl StatusSource for ScriptedStatus {
    async fn fetch(&self) -> Result<TrackSnapshot, FetchError> {
        *self.calls.lock().unwrap() += 1;
        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(step) = script.pop_front() {
                *last = Some(step.clone());
            }
            last.clone()
        };
        match next {
            Some(Fetch::Ok(snapshot)) => Ok(snapshot),
            Some(Fetch::Fail) | None => Err(FetchError::Status(503)),
        }
    }
}

pub fn track(name: &str) -> TrackSnapshot {
    TrackSnapshot {
        current_track: name.to_string(),
        next_track: "No data".to_string(),
        playlist_name: "Rock".to_string(),
        bitrate_label: "128 kbps MP3".to_string(),
        fetched_at: None,
    }
}

pub fn config(candidates: &[&str]) -> SessionConfig {
    SessionConfig {
        candidates: candidates.iter().map(|c| c.to_string()).collect(),
        status_url: "http://status.invalid/status.json".to_string(),
        poll_interval_ms: 10_000,
        per_candidate_timeout_ms: 15_000,
        backoff_ms: 1_000,
        status_timeout_ms: 10_000,
        default_volume: 70,
    }
}
