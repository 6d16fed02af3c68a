//! Fixtures shared by the daemon's unit tests.

use crate::core::{Control, DaemonCore, ViewObserver};
use rockcast_proto::config::SessionConfig;
use rockcast_proto::protocol::TrackSnapshot;
use rockcast_proto::state::StateManager;
use rockcast_session::{
    FetchError, SessionController, SinkEvent, SinkEventSender, SinkEvents, StatusSource,
    StreamSink,
};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

/// Sink whose every open prepares immediately.
#[derive(Default)]
pub struct InstantSink {
    pub opens: Mutex<Vec<String>>,
    pub gains: Mutex<Vec<f32>>,
    live: Mutex<Option<SinkEventSender>>,
}

impl StreamSink for InstantSink {
    fn open(&self, url: &str) -> SinkEvents {
        self.opens.lock().unwrap().push(url.to_string());
        let (tx, events) = SinkEvents::channel();
        let _ = tx.send(SinkEvent::Prepared);
        *self.live.lock().unwrap() = Some(tx);
        events
    }

    fn set_gain(&self, gain: f32) {
        self.gains.lock().unwrap().push(gain);
    }

    fn release(&self) {
        *self.live.lock().unwrap() = None;
    }
}

struct FixedStatus;

#[async_trait::async_trait]
impl StatusSource for FixedStatus {
    async fn fetch(&self) -> Result<TrackSnapshot, FetchError> {
        Ok(TrackSnapshot {
            current_track: "Motörhead - Ace of Spades".into(),
            next_track: "No data".into(),
            playlist_name: "Live broadcast".into(),
            bitrate_label: "128 kbps MP3".into(),
            fetched_at: None,
        })
    }
}

/// A fully wired control surface over an [`InstantSink`].
pub fn control(dir: &tempfile::TempDir) -> (Control, Arc<InstantSink>) {
    let config = SessionConfig {
        candidates: vec!["http://a.test/stream".into(), "http://b.test/stream".into()],
        ..SessionConfig::default()
    };
    let state_manager = Arc::new(StateManager::new(
        dir.path().join("state.json"),
        config.candidates.clone(),
        config.default_volume,
    ));
    let (broadcast_tx, _) = broadcast::channel(64);
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let sink = Arc::new(InstantSink::default());
    let (controller, _task) = SessionController::spawn(
        &config,
        config.default_volume,
        sink.clone(),
        Arc::new(FixedStatus),
        Arc::new(ViewObserver::new(update_tx)),
    )
    .unwrap();
    tokio::spawn(DaemonCore::new(state_manager.clone(), broadcast_tx.clone()).run(update_rx));

    (
        Control {
            controller,
            state_manager,
            broadcast_tx,
        },
        sink,
    )
}
