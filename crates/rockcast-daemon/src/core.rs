/// Glue between the session controller and the daemon's client surfaces.
///
/// The controller pushes notifications synchronously into `ViewObserver`,
/// which queues them for `DaemonCore`.  The core task applies them to the
/// shared `StateManager` and fans them out on the broadcast channel.
/// Client commands go the other way through `Control`.
use crate::BroadcastMessage;
use rockcast_proto::protocol::{Command, SessionState, TrackSnapshot};
use rockcast_proto::state::StateManager;
use rockcast_session::{FetchError, SessionController, SessionFailure, SessionObserver};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum ViewUpdate {
    State(SessionState),
    Snapshot(TrackSnapshot),
    Failure(String),
}

/// Observer handed to the controller.  Never blocks.
pub struct ViewObserver {
    tx: mpsc::UnboundedSender<ViewUpdate>,
}

impl ViewObserver {
    pub fn new(tx: mpsc::UnboundedSender<ViewUpdate>) -> Self {
        Self { tx }
    }

    fn push(&self, update: ViewUpdate) {
        if self.tx.send(update).is_err() {
            debug!("view observer: core gone, dropping update");
        }
    }
}

impl SessionObserver for ViewObserver {
    fn on_state_changed(&self, state: SessionState) {
        self.push(ViewUpdate::State(state));
    }

    fn on_snapshot_changed(&self, snapshot: &TrackSnapshot) {
        self.push(ViewUpdate::Snapshot(snapshot.clone()));
    }

    fn on_failure(&self, failure: &SessionFailure) {
        self.push(ViewUpdate::Failure(failure.to_string()));
    }

    fn on_snapshot_stale(&self, _error: &FetchError) {}
}

pub struct DaemonCore {
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub fn new(
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            state_manager,
            broadcast_tx,
        }
    }

    /// Apply updates until every observer is gone.
    pub async fn run(self, mut updates: mpsc::UnboundedReceiver<ViewUpdate>) {
        while let Some(update) = updates.recv().await {
            self.apply(update).await;
        }
        debug!("daemon core: update channel closed");
    }

    async fn apply(&self, update: ViewUpdate) {
        match update {
            ViewUpdate::State(state) => {
                self.state_manager.set_session_state(state).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            ViewUpdate::Snapshot(snapshot) => {
                self.state_manager.set_snapshot(snapshot.clone()).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::Snapshot(snapshot));
            }
            ViewUpdate::Failure(reason) => {
                self.state_manager.set_failure(reason.clone()).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::Failure(reason));
            }
        }
    }
}

/// What the socket and HTTP surfaces use to act on the session.
#[derive(Clone)]
pub struct Control {
    pub controller: SessionController,
    pub state_manager: Arc<StateManager>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Control {
    pub async fn execute(&self, cmd: Command) {
        match cmd {
            Command::Start => self.controller.start(),
            Command::Stop => self.controller.stop(),
            Command::Volume { value } => {
                self.controller.set_volume(value);
                if let Err(e) = self.state_manager.set_volume(value).await {
                    warn!("Failed to persist volume: {}", e);
                }
                info!("Volume set to {}", value.clamp(0, 100));
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Command::GetState => {}
        }
    }
}
