//! Push interface for whatever presents the session (UI, notifications,
//! remote clients).  Observers never query the controller; everything they
//! need arrives through these calls, in order, from the controller task.

use tracing::{debug, info, warn};

use crate::error::{FetchError, SessionFailure};
use rockcast_proto::protocol::{SessionState, TrackSnapshot};

/// Receives session notifications.
///
/// Calls are made from the controller task and must return quickly; hand
/// heavy work off to a channel.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, state: SessionState);

    fn on_snapshot_changed(&self, snapshot: &TrackSnapshot);

    /// A session ended in `Failed`.  Delivered just before the matching
    /// `on_state_changed(Failed)`.
    fn on_failure(&self, _failure: &SessionFailure) {}

    /// A poll produced no snapshot; the previous one is still current.
    fn on_snapshot_stale(&self, _error: &FetchError) {}
}

/// Logs every notification.
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_state_changed(&self, state: SessionState) {
        info!(state = state.label(), "session state changed");
    }

    fn on_snapshot_changed(&self, snapshot: &TrackSnapshot) {
        debug!(
            current = %snapshot.current_track,
            next = %snapshot.next_track,
            playlist = %snapshot.playlist_name,
            "now playing"
        );
    }

    fn on_failure(&self, failure: &SessionFailure) {
        warn!("session failed: {}", failure);
    }

    fn on_snapshot_stale(&self, error: &FetchError) {
        debug!("now-playing refresh missed: {}", error);
    }
}

/// Forwards every notification to each inner observer in order.
impl SessionObserver for Vec<std::sync::Arc<dyn SessionObserver>> {
    fn on_state_changed(&self, state: SessionState) {
        for observer in self {
            observer.on_state_changed(state);
        }
    }

    fn on_snapshot_changed(&self, snapshot: &TrackSnapshot) {
        for observer in self {
            observer.on_snapshot_changed(snapshot);
        }
    }

    fn on_failure(&self, failure: &SessionFailure) {
        for observer in self {
            observer.on_failure(failure);
        }
    }

    fn on_snapshot_stale(&self, error: &FetchError) {
        for observer in self {
            observer.on_snapshot_stale(error);
        }
    }
}
