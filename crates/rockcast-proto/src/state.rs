use crate::protocol::{SessionState, SessionView, TrackSnapshot};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// The part of the view that survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: u8,
}

/// Shared, observable copy of the session as seen from outside the
/// controller.  Written by the daemon's observer, read by socket and HTTP
/// clients.
pub struct StateManager {
    state: Arc<RwLock<SessionView>>,
    state_file: PathBuf,
}

impl StateManager {
    /// Build the view, restoring the persisted volume if one exists.
    pub fn new(state_file: PathBuf, candidates: Vec<String>, default_volume: u8) -> Self {
        let volume = Self::load_persistent(&state_file)
            .map(|p| p.volume.min(100))
            .unwrap_or(default_volume);

        let state = SessionView {
            rev: 1,
            state: SessionState::Idle,
            snapshot: TrackSnapshot::default(),
            volume,
            candidates,
            last_error: None,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
        }
    }

    pub async fn get_state(&self) -> SessionView {
        self.state.read().await.clone()
    }

    pub async fn set_session_state(&self, session_state: SessionState) {
        let mut state = self.state.write().await;
        if session_state == SessionState::Connecting {
            state.last_error = None;
        }
        state.state = session_state;
        state.rev += 1;
    }

    pub async fn set_snapshot(&self, snapshot: TrackSnapshot) {
        let mut state = self.state.write().await;
        state.snapshot = snapshot;
        state.rev += 1;
    }

    pub async fn set_failure(&self, reason: String) {
        let mut state = self.state.write().await;
        state.last_error = Some(reason);
        state.rev += 1;
    }

    pub async fn set_volume(&self, volume: i32) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.volume = volume.clamp(0, 100) as u8;
            state.rev += 1;
        }
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = PersistentState {
            volume: self.state.read().await.volume,
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> Option<PersistentState> {
        let content = std::fs::read_to_string(state_file).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring unreadable state file {:?}: {}", state_file, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_volume_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("state.json");

        let manager = StateManager::new(file.clone(), vec!["a".into()], 70);
        assert_eq!(manager.get_state().await.volume, 70);
        manager.set_volume(140).await.unwrap();
        assert_eq!(manager.get_state().await.volume, 100);
        manager.set_volume(25).await.unwrap();

        let restored = StateManager::new(file, vec!["a".into()], 70);
        assert_eq!(restored.get_state().await.volume, 25);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("state.json");
        std::fs::write(&file, "{ not json").unwrap();

        let manager = StateManager::new(file, Vec::new(), 55);
        assert_eq!(manager.get_state().await.volume, 55);
    }

    #[tokio::test]
    async fn test_rev_increments_and_connecting_clears_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().join("state.json"), Vec::new(), 70);
        let rev0 = manager.get_state().await.rev;

        manager.set_session_state(SessionState::Failed).await;
        manager.set_failure("all 3 stream candidates failed".into()).await;
        let failed = manager.get_state().await;
        assert_eq!(failed.rev, rev0 + 2);
        assert!(failed.last_error.is_some());

        manager.set_session_state(SessionState::Connecting).await;
        let connecting = manager.get_state().await;
        assert_eq!(connecting.state, SessionState::Connecting);
        assert!(connecting.last_error.is_none());
    }
}
