//! Periodic now-playing refresh while a session is playing.
//!
//! The poller never touches session state.  It fetches, tags the outcome
//! with the session it belongs to, and hands it to the controller, which
//! drops reports from sessions that are no longer current.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::status::StatusSource;
use rockcast_proto::protocol::TrackSnapshot;

/// Outcome of one poll cycle.
#[derive(Debug)]
pub struct PollReport {
    pub session: u64,
    pub result: Result<TrackSnapshot, FetchError>,
}

pub struct MetadataPoller {
    source: Arc<dyn StatusSource>,
    interval: Duration,
}

impl MetadataPoller {
    pub fn new(source: Arc<dyn StatusSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Start polling for `session`: one fetch right away, then one per
    /// interval until the returned handle is cancelled or dropped, or the
    /// report channel closes.
    pub fn spawn(&self, session: u64, reports: mpsc::UnboundedSender<PollReport>) -> PollerHandle {
        let cancel = CancellationToken::new();
        let source = Arc::clone(&self.source);
        let interval = self.interval;
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            debug!("poller: session {} active, interval {:?}", session, interval);
            loop {
                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = source.fetch() => result,
                };
                if token.is_cancelled() || reports.send(PollReport { session, result }).is_err() {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("poller: session {} stopped", session);
        });

        PollerHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owning handle of a running poller.  Dropping it stops the poller.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancel and wait until the task has exited.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
