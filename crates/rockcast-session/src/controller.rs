//! SessionController: single-owner task for all session state.
//!
//! ```text
//!   SessionController (cloneable handle)
//!         │  start / stop / set_volume / shutdown   (unbounded mpsc, never blocks)
//!         ▼
//!   SessionCore task ── select! ──┬── commands
//!                                 ├── events of the currently opened sink stream
//!                                 ├── attempt deadline / backoff timer
//!                                 └── poll reports  ◄── MetadataPoller task
//! ```
//!
//! Only the core task mutates the state, the volume and the snapshot, and it
//! is the only caller of the sink and of the observer.  Poll reports carry
//! the id of the session that produced them; reports from a superseded
//! session are dropped, so once a `stop()` has been processed that session
//! produces no further sink opens or observer calls.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionFailure, SinkError};
use crate::observer::SessionObserver;
use crate::poller::{MetadataPoller, PollReport, PollerHandle};
use crate::retry::{RetryDecision, RetryPlanner};
use crate::sink::{volume_to_gain, SinkEvent, SinkEvents, StreamSink};
use crate::status::StatusSource;
use rockcast_proto::config::SessionConfig;
use rockcast_proto::protocol::{SessionState, TrackSnapshot};

// ── commands ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum SessionCommand {
    Start,
    Stop,
    SetVolume(i32),
    Shutdown,
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Control surface of the session.  Cheap to clone; every method returns
/// immediately and is safe to call from any thread or task.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionController {
    /// Spawn the controller task on the current tokio runtime.
    ///
    /// The task lives until [`shutdown`](Self::shutdown) is called or every
    /// handle has been dropped; it is not tied to any observer.
    pub fn spawn(
        config: &SessionConfig,
        initial_volume: u8,
        sink: Arc<dyn StreamSink>,
        status: Arc<dyn StatusSource>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<(Self, JoinHandle<()>), SessionError> {
        if config.candidates.is_empty() {
            return Err(SessionError::NoCandidates);
        }
        if config.poll_interval_ms == 0 {
            return Err(SessionError::ZeroDuration("poll interval"));
        }
        if config.per_candidate_timeout_ms == 0 {
            return Err(SessionError::ZeroDuration("per-candidate timeout"));
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        let core = SessionCore {
            candidates: config.candidates.clone(),
            attempt_timeout: config.per_candidate_timeout(),
            planner: RetryPlanner::new(config.backoff()),
            poller: MetadataPoller::new(status, config.poll_interval()),
            sink,
            observer,
            state: SessionState::Idle,
            phase: Phase::Idle,
            session: 0,
            volume: initial_volume.min(100),
            applied_volume: None,
            sink_open: false,
            snapshot: TrackSnapshot::default(),
            poll_tx,
            poll_rx,
        };

        let task = tokio::spawn(core.run(command_rx));
        Ok((Self { commands }, task))
    }

    /// Begin connecting.  Ignored while already connecting or playing.
    pub fn start(&self) {
        self.send(SessionCommand::Start);
    }

    /// End the session, release the sink, clear the snapshot.
    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    /// Volume in percent; clamped to 0-100.
    pub fn set_volume(&self, volume: i32) {
        self.send(SessionCommand::SetVolume(volume));
    }

    /// Release everything and end the controller task.
    pub fn shutdown(&self) {
        self.send(SessionCommand::Shutdown);
    }

    fn send(&self, cmd: SessionCommand) {
        if let Err(e) = self.commands.send(cmd) {
            warn!("session controller gone, dropping {:?}", e.0);
        }
    }
}

// ── core ──────────────────────────────────────────────────────────────────────

/// One connect attempt.  Lives only while `Connecting`.
#[derive(Debug, Clone, Copy)]
struct ConnectAttempt {
    candidate_index: usize,
    started_at: Instant,
}

enum Phase {
    /// Idle, Stopped or Failed: nothing in flight.
    Idle,
    /// Waiting for the opened candidate to report prepared/error.
    Connecting {
        attempt: ConnectAttempt,
        events: SinkEvents,
        deadline: Instant,
    },
    /// Waiting out the fixed delay before the next candidate.
    Backoff { next_index: usize, until: Instant },
    Playing {
        events: SinkEvents,
        _poller: PollerHandle,
    },
}

impl Phase {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::Connecting { deadline, .. } => Some(*deadline),
            Phase::Backoff { until, .. } => Some(*until),
            Phase::Idle | Phase::Playing { .. } => None,
        }
    }
}

struct SessionCore {
    candidates: Vec<String>,
    attempt_timeout: Duration,
    planner: RetryPlanner,
    poller: MetadataPoller,
    sink: Arc<dyn StreamSink>,
    observer: Arc<dyn SessionObserver>,
    state: SessionState,
    phase: Phase,
    /// Incremented on every start; tags poll reports.
    session: u64,
    volume: u8,
    /// Volume last forwarded to the currently open sink stream.
    applied_volume: Option<u8>,
    sink_open: bool,
    snapshot: TrackSnapshot,
    poll_tx: mpsc::UnboundedSender<PollReport>,
    poll_rx: mpsc::UnboundedReceiver<PollReport>,
}

impl SessionCore {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!("session: controller running with {} candidates", self.candidates.len());

        loop {
            let deadline = self.phase.deadline();
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },

                event = next_sink_event(&mut self.phase) => self.handle_sink_event(event),

                _ = sleep_until(deadline) => self.handle_deadline(),

                Some(report) = self.poll_rx.recv() => self.handle_poll(report),
            }
        }

        info!("session: controller shutting down");
        self.phase = Phase::Idle;
        self.release_sink();
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start => self.start(),
            SessionCommand::Stop => self.stop(),
            SessionCommand::SetVolume(volume) => self.set_volume(volume),
            SessionCommand::Shutdown => {}
        }
    }

    // ── control ───────────────────────────────────────────────────────────────

    fn start(&mut self) {
        if self.state.is_active() {
            debug!("session: start ignored, already {}", self.state.label());
            return;
        }
        self.session += 1;
        info!("session {}: starting", self.session);
        self.set_state(SessionState::Connecting);
        self.open_candidate(0);
    }

    fn stop(&mut self) {
        info!("session {}: stopping", self.session);
        // Dropping the phase cancels the poller and forgets the sink stream.
        self.phase = Phase::Idle;
        self.sink.release();
        self.sink_open = false;
        self.applied_volume = None;

        if !self.snapshot.is_empty() {
            self.snapshot = TrackSnapshot::default();
            self.observer.on_snapshot_changed(&self.snapshot);
        }
        self.set_state(SessionState::Stopped);
    }

    fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 100) as u8;
        debug!("session: volume {}", self.volume);
        if self.sink_open {
            self.apply_volume();
        }
    }

    // ── sink ──────────────────────────────────────────────────────────────────

    fn open_candidate(&mut self, index: usize) {
        self.release_sink();

        let url = &self.candidates[index];
        info!(
            "session {}: trying candidate {}/{}: {}",
            self.session,
            index + 1,
            self.candidates.len(),
            url
        );
        let events = self.sink.open(url);
        self.sink_open = true;

        let attempt = ConnectAttempt {
            candidate_index: index,
            started_at: Instant::now(),
        };
        self.phase = Phase::Connecting {
            attempt,
            events,
            deadline: attempt.started_at + self.attempt_timeout,
        };
    }

    fn release_sink(&mut self) {
        if self.sink_open {
            self.sink.release();
            self.sink_open = false;
        }
        self.applied_volume = None;
    }

    fn apply_volume(&mut self) {
        if self.applied_volume != Some(self.volume) {
            self.sink.set_gain(volume_to_gain(self.volume));
            self.applied_volume = Some(self.volume);
        }
    }

    fn handle_sink_event(&mut self, event: Option<SinkEvent>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting {
                attempt, events, ..
            } => match event {
                Some(SinkEvent::Prepared) => self.on_prepared(attempt, events),
                Some(SinkEvent::Error { code, message }) => {
                    self.on_attempt_failed(attempt, SinkError::Open { code, message })
                }
                Some(SinkEvent::Stopped) => self.on_attempt_failed(attempt, SinkError::Ended),
                None => self.on_attempt_failed(attempt, SinkError::Closed),
            },
            Phase::Playing { events, _poller } => match event {
                Some(SinkEvent::Prepared) => {
                    debug!("session {}: repeated prepared ignored", self.session);
                    self.phase = Phase::Playing { events, _poller };
                }
                Some(SinkEvent::Error { code, message }) => {
                    self.on_mid_stream_failure(SinkError::Open { code, message })
                }
                Some(SinkEvent::Stopped) => self.on_mid_stream_failure(SinkError::Ended),
                None => self.on_mid_stream_failure(SinkError::Closed),
            },
            other => self.phase = other,
        }
    }

    fn handle_deadline(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting { attempt, .. } => {
                self.on_attempt_failed(attempt, SinkError::Timeout(self.attempt_timeout))
            }
            Phase::Backoff { next_index, .. } => self.open_candidate(next_index),
            other => self.phase = other,
        }
    }

    fn on_prepared(&mut self, attempt: ConnectAttempt, events: SinkEvents) {
        info!(
            "session {}: candidate {} prepared after {:?}",
            self.session,
            attempt.candidate_index + 1,
            attempt.started_at.elapsed()
        );
        let poller = self.poller.spawn(self.session, self.poll_tx.clone());
        self.phase = Phase::Playing {
            events,
            _poller: poller,
        };
        self.set_state(SessionState::Playing);
        self.apply_volume();
    }

    fn on_attempt_failed(&mut self, attempt: ConnectAttempt, error: SinkError) {
        warn!(
            "session {}: candidate {} failed after {:?}: {}",
            self.session,
            attempt.candidate_index + 1,
            attempt.started_at.elapsed(),
            error
        );
        self.release_sink();

        match self
            .planner
            .next(&self.candidates, attempt.candidate_index, &error)
        {
            RetryDecision::NextCandidate(next_index) => {
                debug!(
                    "session {}: next candidate {} in {:?}",
                    self.session,
                    next_index + 1,
                    self.planner.backoff()
                );
                self.phase = Phase::Backoff {
                    next_index,
                    until: Instant::now() + self.planner.backoff(),
                };
            }
            RetryDecision::Exhausted => self.fail(SessionFailure::AllCandidatesExhausted {
                attempts: self.candidates.len(),
                last: error,
            }),
        }
    }

    fn on_mid_stream_failure(&mut self, error: SinkError) {
        self.release_sink();
        self.fail(SessionFailure::MidStream(error));
    }

    fn fail(&mut self, failure: SessionFailure) {
        warn!("session {}: {}", self.session, failure);
        self.phase = Phase::Idle;
        self.observer.on_failure(&failure);
        self.set_state(SessionState::Failed);
    }

    // ── metadata ──────────────────────────────────────────────────────────────

    fn handle_poll(&mut self, report: PollReport) {
        let current = report.session == self.session && matches!(self.phase, Phase::Playing { .. });
        if !current {
            debug!("session: dropping poll report from session {}", report.session);
            return;
        }
        match report.result {
            Ok(snapshot) => {
                self.snapshot = snapshot;
                self.observer.on_snapshot_changed(&self.snapshot);
            }
            Err(e) => {
                debug!("session {}: status fetch failed: {}", self.session, e);
                self.observer.on_snapshot_stale(&e);
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!(
                "session {}: {} → {}",
                self.session,
                self.state.label(),
                state.label()
            );
            self.state = state;
            self.observer.on_state_changed(state);
        }
    }
}

async fn next_sink_event(phase: &mut Phase) -> Option<SinkEvent> {
    match phase {
        Phase::Connecting { events, .. } | Phase::Playing { events, .. } => events.recv().await,
        Phase::Idle | Phase::Backoff { .. } => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
