/// mpv-backed audio output.
///
/// ```text
///   MpvSink (StreamSink, cloneable)
///         │  Open / Gain / Release   (unbounded mpsc)
///         ▼
///   SinkDriver task ── owns MpvDriver (child process) + MpvHandle
///         │                    │
///         │                    ├── writer_task  ← MpvRequest → socket
///         │                    └── reader_task  → replies by request_id,
///         │                                       events → MpvEvent channel
///         └── classifies events of the current playlist entry
///             into SinkEvents for the controller
/// ```
///
/// mpv is spawned lazily on the first open and respawned if it dies.
use rockcast_session::{SinkEvent, SinkEventSender, SinkEvents, StreamSink};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Error code reported when mpv itself is unavailable or went away.
pub const MPV_UNAVAILABLE: i32 = -1;
/// Error code reported for an `end-file` with reason `error`.
pub const MPV_LOAD_FAILED: i32 = -2;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited message from mpv (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    fn entry_id(&self) -> Option<u64> {
        self.raw.get("playlist_entry_id")?.as_u64()
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Replace whatever is playing with `url`.  Returns the playlist entry id
    /// when mpv reports one (0.38+).
    pub async fn load(&self, url: &str) -> anyhow::Result<Option<u64>> {
        let resp = self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(resp["data"]["playlist_entry_id"].as_u64())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    /// `gain` in 0.0-1.0, sent as mpv's percent volume.
    pub async fn set_gain(&self, gain: f32) -> anyhow::Result<()> {
        let vol_pct = (gain * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }
}

// ── process driver ────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_gain: f32,
}

impl MpvDriver {
    pub fn new(initial_gain: f32) -> Self {
        Self {
            socket_name: rockcast_proto::platform::mpv_socket_name(),
            process: None,
            last_gain: initial_gain,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    /// Spawn a fresh idle mpv and connect to its IPC endpoint.
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        info!("mpv: spawning new process");
        let mpv_binary = rockcast_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.last_gain * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--cache=yes")
            .arg(rockcast_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        self.connect(event_tx).await
    }

    #[cfg(unix)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = match val["error"].as_str() {
                            Some("success") => Ok(val),
                            other => Err(anyhow::anyhow!(
                                "mpv error: {}",
                                other.unwrap_or("unknown error")
                            )),
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event classification ──────────────────────────────────────────────────────

/// The subset of mpv's event stream the sink cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackSignal {
    /// A playlist entry began loading.
    StartFile { entry: Option<u64> },
    /// Audio output (re)started; the first one after a load means prepared.
    Restart,
    Ended {
        entry: Option<u64>,
        reason: EndReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    Eof,
    Error(String),
    /// `stop`, `quit`, `redirect`: caused by us or by a new load.
    Other(String),
}

pub fn classify(event: &MpvEvent) -> Option<PlaybackSignal> {
    match event.event_name()? {
        "start-file" => Some(PlaybackSignal::StartFile {
            entry: event.entry_id(),
        }),
        "playback-restart" => Some(PlaybackSignal::Restart),
        "end-file" => {
            let reason = match event.raw.get("reason").and_then(Value::as_str) {
                Some("eof") => EndReason::Eof,
                Some("error") => EndReason::Error(
                    event
                        .raw
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                ),
                other => EndReason::Other(other.unwrap_or("unknown").to_string()),
            };
            Some(PlaybackSignal::Ended {
                entry: event.entry_id(),
                reason,
            })
        }
        _ => None,
    }
}

/// The one load the controller currently cares about.
struct OpenStream {
    events: SinkEventSender,
    entry: Option<u64>,
    started: bool,
    prepared: bool,
}

impl OpenStream {
    fn owns(&self, entry: Option<u64>) -> bool {
        match (self.entry, entry) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => self.started,
        }
    }

    /// Apply one signal; returns the event to forward, if any.
    fn on_signal(&mut self, signal: PlaybackSignal) -> Option<SinkEvent> {
        match signal {
            PlaybackSignal::StartFile { entry } => {
                if self.entry.is_none() || self.entry == entry {
                    self.entry = self.entry.or(entry);
                    self.started = true;
                }
                None
            }
            PlaybackSignal::Restart if self.started && !self.prepared => {
                self.prepared = true;
                Some(SinkEvent::Prepared)
            }
            PlaybackSignal::Restart => None,
            PlaybackSignal::Ended { entry, reason } if self.owns(entry) => match reason {
                EndReason::Eof => Some(SinkEvent::Stopped),
                EndReason::Error(message) => Some(SinkEvent::Error {
                    code: MPV_LOAD_FAILED,
                    message,
                }),
                EndReason::Other(_) => None,
            },
            PlaybackSignal::Ended { .. } => None,
        }
    }
}

// ── sink ──────────────────────────────────────────────────────────────────────

enum SinkRequest {
    Open { url: String, events: SinkEventSender },
    Gain(f32),
    Release,
}

/// [`StreamSink`] backed by an mpv child process.
#[derive(Clone)]
pub struct MpvSink {
    tx: mpsc::UnboundedSender<SinkRequest>,
}

impl MpvSink {
    /// Start the driver task.  It exits, killing mpv, once every `MpvSink`
    /// clone has been dropped.
    pub fn spawn(initial_gain: f32) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = SinkDriver {
            mpv: MpvDriver::new(initial_gain),
            handle: None,
            mpv_events: None,
            current: None,
        };
        (Self { tx }, tokio::spawn(driver.run(rx)))
    }

    fn request(&self, req: SinkRequest) {
        if self.tx.send(req).is_err() {
            warn!("mpv sink: driver task gone");
        }
    }
}

impl StreamSink for MpvSink {
    fn open(&self, url: &str) -> SinkEvents {
        let (events, rx) = SinkEvents::channel();
        // if the driver is gone the sender is dropped with the request
        // and the controller sees a closed stream
        self.request(SinkRequest::Open {
            url: url.to_string(),
            events,
        });
        rx
    }

    fn set_gain(&self, gain: f32) {
        self.request(SinkRequest::Gain(gain));
    }

    fn release(&self) {
        self.request(SinkRequest::Release);
    }
}

struct SinkDriver {
    mpv: MpvDriver,
    handle: Option<MpvHandle>,
    mpv_events: Option<mpsc::Receiver<MpvEvent>>,
    current: Option<OpenStream>,
}

impl SinkDriver {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<SinkRequest>) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(req) => self.handle_request(req).await,
                    None => break,
                },
                event = next_mpv_event(&mut self.mpv_events) => match event {
                    Some(event) => self.handle_event(event),
                    None => self.on_disconnected().await,
                },
            }
        }
        debug!("mpv sink: all handles dropped, shutting down mpv");
        if let Some(handle) = self.handle.take() {
            let _ = handle.send(json!(["quit"])).await;
        }
        self.mpv.kill().await;
    }

    async fn handle_request(&mut self, req: SinkRequest) {
        match req {
            SinkRequest::Open { url, events } => self.open(url, events).await,
            SinkRequest::Gain(gain) => {
                self.mpv.last_gain = gain;
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_gain(gain).await {
                        warn!("mpv sink: set volume failed: {}", e);
                    }
                }
            }
            SinkRequest::Release => {
                self.current = None;
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.stop().await {
                        debug!("mpv sink: stop failed: {}", e);
                    }
                }
            }
        }
    }

    async fn open(&mut self, url: String, events: SinkEventSender) {
        // a new open supersedes whatever was current
        self.current = None;

        let handle = match self.ensure_connected().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("mpv sink: cannot start mpv: {}", e);
                let _ = events.send(SinkEvent::Error {
                    code: MPV_UNAVAILABLE,
                    message: e.to_string(),
                });
                return;
            }
        };

        info!("mpv sink: loading {}", url);
        match handle.load(&url).await {
            Ok(entry) => {
                self.current = Some(OpenStream {
                    events,
                    entry,
                    started: false,
                    prepared: false,
                });
            }
            Err(e) => {
                warn!("mpv sink: loadfile {} failed: {}", url, e);
                let _ = events.send(SinkEvent::Error {
                    code: MPV_LOAD_FAILED,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn ensure_connected(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            if self.mpv.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv sink: process died, respawning");
        }
        let (event_tx, event_rx) = mpsc::channel(256);
        let handle = self.mpv.spawn_and_connect(event_tx).await?;
        self.handle = Some(handle.clone());
        self.mpv_events = Some(event_rx);
        Ok(handle)
    }

    fn handle_event(&mut self, event: MpvEvent) {
        let Some(signal) = classify(&event) else {
            return;
        };
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if let Some(out) = current.on_signal(signal) {
            debug!("mpv sink: {:?}", out);
            let _ = current.events.send(out);
        }
    }

    async fn on_disconnected(&mut self) {
        warn!("mpv sink: IPC connection lost");
        self.handle = None;
        self.mpv_events = None;
        self.mpv.kill().await;
        if let Some(current) = self.current.take() {
            let _ = current.events.send(SinkEvent::Error {
                code: MPV_UNAVAILABLE,
                message: "mpv exited".to_string(),
            });
        }
    }
}

async fn next_mpv_event(rx: &mut Option<mpsc::Receiver<MpvEvent>>) -> Option<MpvEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
