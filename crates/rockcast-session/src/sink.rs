//! Contract for the audio output the controller drives.
//!
//! The sink itself (decoding, mixing, device output) lives elsewhere.  Each
//! `open()` hands back its own event stream, so a stale event from a released
//! stream can never be mistaken for one belonging to the current stream.

use tokio::sync::mpsc;

/// Signals a sink reports for one opened stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Audio is flowing.
    Prepared,
    /// The stream could not be opened, or broke while playing.
    Error { code: i32, message: String },
    /// The stream ended on its own (end of file, server closed).
    Stopped,
}

pub type SinkEventSender = mpsc::UnboundedSender<SinkEvent>;

/// Receiving half of one `open()` call.
#[derive(Debug)]
pub struct SinkEvents {
    rx: mpsc::UnboundedReceiver<SinkEvent>,
}

impl SinkEvents {
    /// Create a connected pair.  Sinks keep the sender for as long as the
    /// stream is open and drop it on release.
    pub fn channel() -> (SinkEventSender, SinkEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, SinkEvents { rx })
    }

    /// `None` once the sink has dropped the sender.
    pub async fn recv(&mut self) -> Option<SinkEvent> {
        self.rx.recv().await
    }
}

/// Audio output collaborator.
///
/// All methods are synchronous and must not block: implementations queue the
/// work and report progress through the returned [`SinkEvents`].
pub trait StreamSink: Send + Sync {
    /// Begin opening `url`.  The controller always calls [`release`] on the
    /// previous stream before opening another.
    ///
    /// [`release`]: StreamSink::release
    fn open(&self, url: &str) -> SinkEvents;

    /// Output gain in `[0.0, 1.0]`.
    fn set_gain(&self, gain: f32);

    /// Drop the current stream.  Safe to call when nothing is open.
    fn release(&self);
}

/// Map a 0-100 volume to the sink's gain range.
pub fn volume_to_gain(volume: u8) -> f32 {
    (f32::from(volume) / 100.0).clamp(0.0, 1.0)
}
