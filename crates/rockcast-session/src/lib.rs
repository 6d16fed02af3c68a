//! Streaming session core: one playback connection at a time, ordered
//! fallback across candidate endpoints, and a now-playing poller.
//!
//! Entry point is [`SessionController`]; the audio output and any UI are
//! collaborators behind [`StreamSink`] and [`SessionObserver`].

pub mod controller;
pub mod error;
pub mod observer;
pub mod poller;
pub mod retry;
pub mod sink;
pub mod status;

pub use controller::SessionController;
pub use error::{FetchError, SessionError, SessionFailure, SinkError};
pub use observer::{LoggingObserver, SessionObserver};
pub use poller::MetadataPoller;
pub use retry::{RetryDecision, RetryPlanner};
pub use sink::{volume_to_gain, SinkEvent, SinkEventSender, SinkEvents, StreamSink};
pub use status::{StatusClient, StatusSource};

pub use rockcast_proto::protocol::{SessionState, TrackSnapshot};
