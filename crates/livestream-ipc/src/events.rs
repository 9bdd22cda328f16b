//! Events sent from the controller to the caller.

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Events the controller reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveStreamEvent {
    /// The stream is connected and publishing.
    ConnectionSuccess,

    /// The connection attempt failed.
    ConnectionFailed {
        /// Engine status code or error message.
        code: String,
    },

    /// An established connection was closed.
    Disconnection,

    /// The microphone could not be bound.
    AudioError(CaptureError),

    /// The camera could not be bound.
    VideoError(CaptureError),
}

impl LiveStreamEvent {
    /// Returns a simple string representation of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess => "ConnectionSuccess",
            Self::ConnectionFailed { .. } => "ConnectionFailed",
            Self::Disconnection => "Disconnection",
            Self::AudioError(_) => "AudioError",
            Self::VideoError(_) => "VideoError",
        }
    }

    /// Invoke the matching delegate callback.
    pub fn deliver(&self, delegate: &dyn LiveStreamDelegate) {
        match self {
            Self::ConnectionSuccess => delegate.connection_success(),
            Self::ConnectionFailed { code } => delegate.connection_failed(code),
            Self::Disconnection => delegate.disconnection(),
            Self::AudioError(error) => delegate.audio_error(error),
            Self::VideoError(error) => delegate.video_error(error),
        }
    }
}

/// Callback interface for stream events.
///
/// Every method has an empty default so implementors only override what
/// they observe.
pub trait LiveStreamDelegate: Send + Sync {
    /// Called when the connection succeeded and publishing started.
    fn connection_success(&self) {}

    /// Called when the connection failed.
    fn connection_failed(&self, _code: &str) {}

    /// Called when the connection was closed.
    fn disconnection(&self) {}

    /// Called when the microphone could not be bound.
    fn audio_error(&self, _error: &CaptureError) {}

    /// Called when the camera could not be bound.
    fn video_error(&self, _error: &CaptureError) {}
}
