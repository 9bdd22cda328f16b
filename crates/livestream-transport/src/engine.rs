//! The transport engine boundary.
//!
//! An engine is the media pipeline plus the wire protocol: it binds
//! capture sources, encodes, and moves bytes. Adapters drive it through
//! [`TransportEngine`] and learn about its progress from the
//! [`EngineStatus`] channel returned by [`TransportEngine::subscribe`].

use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use livestream_config::{AudioConfig, FrameSize, VideoConfig};
use livestream_ipc::{CameraDevice, CaptureError, Microphone, PreviewSurface};

/// Well-known engine status codes.
pub mod codes {
    /// The server could not be reached.
    pub const CONNECT_FAILED: &str = "NetConnection.Connect.Failed";

    /// The server refused the connection request.
    pub const CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";

    /// The connection was closed.
    pub const CONNECT_CLOSED: &str = "NetConnection.Connect.Closed";

    /// The server refused the publish request.
    pub const PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";

    /// The server never confirmed the publish request.
    pub const PUBLISH_FAILED: &str = "NetStream.Publish.Failed";

    /// Reconnect attempts after I/O errors are exhausted.
    pub const IO_RETRIES_EXHAUSTED: &str = "NetConnection.Connect.IOError";
}

/// Asynchronous notifications from an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    /// `connect` succeeded (RTMP connect accepted, SRT socket open).
    Connected,

    /// The server accepted the publish request.
    PublishStarted,

    /// The connection was closed (RTMP close status, SRT `connected`
    /// dropping to false).
    Closed,

    /// An error-level status.
    Failed { code: String },

    /// A socket-level I/O error.
    IoError { message: String },
}

/// Video settings handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    /// Encoded frame size, already ordered for the device orientation.
    pub size: FrameSize,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// Target frames per second.
    pub fps: f64,

    /// Key frame interval.
    pub gop_duration: Duration,
}

impl VideoSettings {
    /// Build engine settings from a configuration and an oriented size.
    pub fn from_config(config: &VideoConfig, size: FrameSize) -> Self {
        Self {
            size,
            bitrate: config.bitrate,
            fps: config.fps,
            gop_duration: config.gop_duration,
        }
    }
}

/// Audio settings handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Target bitrate in bits per second.
    pub bitrate: u32,
}

impl From<&AudioConfig> for AudioSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            bitrate: config.bitrate,
        }
    }
}

/// Camera tuning applied once a camera is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTuning {
    /// Continuous auto exposure when the device supports it.
    pub continuous_auto_exposure: bool,

    /// Continuous auto focus when the device supports it.
    pub continuous_auto_focus: bool,

    /// Mirror the captured image.
    pub mirrored: bool,
}

impl DeviceTuning {
    /// Tuning for a freshly bound camera.
    pub fn for_camera(camera: &CameraDevice) -> Self {
        Self {
            continuous_auto_exposure: true,
            continuous_auto_focus: true,
            mirrored: camera.is_mirrored(),
        }
    }
}

/// A concrete streaming engine (RTMP or SRT).
///
/// Calls may block; adapters only invoke them from their worker thread.
/// Once `connect` or `close` returns, no status of the replaced or closed
/// connection is emitted.
pub trait TransportEngine: Send + Sync {
    /// Engine name for diagnostics.
    fn name(&self) -> &'static str;

    /// Status notification stream. Called once per adapter.
    fn subscribe(&self) -> Receiver<EngineStatus>;

    /// Bind a camera, or detach it with `None`.
    fn attach_camera(&self, camera: Option<&CameraDevice>) -> Result<(), CaptureError>;

    /// Bind a microphone, or detach it with `None`.
    fn attach_microphone(&self, microphone: Option<&Microphone>) -> Result<(), CaptureError>;

    /// Tune the bound camera.
    fn configure_camera(&self, tuning: &DeviceTuning) -> Result<(), CaptureError>;

    /// Render into a preview surface, or stop rendering with `None`.
    fn attach_preview(&self, preview: Option<&PreviewSurface>);

    /// Replace the video encoder settings.
    fn apply_video_settings(&self, settings: &VideoSettings);

    /// Replace the audio encoder settings.
    fn apply_audio_settings(&self, settings: &AudioSettings);

    /// Mute or unmute audio capture.
    fn set_muted(&self, muted: bool);

    /// Ramp the camera zoom.
    fn set_zoom(&self, ratio: f32);

    /// Start connecting to `url`, replacing any existing connection.
    /// Completion is reported as a status.
    fn connect(&self, url: &str);

    /// Start publishing `stream_name` on the open connection.
    fn publish(&self, stream_name: &str);

    /// Close the connection, aborting a pending connect. An explicit close
    /// is not reported as [`EngineStatus::Closed`].
    fn close(&self);
}
