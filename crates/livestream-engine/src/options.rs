//! Construction options for the controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use livestream_config::{AudioConfig, Orientation, VideoConfig};
use livestream_ipc::{CameraDevice, Microphone};
use livestream_transport::RetryPolicies;

/// Default bound on waiting for an adapter to release capture hardware.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial state applied when a [`crate::LiveStream`] is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveStreamOptions {
    /// Audio configuration applied at creation.
    pub audio: Option<AudioConfig>,

    /// Video configuration applied at creation.
    pub video: Option<VideoConfig>,

    /// Camera bound at creation.
    pub camera: Option<CameraDevice>,

    /// Microphone bound at creation.
    pub microphone: Option<Microphone>,

    /// Device orientation at creation.
    pub orientation: Orientation,

    /// Recovery policies of both adapters.
    pub retry: RetryPolicies,

    /// How long a transport switch waits for the previous adapter.
    pub flush_timeout: Duration,
}

impl Default for LiveStreamOptions {
    fn default() -> Self {
        Self {
            audio: Some(AudioConfig::default()),
            video: Some(VideoConfig::default()),
            camera: None,
            microphone: Some(Microphone::default()),
            orientation: Orientation::default(),
            retry: RetryPolicies::default(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl LiveStreamOptions {
    /// Options with nothing configured and no capture device.
    pub fn unconfigured() -> Self {
        Self {
            audio: None,
            video: None,
            microphone: None,
            ..Self::default()
        }
    }
}
