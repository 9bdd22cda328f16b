//! Engines for transports this build cannot drive.

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use livestream_ipc::{CameraDevice, CaptureError, Microphone, PreviewSurface};
use livestream_transport::{AudioSettings, DeviceTuning, EngineStatus, TransportEngine, VideoSettings};

/// Accepts capture and encoder settings but fails every connection.
pub struct UnavailableEngine {
    name: &'static str,
    status_tx: Sender<EngineStatus>,
    status_rx: Receiver<EngineStatus>,
}

impl UnavailableEngine {
    pub fn new(name: &'static str) -> Self {
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        Self {
            name,
            status_tx,
            status_rx,
        }
    }
}

impl TransportEngine for UnavailableEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribe(&self) -> Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    fn attach_camera(&self, _camera: Option<&CameraDevice>) -> Result<(), CaptureError> {
        Ok(())
    }

    fn attach_microphone(&self, _microphone: Option<&Microphone>) -> Result<(), CaptureError> {
        Ok(())
    }

    fn configure_camera(&self, _tuning: &DeviceTuning) -> Result<(), CaptureError> {
        Ok(())
    }

    fn attach_preview(&self, _preview: Option<&PreviewSurface>) {}

    fn apply_video_settings(&self, _settings: &VideoSettings) {}

    fn apply_audio_settings(&self, _settings: &AudioSettings) {}

    fn set_muted(&self, _muted: bool) {}

    fn set_zoom(&self, _ratio: f32) {}

    fn connect(&self, url: &str) {
        warn!(engine = self.name, url, "No engine available for this transport");
        let _ = self.status_tx.send(EngineStatus::IoError {
            message: format!("No {} engine available", self.name),
        });
    }

    fn publish(&self, _stream_name: &str) {}

    fn close(&self) {}
}
