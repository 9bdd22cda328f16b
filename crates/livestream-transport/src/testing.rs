//! Scripted engine for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use livestream_ipc::{CameraDevice, CaptureError, Microphone, PreviewSurface};

use crate::engine::{AudioSettings, DeviceTuning, EngineStatus, TransportEngine, VideoSettings};

/// One call received by a [`MockEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    AttachCamera(Option<String>),
    AttachMicrophone(Option<String>),
    ConfigureCamera(DeviceTuning),
    AttachPreview(Option<String>),
    VideoSettings(VideoSettings),
    AudioSettings(AudioSettings),
    Muted(bool),
    Zoom(f32),
    Connect(String),
    Publish(String),
    Close,
}

/// A [`TransportEngine`] that records every call and emits statuses on
/// demand.
pub struct MockEngine {
    name: &'static str,
    calls: Mutex<Vec<EngineCall>>,
    status_tx: Sender<EngineStatus>,
    status_rx: Receiver<EngineStatus>,
    auto_accept: AtomicBool,
    camera_error: Mutex<Option<CaptureError>>,
    microphone_error: Mutex<Option<CaptureError>>,
    paused: Mutex<bool>,
    resumed: Condvar,
    blocked: AtomicBool,
}

impl MockEngine {
    pub fn new(name: &'static str) -> Self {
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        Self {
            name,
            calls: Mutex::new(Vec::new()),
            status_tx,
            status_rx,
            auto_accept: AtomicBool::new(false),
            camera_error: Mutex::new(None),
            microphone_error: Mutex::new(None),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            blocked: AtomicBool::new(false),
        }
    }

    /// An engine that answers `connect` with `Connected` and `publish` with
    /// `PublishStarted`.
    pub fn accepting(name: &'static str) -> Self {
        let engine = Self::new(name);
        engine.auto_accept.store(true, Ordering::SeqCst);
        engine
    }

    /// Push a status to the subscribed adapter.
    pub fn emit(&self, status: EngineStatus) {
        let _ = self.status_tx.send(status);
    }

    /// Fail every camera attach with `error`.
    pub fn fail_camera_attach(&self, error: CaptureError) {
        *self.camera_error.lock() = Some(error);
    }

    /// Fail every microphone attach with `error`.
    pub fn fail_microphone_attach(&self, error: CaptureError) {
        *self.microphone_error.lock() = Some(error);
    }

    /// Hold every following engine call until [`MockEngine::resume`].
    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }

    /// Returns true while a call is held by [`MockEngine::pause`].
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn connect_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Connect(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Publish(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn last_video_settings(&self) -> Option<VideoSettings> {
        self.calls().into_iter().rev().find_map(|call| match call {
            EngineCall::VideoSettings(settings) => Some(settings),
            _ => None,
        })
    }

    /// Id of the camera currently attached, following attach and detach
    /// calls.
    pub fn attached_camera(&self) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            EngineCall::AttachCamera(id) => Some(id),
            _ => None,
        })?
    }

    /// Id of the microphone currently attached.
    pub fn attached_microphone(&self) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            EngineCall::AttachMicrophone(id) => Some(id),
            _ => None,
        })?
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Poll `condition` until it holds or `timeout` elapses.
    pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn record(&self, call: EngineCall) {
        {
            let mut paused = self.paused.lock();
            while *paused {
                self.blocked.store(true, Ordering::SeqCst);
                self.resumed.wait(&mut paused);
            }
            self.blocked.store(false, Ordering::SeqCst);
        }
        self.calls.lock().push(call);
    }
}

impl TransportEngine for MockEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribe(&self) -> Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    fn attach_camera(&self, camera: Option<&CameraDevice>) -> Result<(), CaptureError> {
        self.record(EngineCall::AttachCamera(camera.map(|c| c.id.clone())));
        match (camera, self.camera_error.lock().clone()) {
            (Some(_), Some(error)) => Err(error),
            _ => Ok(()),
        }
    }

    fn attach_microphone(&self, microphone: Option<&Microphone>) -> Result<(), CaptureError> {
        self.record(EngineCall::AttachMicrophone(microphone.map(|m| m.id.clone())));
        match (microphone, self.microphone_error.lock().clone()) {
            (Some(_), Some(error)) => Err(error),
            _ => Ok(()),
        }
    }

    fn configure_camera(&self, tuning: &DeviceTuning) -> Result<(), CaptureError> {
        self.record(EngineCall::ConfigureCamera(*tuning));
        Ok(())
    }

    fn attach_preview(&self, preview: Option<&PreviewSurface>) {
        self.record(EngineCall::AttachPreview(preview.map(|p| p.id.clone())));
    }

    fn apply_video_settings(&self, settings: &VideoSettings) {
        self.record(EngineCall::VideoSettings(settings.clone()));
    }

    fn apply_audio_settings(&self, settings: &AudioSettings) {
        self.record(EngineCall::AudioSettings(*settings));
    }

    fn set_muted(&self, muted: bool) {
        self.record(EngineCall::Muted(muted));
    }

    fn set_zoom(&self, ratio: f32) {
        self.record(EngineCall::Zoom(ratio));
    }

    fn connect(&self, url: &str) {
        self.record(EngineCall::Connect(url.to_string()));
        if self.auto_accept.load(Ordering::SeqCst) {
            self.emit(EngineStatus::Connected);
        }
    }

    fn publish(&self, stream_name: &str) {
        self.record(EngineCall::Publish(stream_name.to_string()));
        if self.auto_accept.load(Ordering::SeqCst) {
            self.emit(EngineStatus::PublishStarted);
        }
    }

    fn close(&self) {
        self.record(EngineCall::Close);
    }
}
