//! Shared adapter machinery and the `TransportAdapter` capability set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use livestream_config::{AudioConfig, FrameSize, Orientation, Resolution, VideoConfig};
use livestream_ipc::{CameraDevice, CameraPosition, EventSink, Microphone, PreviewSurface, Protocol};

use crate::connection::{RetryPolicies, SessionState};
use crate::engine::{AudioSettings, TransportEngine, VideoSettings};
use crate::error::LiveStreamError;
use crate::session::{Job, Session};
use crate::LiveStreamResult;

/// Settings snapshot of one adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Applied audio configuration.
    pub audio: Option<AudioConfig>,

    /// Applied video configuration.
    pub video: Option<VideoConfig>,

    /// Device orientation used to order the encoded size.
    pub orientation: Orientation,

    /// Encoded frame size, ordered for `orientation`.
    pub video_size: FrameSize,

    /// Last camera requested, kept across preview stops.
    pub camera: Option<CameraDevice>,

    /// Camera currently bound in the engine.
    pub bound_camera: Option<CameraDevice>,

    /// Last microphone requested.
    pub microphone: Option<Microphone>,

    /// Whether the microphone is bound in the engine.
    pub microphone_bound: bool,

    /// Preview surface the engine renders into.
    pub preview: Option<PreviewSurface>,

    /// Audio capture muted.
    pub muted: bool,

    /// Camera zoom ratio.
    pub zoom: f32,
}

impl AdapterSettings {
    fn new(orientation: Orientation) -> Self {
        Self {
            audio: None,
            video: None,
            orientation,
            video_size: Resolution::default().size().oriented(orientation),
            camera: None,
            bound_camera: None,
            microphone: None,
            microphone_bound: false,
            preview: None,
            muted: false,
            zoom: 1.0,
        }
    }

    /// Engine video settings, if video is configured.
    pub fn video_settings(&self) -> Option<VideoSettings> {
        self.video
            .as_ref()
            .map(|config| VideoSettings::from_config(config, self.video_size))
    }

    /// Engine audio settings, if audio is configured.
    pub fn audio_settings(&self) -> Option<AudioSettings> {
        self.audio.as_ref().map(AudioSettings::from)
    }

    /// Returns true once both audio and video have been applied.
    pub fn is_configured(&self) -> bool {
        self.audio.is_some() && self.video.is_some()
    }

    /// Returns true if a camera or microphone is bound.
    pub fn holds_capture(&self) -> bool {
        self.bound_camera.is_some() || self.microphone_bound
    }
}

/// Destination of the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// Stream key, published on RTMP or carried in the SRT URL.
    pub stream_key: String,

    /// URL handed to the engine's `connect`.
    pub connect_url: String,
}

/// State shared between the caller side and the worker.
///
/// Every start and stop request bumps `generation` while holding the state
/// lock. The worker only moves the state on behalf of the generation it is
/// serving, so statuses of a cancelled attempt cannot overwrite a newer
/// request.
pub(crate) struct Shared {
    pub(crate) state: RwLock<SessionState>,
    generation: AtomicU64,
    pub(crate) settings: RwLock<AdapterSettings>,
    pub(crate) target: RwLock<Option<StreamTarget>>,
}

impl Shared {
    pub(crate) fn new(orientation: Orientation) -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            generation: AtomicU64::new(0),
            settings: RwLock::new(AdapterSettings::new(orientation)),
            target: RwLock::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Generation of the latest start or stop request.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Open a new request generation. Callers hold the state write lock.
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move to `new_state` if `generation` is still the latest request and
    /// the current state satisfies `expected`.
    pub(crate) fn transition(
        &self,
        protocol: Protocol,
        generation: u64,
        expected: impl FnOnce(&SessionState) -> bool,
        new_state: SessionState,
    ) -> bool {
        let previous = {
            let mut state = self.state.write();
            if self.generation() != generation || !expected(&state) {
                return false;
            }
            std::mem::replace(&mut *state, new_state.clone())
        };

        if previous != new_state {
            debug!(
                ?protocol,
                previous = %previous.name(),
                current = %new_state.name(),
                "State transition"
            );
        }
        true
    }
}

/// The machinery common to every adapter: the settings snapshot, the
/// session state and the serialized worker that owns all engine calls.
pub struct AdapterCore {
    protocol: Protocol,
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AdapterCore {
    /// Create the core and start its worker thread.
    pub fn new(
        protocol: Protocol,
        engine: Arc<dyn TransportEngine>,
        sink: EventSink,
        policies: RetryPolicies,
        orientation: Orientation,
    ) -> Self {
        let shared = Arc::new(Shared::new(orientation));

        let (jobs, job_rx) = crossbeam_channel::unbounded();
        let statuses = engine.subscribe();
        let session = Session::new(protocol, engine, Arc::clone(&shared), sink, policies);

        let worker = thread::Builder::new()
            .name(format!("{}-adapter", protocol.scheme()))
            .spawn(move || session.run(job_rx, statuses));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(?protocol, "Failed to spawn adapter worker: {}", e);
                None
            }
        };

        Self {
            protocol,
            shared,
            jobs,
            worker: Mutex::new(worker),
        }
    }

    /// Transport served by this adapter.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Consistent copy of the settings.
    pub fn settings(&self) -> AdapterSettings {
        self.shared.settings.read().clone()
    }

    /// Destination of the current or last attempt.
    pub fn target(&self) -> Option<StreamTarget> {
        self.shared.target.read().clone()
    }

    fn submit(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!(protocol = ?self.protocol, "Adapter worker is gone, dropping job");
        }
    }

    /// Store a video configuration and push it to the engine.
    pub fn apply_video_config(&self, config: VideoConfig) {
        {
            let mut settings = self.shared.settings.write();
            settings.video_size = config.resolution.size().oriented(settings.orientation);
            settings.video = Some(config);
        }
        self.submit(Job::PushVideoSettings);
    }

    /// Store an audio configuration and push it to the engine.
    pub fn apply_audio_config(&self, config: AudioConfig) {
        self.shared.settings.write().audio = Some(config);
        self.submit(Job::PushAudioSettings);
    }

    /// Change the video bitrate of the applied configuration.
    pub fn set_video_bitrate(&self, bitrate: u32) {
        {
            let mut settings = self.shared.settings.write();
            match settings.video.as_ref() {
                Some(video) => settings.video = Some(video.with_bitrate(bitrate)),
                None => {
                    warn!(protocol = ?self.protocol, "Video is not configured, ignoring bitrate");
                    return;
                }
            }
        }
        self.submit(Job::PushVideoSettings);
    }

    /// Reorder the encoded size for a new orientation. Configuration flags
    /// and the connection are left untouched.
    pub fn on_orientation_changed(&self, orientation: Orientation) {
        {
            let mut settings = self.shared.settings.write();
            settings.orientation = orientation;
            settings.video_size = settings.video_size.oriented(orientation);
        }
        self.submit(Job::PushVideoSettings);
    }

    /// Bind a camera (or detach with `None`).
    pub fn attach_camera(&self, camera: Option<CameraDevice>) {
        if camera.is_some() {
            self.shared.settings.write().camera = camera.clone();
        }
        self.submit(Job::AttachCamera(camera));
    }

    /// Bind a microphone (or detach with `None`).
    pub fn attach_microphone(&self, microphone: Option<Microphone>) {
        if microphone.is_some() {
            self.shared.settings.write().microphone = microphone.clone();
        }
        self.submit(Job::AttachMicrophone(microphone));
    }

    /// Render into a preview surface (or stop with `None`).
    pub fn attach_preview(&self, preview: Option<PreviewSurface>) {
        self.shared.settings.write().preview = preview.clone();
        self.submit(Job::AttachPreview(preview));
    }

    /// Re-bind the remembered camera and microphone.
    pub fn start_preview(&self) {
        let (camera, microphone) = {
            let settings = self.shared.settings.read();
            (settings.camera.clone(), settings.microphone.clone())
        };

        let Some(camera) = camera else {
            warn!(protocol = ?self.protocol, "No camera has been set");
            return;
        };

        self.attach_camera(Some(camera));
        self.attach_microphone(Some(microphone.unwrap_or_default()));
    }

    /// Detach camera and microphone, remembering them for `start_preview`.
    pub fn stop_preview(&self) {
        self.submit(Job::AttachCamera(None));
        self.submit(Job::AttachMicrophone(None));
    }

    /// Release the capture hardware and the preview surface.
    pub fn release_capture(&self) {
        self.stop_preview();
        self.submit(Job::AttachPreview(None));
    }

    /// Take over the capture devices described by another adapter's
    /// settings: remembered devices are copied, bound ones are re-bound here.
    pub fn adopt_capture(&self, from: &AdapterSettings) {
        {
            let mut settings = self.shared.settings.write();
            settings.camera = from.camera.clone();
            settings.microphone = from.microphone.clone();
        }

        if from.preview.is_some() {
            self.attach_preview(from.preview.clone());
        }

        if let Some(camera) = from.bound_camera.clone() {
            debug!(protocol = ?self.protocol, camera = %camera.id, "Adopting camera");
            self.submit(Job::AttachCamera(Some(camera)));
            if from.zoom > 1.0 {
                self.shared.settings.write().zoom = from.zoom;
                self.submit(Job::Zoom(from.zoom));
            }
        }

        if from.microphone_bound {
            self.submit(Job::AttachMicrophone(Some(
                from.microphone.clone().unwrap_or_default(),
            )));
        }
    }

    /// Mute or unmute audio capture.
    pub fn set_muted(&self, muted: bool) {
        self.shared.settings.write().muted = muted;
        self.submit(Job::PushMuted(muted));
    }

    /// Zoom the bound camera. Ratios outside `1.0..max_zoom` are ignored.
    pub fn set_zoom_ratio(&self, ratio: f32) {
        {
            let mut settings = self.shared.settings.write();
            let Some(camera) = settings.bound_camera.as_ref() else {
                debug!(protocol = ?self.protocol, "No bound camera, ignoring zoom");
                return;
            };
            if !(1.0..camera.max_zoom).contains(&ratio) {
                debug!(protocol = ?self.protocol, ratio, "Zoom ratio out of range");
                return;
            }
            settings.zoom = ratio;
        }
        self.submit(Job::Zoom(ratio));
    }

    /// Position of the bound camera.
    pub fn camera_position(&self) -> CameraPosition {
        self.shared
            .settings
            .read()
            .bound_camera
            .as_ref()
            .map(|camera| camera.position)
            .unwrap_or_default()
    }

    /// Validate a start request and queue the connect.
    #[instrument(name = "adapter_start", skip(self, target), fields(protocol = ?self.protocol))]
    pub fn start(&self, target: StreamTarget) -> LiveStreamResult<()> {
        if target.stream_key.is_empty() {
            return Err(LiveStreamError::IllegalArgument(
                "Stream key must not be empty".to_string(),
            ));
        }
        if target.connect_url.is_empty() {
            return Err(LiveStreamError::IllegalArgument(
                "URL must not be empty".to_string(),
            ));
        }
        if !self.shared.settings.read().is_configured() {
            return Err(LiveStreamError::IllegalOperation(
                "Missing audio and/or video configuration".to_string(),
            ));
        }

        let generation = {
            let mut state = self.shared.state.write();
            if state.is_active() {
                return Err(LiveStreamError::IllegalOperation(
                    "Already streaming".to_string(),
                ));
            }
            *self.shared.target.write() = Some(target.clone());
            *state = SessionState::Connecting;
            self.shared.next_generation()
        };

        info!(url = %target.connect_url, "Starting stream");
        self.submit(Job::Connect { generation });
        Ok(())
    }

    /// Close the connection. Idempotent; the worker fires one
    /// `Disconnection` if the adapter was connected when this was called or
    /// the stream had gone live and was reconnecting.
    #[instrument(name = "adapter_stop", skip(self), fields(protocol = ?self.protocol))]
    pub fn stop(&self) {
        let (was_connected, generation) = {
            let mut state = self.shared.state.write();
            let was_connected = state.is_connected();
            if !state.is_idle() {
                *state = SessionState::Disconnecting;
            }
            (was_connected, self.shared.next_generation())
        };

        info!(was_connected, "Stopping stream");
        self.submit(Job::Close {
            was_connected,
            generation,
        });
    }

    /// Wait until every job queued so far has run.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.jobs.send(Job::Barrier(tx)).is_err() {
            return false;
        }
        rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for AdapterCore {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Capability set shared by the RTMP and SRT adapters.
///
/// Implementors provide the protocol-specific start request; everything
/// else runs through the shared [`AdapterCore`].
pub trait TransportAdapter: Send + Sync {
    /// Shared adapter machinery.
    fn core(&self) -> &AdapterCore;

    /// Validate and start streaming `stream_key` to `url`.
    fn start_streaming(&self, stream_key: &str, url: &str) -> LiveStreamResult<()>;

    /// Transport served by this adapter.
    fn protocol(&self) -> Protocol {
        self.core().protocol()
    }

    /// Apply a video configuration.
    fn apply_video_config(&self, config: VideoConfig) {
        self.core().apply_video_config(config)
    }

    /// Apply an audio configuration.
    fn apply_audio_config(&self, config: AudioConfig) {
        self.core().apply_audio_config(config)
    }

    /// Applied video configuration.
    fn video_config(&self) -> Option<VideoConfig> {
        self.core().settings().video
    }

    /// Applied audio configuration.
    fn audio_config(&self) -> Option<AudioConfig> {
        self.core().settings().audio
    }

    /// Whether a video configuration has been applied.
    fn is_video_configured(&self) -> bool {
        self.core().settings().video.is_some()
    }

    /// Whether an audio configuration has been applied.
    fn is_audio_configured(&self) -> bool {
        self.core().settings().audio.is_some()
    }

    /// Close the connection.
    fn stop_streaming(&self) {
        self.core().stop()
    }

    /// Whether the engine reported a connection.
    fn is_connected(&self) -> bool {
        self.core().state().is_connected()
    }

    /// Current session state.
    fn state(&self) -> SessionState {
        self.core().state()
    }

    /// React to a device orientation change.
    fn on_orientation_changed(&self, orientation: Orientation) {
        self.core().on_orientation_changed(orientation)
    }

    /// Wait until queued work has run.
    fn flush(&self, timeout: Duration) -> bool {
        self.core().flush(timeout)
    }
}
