//! The adapter worker: a single thread that owns every engine call and
//! every engine status for one adapter.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{after, never, select, Receiver, Sender};
use tracing::{debug, info, warn};

use livestream_ipc::{CameraDevice, EventSink, LiveStreamEvent, Microphone, PreviewSurface, Protocol};

use crate::adapter::Shared;
use crate::connection::{ReconnectPolicy, RetryPolicies, SessionState};
use crate::engine::{DeviceTuning, EngineStatus, TransportEngine};
use crate::{rtmp, srt};

/// Work queued on an adapter worker.
pub(crate) enum Job {
    AttachCamera(Option<CameraDevice>),
    AttachMicrophone(Option<Microphone>),
    AttachPreview(Option<PreviewSurface>),
    PushVideoSettings,
    PushAudioSettings,
    PushMuted(bool),
    Zoom(f32),
    Connect { generation: u64 },
    Close { was_connected: bool, generation: u64 },
    Barrier(Sender<()>),
    Shutdown,
}

/// Which recovery tier scheduled a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryTier {
    IoError,
    Rejection,
}

/// Worker-side state of one adapter.
pub(crate) struct Session {
    protocol: Protocol,
    engine: Arc<dyn TransportEngine>,
    shared: Arc<Shared>,
    sink: EventSink,
    policies: RetryPolicies,
    reconnect_at: Option<Instant>,
    io_attempts: u32,
    rejection_attempts: u32,
    announced: bool,
    generation: u64,
}

impl Session {
    pub(crate) fn new(
        protocol: Protocol,
        engine: Arc<dyn TransportEngine>,
        shared: Arc<Shared>,
        sink: EventSink,
        policies: RetryPolicies,
    ) -> Self {
        Self {
            protocol,
            engine,
            shared,
            sink,
            policies,
            reconnect_at: None,
            io_attempts: 0,
            rejection_attempts: 0,
            announced: false,
            generation: 0,
        }
    }

    /// Run until shutdown or until the job channel closes.
    pub(crate) fn run(mut self, jobs: Receiver<Job>, mut statuses: Receiver<EngineStatus>) {
        debug!(protocol = ?self.protocol, engine = self.engine.name(), "Adapter worker starting");

        let mut running = true;
        while running {
            let timer = match self.reconnect_at {
                Some(at) => after(at.saturating_duration_since(Instant::now())),
                None => never(),
            };
            let mut statuses_closed = false;

            select! {
                recv(jobs) -> job => match job {
                    Ok(Job::Shutdown) | Err(_) => running = false,
                    Ok(job) => self.handle_job(job, &statuses),
                },
                recv(statuses) -> status => match status {
                    Ok(status) => self.handle_status(status),
                    Err(_) => statuses_closed = true,
                },
                recv(timer) -> _ => self.reconnect(&statuses),
            }

            if statuses_closed {
                warn!(protocol = ?self.protocol, "Engine status channel closed");
                statuses = never();
            }
        }

        debug!(protocol = ?self.protocol, "Adapter worker stopped");
    }

    fn handle_job(&mut self, job: Job, statuses: &Receiver<EngineStatus>) {
        match job {
            Job::AttachCamera(camera) => self.attach_camera(camera),
            Job::AttachMicrophone(microphone) => self.attach_microphone(microphone),
            Job::AttachPreview(preview) => self.engine.attach_preview(preview.as_ref()),
            Job::PushVideoSettings => {
                let settings = self.shared.settings.read().video_settings();
                if let Some(settings) = settings {
                    self.engine.apply_video_settings(&settings);
                }
            }
            Job::PushAudioSettings => {
                let settings = self.shared.settings.read().audio_settings();
                if let Some(settings) = settings {
                    self.engine.apply_audio_settings(&settings);
                }
            }
            Job::PushMuted(muted) => self.engine.set_muted(muted),
            Job::Zoom(ratio) => self.engine.set_zoom(ratio),
            Job::Connect { generation } => {
                self.generation = generation;
                self.io_attempts = 0;
                self.rejection_attempts = 0;
                self.announced = false;
                self.reconnect_at = None;
                self.connect(statuses);
            }
            Job::Close {
                was_connected,
                generation,
            } => {
                self.generation = generation;
                self.close(was_connected, statuses);
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
            Job::Shutdown => {}
        }
    }

    fn attach_camera(&mut self, camera: Option<CameraDevice>) {
        match self.engine.attach_camera(camera.as_ref()) {
            Ok(()) => {
                self.shared.settings.write().bound_camera = camera.clone();

                // Tuning needs a bound device, so it waits for the attach.
                if let Some(camera) = camera {
                    debug!(protocol = ?self.protocol, camera = %camera.id, "Camera attached");
                    if let Err(e) = self.engine.configure_camera(&DeviceTuning::for_camera(&camera)) {
                        warn!(camera = %camera.id, "Could not configure exposure and focus: {}", e);
                    }
                }
            }
            Err(e) => {
                warn!(protocol = ?self.protocol, "Camera attach failed: {}", e);
                let _ = self.engine.attach_camera(None);
                self.shared.settings.write().bound_camera = None;
                self.sink.emit(LiveStreamEvent::VideoError(e));
            }
        }
    }

    fn attach_microphone(&mut self, microphone: Option<Microphone>) {
        match self.engine.attach_microphone(microphone.as_ref()) {
            Ok(()) => {
                self.shared.settings.write().microphone_bound = microphone.is_some();
            }
            Err(e) => {
                warn!(protocol = ?self.protocol, "Microphone attach failed: {}", e);
                let _ = self.engine.attach_microphone(None);
                self.shared.settings.write().microphone_bound = false;
                self.sink.emit(LiveStreamEvent::AudioError(e));
            }
        }
    }

    fn connect(&mut self, statuses: &Receiver<EngineStatus>) {
        if self.is_stale() || self.state() != SessionState::Connecting {
            debug!(protocol = ?self.protocol, "Attempt was cancelled before connect");
            return;
        }

        // Whatever is queued belongs to the connection being replaced.
        self.discard_pending(statuses);

        let target = self.shared.target.read().clone();
        match target {
            Some(target) => {
                debug!(protocol = ?self.protocol, url = %target.connect_url, "Connecting");
                self.engine.connect(&target.connect_url);
            }
            None => warn!(protocol = ?self.protocol, "No stream target to connect to"),
        }
    }

    fn reconnect(&mut self, statuses: &Receiver<EngineStatus>) {
        self.reconnect_at = None;
        self.connect(statuses);
    }

    fn close(&mut self, was_connected: bool, statuses: &Receiver<EngineStatus>) {
        self.reconnect_at = None;
        self.engine.close();
        self.discard_pending(statuses);

        // A new attempt may already have been started behind this close.
        self.transition(
            |state| matches!(state, SessionState::Disconnecting),
            SessionState::Idle,
        );

        info!(protocol = ?self.protocol, "Stream closed");

        // A live stream that was reconnecting is no longer `Connected` but
        // still owes its observers a disconnection.
        let went_live = std::mem::take(&mut self.announced);
        if was_connected || went_live {
            self.sink.emit(LiveStreamEvent::Disconnection);
        }
    }

    fn discard_pending(&self, statuses: &Receiver<EngineStatus>) {
        let discarded = statuses.try_iter().count();
        if discarded > 0 {
            debug!(protocol = ?self.protocol, discarded, "Dropped statuses of a previous connection");
        }
    }

    /// Returns true if a newer start or stop request is queued behind the
    /// attempt this worker is serving.
    fn is_stale(&self) -> bool {
        self.shared.generation() != self.generation
    }

    fn handle_status(&mut self, status: EngineStatus) {
        if self.is_stale() {
            debug!(protocol = ?self.protocol, ?status, "Ignoring status of a cancelled attempt");
            return;
        }

        debug!(protocol = ?self.protocol, ?status, state = %self.state().name(), "Engine status");

        match self.protocol {
            Protocol::Rtmp => rtmp::handle_status(self, status),
            Protocol::Srt => srt::handle_status(self, status),
        }
    }

    // Helpers for the protocol status handlers.

    pub(crate) fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Move the state for the attempt being served. Fails if a caller
    /// request got in first.
    pub(crate) fn transition(
        &self,
        expected: impl FnOnce(&SessionState) -> bool,
        state: SessionState,
    ) -> bool {
        self.shared
            .transition(self.protocol, self.generation, expected, state)
    }

    pub(crate) fn engine(&self) -> &dyn TransportEngine {
        self.engine.as_ref()
    }

    pub(crate) fn stream_key(&self) -> Option<String> {
        self.shared
            .target
            .read()
            .as_ref()
            .map(|target| target.stream_key.clone())
    }

    /// Fire `ConnectionSuccess` once per attempt.
    pub(crate) fn announce_success(&mut self) {
        self.io_attempts = 0;
        self.rejection_attempts = 0;
        if !self.announced {
            self.announced = true;
            info!(protocol = ?self.protocol, "Stream is live");
            self.sink.emit(LiveStreamEvent::ConnectionSuccess);
        }
    }

    /// The connection dropped on its own.
    pub(crate) fn connection_lost(&mut self) {
        if !self.transition(SessionState::is_connected, SessionState::Idle) {
            return;
        }
        self.reconnect_at = None;
        self.engine.close();
        warn!(protocol = ?self.protocol, "Connection lost");
        if self.announced {
            self.announced = false;
            self.sink.emit(LiveStreamEvent::Disconnection);
        }
    }

    /// End the attempt with a failure. An attempt that already went live is
    /// reported as a disconnection instead.
    pub(crate) fn fail(&mut self, code: String) {
        let failed = SessionState::Failed {
            reason: code.clone(),
        };
        if !self.transition(SessionState::is_active, failed) {
            return;
        }
        self.reconnect_at = None;
        self.engine.close();
        warn!(protocol = ?self.protocol, code = %code, "Stream attempt failed");

        if self.announced {
            self.announced = false;
            self.sink.emit(LiveStreamEvent::Disconnection);
        } else {
            self.sink.emit(LiveStreamEvent::ConnectionFailed { code });
        }
    }

    /// Schedule another connect under the tier's policy. Returns false when
    /// the policy is exhausted. A cancelled attempt counts as handled.
    pub(crate) fn schedule_retry(&mut self, tier: RetryTier) -> bool {
        let (policy, attempts): (&ReconnectPolicy, &mut u32) = match tier {
            RetryTier::IoError => (&self.policies.io_error, &mut self.io_attempts),
            RetryTier::Rejection => (&self.policies.rejection, &mut self.rejection_attempts),
        };

        if !policy.should_retry(*attempts) {
            return false;
        }

        if !self
            .shared
            .transition(self.protocol, self.generation, SessionState::is_active, SessionState::Connecting)
        {
            return true;
        }

        *attempts += 1;
        let delay = policy.delay_for_attempt(*attempts);
        info!(
            protocol = ?self.protocol,
            ?tier,
            attempt = *attempts,
            "Reconnecting in {:?}...",
            delay
        );

        self.reconnect_at = Some(Instant::now() + delay);
        true
    }
}
