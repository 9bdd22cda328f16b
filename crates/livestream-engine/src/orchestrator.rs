//! The live stream controller.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info, instrument, warn};
use url::Url;

use livestream_config::{AudioConfig, Orientation, VideoConfig};
use livestream_ipc::{
    CameraDevice, CameraPosition, EventDispatcher, HostSignal, LiveStreamDelegate, LiveStreamEvent,
    PreviewSurface, Protocol,
};
use livestream_transport::{
    LiveStreamError, LiveStreamResult, RtmpAdapter, SessionState, SrtAdapter, TransportAdapter,
    TransportEngine,
};

use crate::options::LiveStreamOptions;
use crate::state::AdapterSet;

/// Ingest URL used by [`LiveStream::start_streaming_default`].
pub const DEFAULT_RTMP_URL: &str = "rtmp://broadcast.api.video/s";

/// Single entry point for streaming: owns one RTMP and one SRT adapter,
/// routes each start request to the adapter matching the URL scheme and
/// forwards the current adapter's events to observers.
pub struct LiveStream {
    adapters: AdapterSet,
    dispatcher: Arc<EventDispatcher>,
    flush_timeout: Duration,
}

impl LiveStream {
    /// Create a controller over the two engines and apply `options`.
    pub fn new(
        rtmp_engine: Arc<dyn TransportEngine>,
        srt_engine: Arc<dyn TransportEngine>,
        options: LiveStreamOptions,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new(Protocol::Rtmp));

        let rtmp = RtmpAdapter::new(
            rtmp_engine,
            dispatcher.sink(Protocol::Rtmp),
            options.retry.clone(),
            options.orientation,
        );
        let srt = SrtAdapter::new(
            srt_engine,
            dispatcher.sink(Protocol::Srt),
            options.retry.clone(),
            options.orientation,
        );

        let stream = Self {
            adapters: AdapterSet::new(rtmp, srt, Protocol::Rtmp),
            dispatcher,
            flush_timeout: options.flush_timeout,
        };

        if let Some(audio) = options.audio {
            stream.set_audio_config(audio);
        }
        if let Some(video) = options.video {
            stream.set_video_config(video);
        }
        if let Some(microphone) = options.microphone {
            stream.current().core().attach_microphone(Some(microphone));
        }
        if let Some(camera) = options.camera {
            stream.set_camera(camera);
        }

        info!(orientation = %options.orientation.name(), "Live stream created");
        stream
    }

    fn current(&self) -> &dyn TransportAdapter {
        self.adapters.current_adapter()
    }

    /// Receive every event of the current adapter.
    pub fn subscribe(&self) -> Receiver<LiveStreamEvent> {
        self.dispatcher.subscribe()
    }

    /// Register a delegate. Only a weak handle is kept.
    pub fn add_delegate(&self, delegate: &Arc<dyn LiveStreamDelegate>) {
        self.dispatcher.add_delegate(delegate);
    }

    /// Audio configuration of the current adapter.
    pub fn audio_config(&self) -> Option<AudioConfig> {
        self.current().audio_config()
    }

    /// Apply an audio configuration to both adapters.
    pub fn set_audio_config(&self, config: AudioConfig) {
        debug!(bitrate = config.bitrate, "Audio configuration");
        for adapter in self.adapters.all() {
            adapter.apply_audio_config(config);
        }
    }

    /// Video configuration of the current adapter.
    pub fn video_config(&self) -> Option<VideoConfig> {
        self.current().video_config()
    }

    /// Apply a video configuration to both adapters.
    pub fn set_video_config(&self, config: VideoConfig) {
        debug!(resolution = %config.resolution.name(), bitrate = config.bitrate, "Video configuration");
        for adapter in self.adapters.all() {
            adapter.apply_video_config(config.clone());
        }
    }

    /// Change the video bitrate without reconnecting.
    pub fn set_video_bitrate(&self, bitrate: u32) {
        for adapter in self.adapters.all() {
            adapter.core().set_video_bitrate(bitrate);
        }
    }

    /// Last camera requested on the current adapter.
    pub fn camera(&self) -> Option<CameraDevice> {
        self.current().core().settings().camera
    }

    /// Bind a camera on the current adapter.
    pub fn set_camera(&self, camera: CameraDevice) {
        info!(camera = %camera.id, position = ?camera.position, "Selecting camera");
        self.current().core().attach_camera(Some(camera));
    }

    /// Position of the bound camera.
    pub fn camera_position(&self) -> CameraPosition {
        self.current().core().camera_position()
    }

    /// Whether audio capture is muted.
    pub fn is_muted(&self) -> bool {
        self.current().core().settings().muted
    }

    /// Mute or unmute audio capture.
    pub fn set_muted(&self, muted: bool) {
        self.current().core().set_muted(muted);
    }

    /// Zoom ratio of the bound camera.
    pub fn zoom_ratio(&self) -> f32 {
        self.current().core().settings().zoom
    }

    /// Zoom the bound camera. Out-of-range ratios are ignored.
    pub fn set_zoom_ratio(&self, ratio: f32) {
        self.current().core().set_zoom_ratio(ratio);
    }

    /// Render the camera into `surface`, or stop rendering with `None`.
    pub fn attach_preview(&self, surface: Option<PreviewSurface>) {
        self.current().core().attach_preview(surface);
    }

    /// Re-bind the last camera and microphone.
    pub fn start_preview(&self) {
        self.current().core().start_preview();
    }

    /// Release camera and microphone, keeping them for `start_preview`.
    pub fn stop_preview(&self) {
        self.current().core().stop_preview();
    }

    /// Start streaming `stream_key` to `url`. The transport follows the URL
    /// scheme; the outcome is reported as an event.
    #[instrument(name = "start_streaming", skip(self, stream_key))]
    pub fn start_streaming(&self, stream_key: &str, url: &str) -> LiveStreamResult<()> {
        if stream_key.is_empty() {
            return Err(LiveStreamError::IllegalArgument(
                "Stream key must not be empty".to_string(),
            ));
        }
        if url.is_empty() {
            return Err(LiveStreamError::IllegalArgument(
                "URL must not be empty".to_string(),
            ));
        }

        let _guard = self.adapters.lock();

        if self.current().is_connected() {
            return Err(LiveStreamError::IllegalOperation(
                "Already streaming".to_string(),
            ));
        }

        let parsed = Url::parse(url)
            .map_err(|e| LiveStreamError::IllegalArgument(format!("Invalid URL '{}': {}", url, e)))?;
        let protocol = Protocol::from_scheme(parsed.scheme()).ok_or_else(|| {
            LiveStreamError::IllegalArgument(format!("Unsupported URL scheme: {}", parsed.scheme()))
        })?;

        if protocol != self.adapters.current() {
            self.adapters
                .migrate(protocol, &self.dispatcher, self.flush_timeout);
        }

        self.adapters.get(protocol).start_streaming(stream_key, url)
    }

    /// Start streaming `stream_key` to [`DEFAULT_RTMP_URL`].
    pub fn start_streaming_default(&self, stream_key: &str) -> LiveStreamResult<()> {
        self.start_streaming(stream_key, DEFAULT_RTMP_URL)
    }

    /// Stop the current stream. Never fails.
    #[instrument(name = "stop_streaming", skip(self))]
    pub fn stop_streaming(&self) {
        let _guard = self.adapters.lock();
        self.current().stop_streaming();
    }

    /// Whether the current adapter is connected.
    pub fn is_streaming(&self) -> bool {
        self.current().is_connected()
    }

    /// Session state of the current adapter.
    pub fn state(&self) -> SessionState {
        self.current().state()
    }

    /// Transport of the current adapter.
    pub fn current_protocol(&self) -> Protocol {
        self.adapters.current()
    }

    /// Reorder the encoded frame size on both adapters. The connection and
    /// the configured resolution are left as they are.
    pub fn on_orientation_changed(&self, orientation: Orientation) {
        debug!(orientation = %orientation.name(), "Orientation changed");
        for adapter in self.adapters.all() {
            adapter.on_orientation_changed(orientation);
        }
    }

    /// The host moved to the background: stop streaming.
    pub fn on_background(&self) {
        info!("Entered background, stopping stream");
        self.stop_streaming();
    }

    /// The host returned to the foreground. Streaming is not resumed.
    pub fn on_foreground(&self) {
        debug!("Entered foreground");
    }

    /// Apply one host signal. Returns false on [`HostSignal::Shutdown`].
    pub fn handle_signal(&self, signal: HostSignal) -> bool {
        debug!(?signal, "Handling host signal");

        match signal {
            HostSignal::OrientationChanged(orientation) => self.on_orientation_changed(orientation),
            HostSignal::EnteredBackground => self.on_background(),
            HostSignal::EnteredForeground => self.on_foreground(),
            HostSignal::Shutdown => {
                self.stop_streaming();
                return false;
            }
        }

        true
    }

    /// Wait until both adapters have run their queued work.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.adapters
            .all()
            .iter()
            .all(|adapter| adapter.flush(timeout))
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        let current = self.current();
        if !current.state().is_idle() {
            current.stop_streaming();
        }
        if !self.flush(self.flush_timeout) {
            warn!("Timed out waiting for adapters on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use livestream_config::Resolution;
    use livestream_ipc::{CaptureError, Microphone};
    use livestream_transport::testing::{EngineCall, MockEngine};
    use livestream_transport::EngineStatus;

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Fixture {
        stream: LiveStream,
        events: Receiver<LiveStreamEvent>,
        rtmp_engine: Arc<MockEngine>,
        srt_engine: Arc<MockEngine>,
    }

    fn fixture_with(options: LiveStreamOptions) -> Fixture {
        let rtmp_engine = Arc::new(MockEngine::new("mock-rtmp"));
        let srt_engine = Arc::new(MockEngine::new("mock-srt"));
        let stream = LiveStream::new(rtmp_engine.clone(), srt_engine.clone(), options);
        let events = stream.subscribe();
        Fixture {
            stream,
            events,
            rtmp_engine,
            srt_engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(LiveStreamOptions::default())
    }

    fn accepting_fixture() -> Fixture {
        let rtmp_engine = Arc::new(MockEngine::accepting("mock-rtmp"));
        let srt_engine = Arc::new(MockEngine::accepting("mock-srt"));
        let stream = LiveStream::new(
            rtmp_engine.clone(),
            srt_engine.clone(),
            LiveStreamOptions::default(),
        );
        let events = stream.subscribe();
        Fixture {
            stream,
            events,
            rtmp_engine,
            srt_engine,
        }
    }

    fn no_connect(f: &Fixture) -> bool {
        f.stream.flush(TIMEOUT)
            && f.rtmp_engine.connect_urls().is_empty()
            && f.srt_engine.connect_urls().is_empty()
    }

    #[test]
    fn test_empty_arguments_never_connect() {
        let f = fixture();

        for (key, url) in [("", "rtmp://host/s"), ("key1", ""), ("", "srt://host:1234"), ("", "")] {
            assert!(matches!(
                f.stream.start_streaming(key, url),
                Err(LiveStreamError::IllegalArgument(_))
            ));
        }
        assert!(no_connect(&f));
    }

    #[test]
    fn test_start_before_configuration() {
        let f = fixture_with(LiveStreamOptions::unconfigured());

        assert_eq!(
            f.stream.start_streaming("key1", "rtmp://host/s"),
            Err(LiveStreamError::IllegalOperation(
                "Missing audio and/or video configuration".to_string()
            ))
        );

        f.stream.set_audio_config(AudioConfig::default());
        assert!(matches!(
            f.stream.start_streaming("key1", "srt://host:1234"),
            Err(LiveStreamError::IllegalOperation(_))
        ));
        assert!(no_connect(&f));
    }

    #[test]
    fn test_invalid_urls() {
        let f = fixture();

        for url in ["not a url", "http://host/s", "rtmps://host/s", "/relative/path"] {
            assert!(
                matches!(
                    f.stream.start_streaming("key1", url),
                    Err(LiveStreamError::IllegalArgument(_))
                ),
                "{}",
                url
            );
        }
        assert!(no_connect(&f));
    }

    #[test]
    fn test_second_start_while_connected() {
        let f = accepting_fixture();

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );

        for url in ["rtmp://host/s", "srt://host:1234"] {
            assert_eq!(
                f.stream.start_streaming("key2", url),
                Err(LiveStreamError::IllegalOperation(
                    "Already streaming".to_string()
                ))
            );
        }

        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(f.stream.current_protocol(), Protocol::Rtmp);
        assert_eq!(f.stream.state(), SessionState::Publishing);
        assert_eq!(f.rtmp_engine.connect_urls().len(), 1);
        assert!(!f.rtmp_engine.calls().contains(&EngineCall::Close));
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_stop_before_connect() {
        let f = fixture();

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        f.stream.stop_streaming();
        assert!(f.stream.flush(TIMEOUT));

        f.rtmp_engine.emit(EngineStatus::Connected);
        f.rtmp_engine.emit(EngineStatus::PublishStarted);
        assert!(f.stream.flush(TIMEOUT));
        std::thread::sleep(Duration::from_millis(20));

        assert!(f.events.try_recv().is_err());
        assert_eq!(f.stream.state(), SessionState::Idle);
    }

    #[test]
    fn test_stop_after_connected_before_publish() {
        let f = fixture();

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        assert!(f.stream.flush(TIMEOUT));
        f.rtmp_engine.emit(EngineStatus::Connected);
        assert!(MockEngine::wait_for(TIMEOUT, || f.stream.state() == SessionState::Connected));

        f.stream.stop_streaming();
        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::Disconnection
        );

        f.rtmp_engine.emit(EngineStatus::PublishStarted);
        assert!(f.stream.flush(TIMEOUT));
        std::thread::sleep(Duration::from_millis(20));
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_srt_stream_id() {
        let f = fixture();

        f.stream.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(
            f.srt_engine.connect_urls(),
            vec!["srt://host:1234?streamid=key1".to_string()]
        );
        assert_eq!(f.stream.current_protocol(), Protocol::Srt);

        f.stream.stop_streaming();
        f.stream
            .start_streaming("key1", "srt://host:1234?latency=200")
            .unwrap();
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(
            f.srt_engine.connect_urls().last().unwrap(),
            "srt://host:1234?latency=200&streamid=key1"
        );
        assert!(f.rtmp_engine.connect_urls().is_empty());
    }

    #[test]
    fn test_orientation_change_while_connected() {
        let f = accepting_fixture();
        f.stream.set_video_config(VideoConfig::new(Resolution::Wide1080p));

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(
            f.rtmp_engine.last_video_settings().unwrap().size.to_string(),
            "1080x1920"
        );

        f.stream.on_orientation_changed(Orientation::LandscapeRight);
        assert!(f.stream.flush(TIMEOUT));

        assert_eq!(
            f.rtmp_engine.last_video_settings().unwrap().size.to_string(),
            "1920x1080"
        );
        assert_eq!(
            f.srt_engine.last_video_settings().unwrap().size.to_string(),
            "1920x1080"
        );
        assert_eq!(f.stream.video_config().unwrap().resolution, Resolution::Wide1080p);
        assert!(f.stream.is_streaming());
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_switch_migrates_camera() {
        let f = fixture();
        f.stream
            .set_camera(CameraDevice::new("back", CameraPosition::Back));
        f.stream.attach_preview(Some(PreviewSurface::new("view")));

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        f.stream.stop_streaming();
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(f.rtmp_engine.attached_camera(), Some("back".to_string()));

        f.stream.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(f.stream.flush(TIMEOUT));

        assert_eq!(f.stream.current_protocol(), Protocol::Srt);
        assert_eq!(f.rtmp_engine.attached_camera(), None);
        assert_eq!(f.rtmp_engine.attached_microphone(), None);
        assert_eq!(f.srt_engine.attached_camera(), Some("back".to_string()));
        assert_eq!(f.srt_engine.attached_microphone(), Some("default".to_string()));
        assert_eq!(f.stream.camera().unwrap().id, "back");
        assert_eq!(f.stream.camera_position(), CameraPosition::Back);

        // Hardware is released before the new adapter binds it.
        let srt_first_camera = f
            .srt_engine
            .calls()
            .into_iter()
            .position(|call| call == EngineCall::AttachCamera(Some("back".to_string())));
        assert!(srt_first_camera.is_some());
        assert_eq!(
            f.srt_engine.connect_urls(),
            vec!["srt://host:1234?streamid=key1".to_string()]
        );
    }

    #[test]
    fn test_switch_back_to_rtmp() {
        let f = fixture();
        f.stream
            .set_camera(CameraDevice::new("front", CameraPosition::Front));

        f.stream.start_streaming("key1", "srt://host:1234").unwrap();
        f.stream.stop_streaming();
        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        assert!(f.stream.flush(TIMEOUT));

        assert_eq!(f.stream.current_protocol(), Protocol::Rtmp);
        assert_eq!(f.rtmp_engine.attached_camera(), Some("front".to_string()));
        assert_eq!(f.srt_engine.attached_camera(), None);
        assert_eq!(f.rtmp_engine.connect_urls(), vec!["rtmp://host/s".to_string()]);
    }

    #[test]
    fn test_old_adapter_events_are_filtered() {
        let f = fixture();

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        f.stream.stop_streaming();
        f.stream.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(f.stream.flush(TIMEOUT));

        f.rtmp_engine.emit(EngineStatus::Failed {
            code: "late".to_string(),
        });
        f.srt_engine.emit(EngineStatus::Connected);

        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );
        assert!(f.stream.flush(TIMEOUT));
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_background_stops() {
        let f = accepting_fixture();

        f.stream.start_streaming_default("key1").unwrap();
        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );
        assert_eq!(f.rtmp_engine.connect_urls(), vec![DEFAULT_RTMP_URL.to_string()]);

        assert!(f.stream.handle_signal(HostSignal::EnteredBackground));
        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::Disconnection
        );
        assert_eq!(f.stream.state(), SessionState::Idle);

        assert!(f.stream.handle_signal(HostSignal::EnteredForeground));
        assert!(!f.stream.handle_signal(HostSignal::Shutdown));
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(f.rtmp_engine.connect_urls().len(), 1);
    }

    #[test]
    fn test_capture_errors_are_reported() {
        let f = fixture();
        f.rtmp_engine
            .fail_camera_attach(CaptureError::DeviceNotFound("ghost".to_string()));

        f.stream
            .set_camera(CameraDevice::new("ghost", CameraPosition::Back));
        assert_eq!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::VideoError(CaptureError::DeviceNotFound("ghost".to_string()))
        );
        assert_eq!(f.stream.camera_position(), CameraPosition::Unspecified);
    }

    #[test]
    fn test_configs_apply_to_both_adapters() {
        let f = fixture();
        f.stream.set_audio_config(AudioConfig::new(64_000));
        f.stream.set_video_bitrate(2_500_000);
        assert!(f.stream.flush(TIMEOUT));

        assert_eq!(f.stream.audio_config().unwrap().bitrate, 64_000);
        assert_eq!(f.stream.video_config().unwrap().bitrate, 2_500_000);
        assert_eq!(f.srt_engine.last_video_settings().unwrap().bitrate, 2_500_000);
    }

    #[test]
    fn test_preview_and_mute() {
        let f = fixture_with(LiveStreamOptions {
            camera: Some(CameraDevice::new("back", CameraPosition::Back).with_max_zoom(5.0)),
            ..LiveStreamOptions::default()
        });
        assert!(f.stream.flush(TIMEOUT));

        f.stream.set_zoom_ratio(3.0);
        f.stream.set_muted(true);
        assert!(f.stream.is_muted());
        assert_eq!(f.stream.zoom_ratio(), 3.0);

        f.stream.stop_preview();
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(f.rtmp_engine.attached_camera(), None);
        assert_eq!(f.stream.camera().unwrap().id, "back");

        f.stream.start_preview();
        assert!(f.stream.flush(TIMEOUT));
        assert_eq!(f.rtmp_engine.attached_camera(), Some("back".to_string()));
        assert_eq!(
            f.rtmp_engine.attached_microphone(),
            Some(Microphone::default().id)
        );
        assert!(f.rtmp_engine.calls().contains(&EngineCall::Muted(true)));
    }

    struct CountingDelegate {
        successes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl LiveStreamDelegate for CountingDelegate {
        fn connection_success(&self) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn connection_failed(&self, _code: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_delegate_receives_events() {
        let f = fixture();
        let counting = Arc::new(CountingDelegate {
            successes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });
        let delegate: Arc<dyn LiveStreamDelegate> = counting.clone();
        f.stream.add_delegate(&delegate);

        f.stream.start_streaming("key1", "rtmp://host/s").unwrap();
        assert!(f.stream.flush(TIMEOUT));
        f.rtmp_engine.emit(EngineStatus::Failed {
            code: "NetConnection.Connect.Rejected".to_string(),
        });
        assert!(matches!(
            f.events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionFailed { .. }
        ));

        assert!(MockEngine::wait_for(TIMEOUT, || {
            counting.failures.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(counting.successes.load(Ordering::SeqCst), 0);
    }
}
