//! The fixed adapter pair and transport switching.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, instrument, warn};

use livestream_ipc::{EventDispatcher, Protocol};
use livestream_transport::{RtmpAdapter, SrtAdapter, TransportAdapter};

/// The RTMP and SRT adapters plus the selector of the current one.
pub struct AdapterSet {
    rtmp: RtmpAdapter,
    srt: SrtAdapter,
    current: RwLock<Protocol>,
    switch: Mutex<()>,
}

impl AdapterSet {
    /// Create the pair with `current` selected.
    pub fn new(rtmp: RtmpAdapter, srt: SrtAdapter, current: Protocol) -> Self {
        Self {
            rtmp,
            srt,
            current: RwLock::new(current),
            switch: Mutex::new(()),
        }
    }

    /// The adapter serving `protocol`.
    pub fn get(&self, protocol: Protocol) -> &dyn TransportAdapter {
        match protocol {
            Protocol::Rtmp => &self.rtmp,
            Protocol::Srt => &self.srt,
        }
    }

    /// Protocol of the current adapter.
    pub fn current(&self) -> Protocol {
        *self.current.read()
    }

    /// The current adapter.
    pub fn current_adapter(&self) -> &dyn TransportAdapter {
        self.get(self.current())
    }

    /// Both adapters.
    pub fn all(&self) -> [&dyn TransportAdapter; 2] {
        [&self.rtmp, &self.srt]
    }

    /// Serialize start, stop and switch requests.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.switch.lock()
    }

    /// Make `to` the current adapter, handing it the capture hardware.
    ///
    /// A pending or live attempt on the old adapter is stopped first. The old
    /// adapter releases capture and its queue is drained (bounded by
    /// `timeout`) before the new adapter binds, so the hardware is never
    /// held twice and the old adapter's last events are dispatched while it
    /// is still current. Callers hold [`AdapterSet::lock`].
    #[instrument(name = "switch_transport", skip(self, dispatcher, timeout))]
    pub fn migrate(&self, to: Protocol, dispatcher: &EventDispatcher, timeout: Duration) {
        let from = self.current();
        if from == to {
            return;
        }

        info!(?from, ?to, "Switching transport");
        let old = self.get(from);
        let new = self.get(to);

        if !old.state().is_idle() {
            old.stop_streaming();
        }

        let settings = old.core().settings();
        old.core().release_capture();
        if !old.flush(timeout) {
            warn!(?from, "Timed out waiting for the adapter to release capture");
        }

        dispatcher.set_current(to);
        *self.current.write() = to;

        new.core().adopt_capture(&settings);
        new.core().set_muted(settings.muted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use livestream_config::{AudioConfig, Orientation, VideoConfig};
    use livestream_ipc::{CameraDevice, CameraPosition, LiveStreamEvent, Microphone, PreviewSurface};
    use livestream_transport::testing::{EngineCall, MockEngine};
    use livestream_transport::{EngineStatus, RetryPolicies, SessionState};

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Fixture {
        set: AdapterSet,
        dispatcher: Arc<EventDispatcher>,
        rtmp_engine: Arc<MockEngine>,
        srt_engine: Arc<MockEngine>,
    }

    fn fixture() -> Fixture {
        let rtmp_engine = Arc::new(MockEngine::new("mock-rtmp"));
        let srt_engine = Arc::new(MockEngine::new("mock-srt"));
        let dispatcher = Arc::new(EventDispatcher::new(Protocol::Rtmp));
        let rtmp = RtmpAdapter::new(
            rtmp_engine.clone(),
            dispatcher.sink(Protocol::Rtmp),
            RetryPolicies::default(),
            Orientation::Portrait,
        );
        let srt = SrtAdapter::new(
            srt_engine.clone(),
            dispatcher.sink(Protocol::Srt),
            RetryPolicies::default(),
            Orientation::Portrait,
        );
        let set = AdapterSet::new(rtmp, srt, Protocol::Rtmp);
        for adapter in set.all() {
            adapter.apply_audio_config(AudioConfig::default());
            adapter.apply_video_config(VideoConfig::default());
        }
        Fixture {
            set,
            dispatcher,
            rtmp_engine,
            srt_engine,
        }
    }

    #[test]
    fn test_migrate_moves_capture() {
        let f = fixture();
        let rtmp = f.set.get(Protocol::Rtmp);
        rtmp.core()
            .attach_camera(Some(CameraDevice::new("back", CameraPosition::Back)));
        rtmp.core().attach_microphone(Some(Microphone::default()));
        rtmp.core().attach_preview(Some(PreviewSurface::new("view")));
        assert!(rtmp.flush(TIMEOUT));

        f.set.migrate(Protocol::Srt, &f.dispatcher, TIMEOUT);
        assert!(f.set.get(Protocol::Srt).flush(TIMEOUT));

        assert_eq!(f.set.current(), Protocol::Srt);
        assert_eq!(f.dispatcher.current(), Protocol::Srt);
        assert_eq!(f.rtmp_engine.attached_camera(), None);
        assert_eq!(f.rtmp_engine.attached_microphone(), None);
        assert_eq!(f.srt_engine.attached_camera(), Some("back".to_string()));
        assert_eq!(f.srt_engine.attached_microphone(), Some("default".to_string()));
        assert!(f
            .srt_engine
            .calls()
            .contains(&EngineCall::AttachPreview(Some("view".to_string()))));
        assert_eq!(
            f.set.get(Protocol::Srt).core().camera_position(),
            CameraPosition::Back
        );
    }

    #[test]
    fn test_migrate_cancels_pending_attempt() {
        let f = fixture();
        let events = f.dispatcher.subscribe();
        let rtmp = f.set.get(Protocol::Rtmp);
        rtmp.start_streaming("key1", "rtmp://host/s").unwrap();

        f.set.migrate(Protocol::Srt, &f.dispatcher, TIMEOUT);
        assert_eq!(rtmp.state(), SessionState::Idle);

        // The old adapter is no longer current.
        f.rtmp_engine.emit(EngineStatus::Connected);
        f.rtmp_engine.emit(EngineStatus::PublishStarted);
        assert!(rtmp.flush(TIMEOUT));
        std::thread::sleep(Duration::from_millis(20));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_migrate_stops_live_stream_before_switch() {
        let f = fixture();
        let events = f.dispatcher.subscribe();
        let rtmp = f.set.get(Protocol::Rtmp);
        rtmp.start_streaming("key1", "rtmp://host/s").unwrap();
        assert!(rtmp.flush(TIMEOUT));
        f.rtmp_engine.emit(EngineStatus::Connected);
        assert!(MockEngine::wait_for(TIMEOUT, || f.rtmp_engine.published().len() == 1));
        f.rtmp_engine.emit(EngineStatus::PublishStarted);
        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );

        f.set.migrate(Protocol::Srt, &f.dispatcher, TIMEOUT);
        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::Disconnection
        );
    }

    #[test]
    fn test_migrate_to_current_is_noop() {
        let f = fixture();
        f.set.migrate(Protocol::Rtmp, &f.dispatcher, TIMEOUT);
        assert!(f.set.current_adapter().flush(TIMEOUT));
        assert!(!f
            .rtmp_engine
            .calls()
            .iter()
            .any(|call| matches!(call, EngineCall::AttachCamera(_))));
    }
}
