//! SRT transport adapter.
//!
//! SRT has no publish handshake of its own: the stream key travels in the
//! `streamid` query parameter and the stream is live as soon as the socket
//! opens.

use std::sync::Arc;

use tracing::{debug, instrument};
use url::Url;

use livestream_config::Orientation;
use livestream_ipc::{EventSink, Protocol};

use crate::adapter::{AdapterCore, StreamTarget, TransportAdapter};
use crate::connection::{RetryPolicies, SessionState};
use crate::engine::{codes, EngineStatus, TransportEngine};
use crate::error::LiveStreamError;
use crate::session::Session;
use crate::LiveStreamResult;

/// Query parameter carrying the stream key.
pub const STREAM_ID_PARAM: &str = "streamid";

/// Append the stream key to an `srt://` URL, keeping any existing query.
pub fn build_srt_url(url: &str, stream_key: &str) -> LiveStreamResult<String> {
    let mut parsed = Url::parse(url)
        .map_err(|e| LiveStreamError::IllegalArgument(format!("Invalid URL '{}': {}", url, e)))?;

    if parsed.scheme() != Protocol::Srt.scheme() {
        return Err(LiveStreamError::IllegalArgument(format!(
            "Not an SRT URL: {}",
            url
        )));
    }

    parsed
        .query_pairs_mut()
        .append_pair(STREAM_ID_PARAM, stream_key);

    Ok(parsed.into())
}

/// Streams over SRT.
pub struct SrtAdapter {
    core: AdapterCore,
}

impl SrtAdapter {
    /// Create an adapter driving `engine`.
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        sink: EventSink,
        policies: RetryPolicies,
        orientation: Orientation,
    ) -> Self {
        Self {
            core: AdapterCore::new(Protocol::Srt, engine, sink, policies, orientation),
        }
    }
}

impl TransportAdapter for SrtAdapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    #[instrument(name = "srt_start", skip(self, stream_key))]
    fn start_streaming(&self, stream_key: &str, url: &str) -> LiveStreamResult<()> {
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

        let connect_url = build_srt_url(url, stream_key)?;
        self.core.start(StreamTarget {
            stream_key: stream_key.to_string(),
            connect_url,
        })
    }
}

/// Drive the SRT session from one engine status. SRT never retries.
pub(crate) fn handle_status(session: &mut Session, status: EngineStatus) {
    let state = session.state();

    match status {
        EngineStatus::Connected if state == SessionState::Connecting => {
            if !session.transition(
                |state| *state == SessionState::Connecting,
                SessionState::Connected,
            ) {
                return;
            }
            session.engine().publish("");
            if session.transition(
                |state| *state == SessionState::Connected,
                SessionState::Publishing,
            ) {
                session.announce_success();
            }
        }
        EngineStatus::Closed if state.is_connected() => session.connection_lost(),
        EngineStatus::Closed if state == SessionState::Connecting => {
            session.fail(codes::CONNECT_CLOSED.to_string());
        }
        EngineStatus::Failed { code } if state.is_active() => session.fail(code),
        EngineStatus::IoError { message } if state.is_active() => session.fail(message),
        status => {
            debug!(?status, state = %state.name(), "Ignoring engine status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use livestream_config::{AudioConfig, VideoConfig};
    use livestream_ipc::{EventDispatcher, LiveStreamEvent};

    use crate::testing::{EngineCall, MockEngine};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn setup() -> (SrtAdapter, Arc<MockEngine>, Receiver<LiveStreamEvent>) {
        let engine = Arc::new(MockEngine::new("mock-srt"));
        let dispatcher = Arc::new(EventDispatcher::new(Protocol::Srt));
        let events = dispatcher.subscribe();
        let adapter = SrtAdapter::new(
            engine.clone(),
            dispatcher.sink(Protocol::Srt),
            RetryPolicies::default(),
            Orientation::Portrait,
        );
        adapter.apply_audio_config(AudioConfig::default());
        adapter.apply_video_config(VideoConfig::default());
        (adapter, engine, events)
    }

    #[test]
    fn test_build_srt_url() {
        assert_eq!(
            build_srt_url("srt://host:1234", "key1").unwrap(),
            "srt://host:1234?streamid=key1"
        );
        assert_eq!(
            build_srt_url("srt://host:1234?latency=200", "key1").unwrap(),
            "srt://host:1234?latency=200&streamid=key1"
        );
    }

    #[test]
    fn test_build_srt_url_rejects_other_schemes() {
        assert!(matches!(
            build_srt_url("rtmp://host/app", "key1"),
            Err(LiveStreamError::IllegalArgument(_))
        ));
        assert!(matches!(
            build_srt_url("not a url", "key1"),
            Err(LiveStreamError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_open_goes_live_immediately() {
        let (adapter, engine, events) = setup();

        adapter.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(adapter.flush(TIMEOUT));
        assert_eq!(
            engine.connect_urls(),
            vec!["srt://host:1234?streamid=key1".to_string()]
        );

        engine.emit(EngineStatus::Connected);
        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );
        assert_eq!(adapter.state(), SessionState::Publishing);
        assert!(engine.calls().contains(&EngineCall::Publish(String::new())));
    }

    #[test]
    fn test_open_failure_does_not_retry() {
        let (adapter, engine, events) = setup();

        adapter.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(adapter.flush(TIMEOUT));
        engine.emit(EngineStatus::IoError {
            message: "Connection setup failure: connection timed out".to_string(),
        });

        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionFailed {
                code: "Connection setup failure: connection timed out".to_string()
            }
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.connect_urls().len(), 1);
        assert!(adapter.state().is_failed());
    }

    #[test]
    fn test_connection_drop_fires_disconnection() {
        let (adapter, engine, events) = setup();

        adapter.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(adapter.flush(TIMEOUT));
        engine.emit(EngineStatus::Connected);
        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );

        engine.emit(EngineStatus::Closed);
        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::Disconnection
        );
        assert_eq!(adapter.state(), SessionState::Idle);
    }

    #[test]
    fn test_open_of_cancelled_attempt_is_ignored() {
        let (adapter, engine, events) = setup();
        adapter.start_streaming("key1", "srt://host:1234").unwrap();
        assert!(adapter.flush(TIMEOUT));

        engine.pause();
        adapter.core().set_muted(true);
        assert!(MockEngine::wait_for(TIMEOUT, || engine.is_blocked()));

        engine.emit(EngineStatus::Connected);
        adapter.stop_streaming();
        adapter.start_streaming("key2", "srt://host:1234").unwrap();
        engine.resume();
        assert!(adapter.flush(TIMEOUT));

        assert!(events.try_recv().is_err());
        assert_eq!(adapter.state(), SessionState::Connecting);
        assert_eq!(
            engine.connect_urls().last().unwrap(),
            "srt://host:1234?streamid=key2"
        );

        engine.emit(EngineStatus::Connected);
        assert_eq!(
            events.recv_timeout(TIMEOUT).unwrap(),
            LiveStreamEvent::ConnectionSuccess
        );
    }

    #[test]
    fn test_invalid_url_is_rejected_synchronously() {
        let (adapter, engine, _events) = setup();

        assert!(matches!(
            adapter.start_streaming("key1", "rtmp://host/app"),
            Err(LiveStreamError::IllegalArgument(_))
        ));
        assert_eq!(adapter.state(), SessionState::Idle);
        assert!(adapter.flush(TIMEOUT));
        assert!(engine.connect_urls().is_empty());
    }
}
