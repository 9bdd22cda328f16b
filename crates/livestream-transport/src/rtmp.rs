//! RTMP transport adapter.

use std::sync::Arc;

use tracing::{debug, instrument};

use livestream_config::Orientation;
use livestream_ipc::{EventSink, Protocol};

use crate::adapter::{AdapterCore, StreamTarget, TransportAdapter};
use crate::connection::{RetryPolicies, SessionState};
use crate::engine::{codes, EngineStatus, TransportEngine};
use crate::error::LiveStreamError;
use crate::session::{RetryTier, Session};
use crate::LiveStreamResult;

/// Streams over RTMP: connect to the application URL, then publish the
/// stream key on the open connection.
pub struct RtmpAdapter {
    core: AdapterCore,
}

impl RtmpAdapter {
    /// Create an adapter driving `engine`.
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        sink: EventSink,
        policies: RetryPolicies,
        orientation: Orientation,
    ) -> Self {
        Self {
            core: AdapterCore::new(Protocol::Rtmp, engine, sink, policies, orientation),
        }
    }
}

impl TransportAdapter for RtmpAdapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    #[instrument(name = "rtmp_start", skip(self, stream_key))]
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

        self.core.start(StreamTarget {
            stream_key: stream_key.to_string(),
            connect_url: url.to_string(),
        })
    }
}

/// Drive the RTMP session from one engine status.
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
            match session.stream_key() {
                Some(key) => session.engine().publish(&key),
                None => session.fail(codes::PUBLISH_BAD_NAME.to_string()),
            }
        }
        EngineStatus::PublishStarted if state == SessionState::Connected => {
            if session.transition(
                |state| *state == SessionState::Connected,
                SessionState::Publishing,
            ) {
                session.announce_success();
            }
        }
        EngineStatus::Closed if state.is_connected() => session.connection_lost(),
        EngineStatus::Closed if state == SessionState::Connecting => {
            if !session.schedule_retry(RetryTier::Rejection) {
                session.fail(codes::CONNECT_CLOSED.to_string());
            }
        }
        EngineStatus::Failed { code } if state.is_active() => {
            let retried = state != SessionState::Publishing
                && session.schedule_retry(RetryTier::Rejection);
            if !retried {
                session.fail(code);
            }
        }
        EngineStatus::IoError { message } if state.is_active() => {
            debug!(%message, "Transport I/O error");
            if !session.schedule_retry(RetryTier::IoError) {
                session.fail(codes::IO_RETRIES_EXHAUSTED.to_string());
            }
        }
        status => {
            debug!(?status, state = %state.name(), "Ignoring engine status");
        }
    }
}
