//! RTMP and SRT transport adapters.
//!
//! Each adapter wraps one [`TransportEngine`] behind a serialized worker
//! thread, keeps the session state machine, and reports outcomes as
//! [`livestream_ipc::LiveStreamEvent`]s through an event sink.

mod adapter;
mod connection;
mod engine;
mod error;
mod rml;
mod rtmp;
mod session;
mod srt;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use adapter::{AdapterCore, AdapterSettings, StreamTarget, TransportAdapter};
pub use connection::{ReconnectPolicy, RetryPolicies, SessionState};
pub use engine::{
    codes, AudioSettings, DeviceTuning, EngineStatus, TransportEngine, VideoSettings,
};
pub use error::{LiveStreamError, TransportError};
pub use rml::{RmlRtmpEngine, RtmpPacket, TransportStatistics};
pub use rtmp::RtmpAdapter;
pub use srt::{build_srt_url, SrtAdapter, STREAM_ID_PARAM};

/// Channel capacity for outgoing packets.
pub const PACKET_CHANNEL_CAPACITY: usize = 30;

/// Result type for start requests.
pub type LiveStreamResult<T> = Result<T, LiveStreamError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Maximum reconnection attempts after an I/O error.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnect delay in milliseconds.
pub const BASE_RECONNECT_DELAY_MS: u64 = 500;

/// Upper bound of the reconnect delay in milliseconds.
pub const MAX_RECONNECT_DELAY_MS: u64 = 8000;
