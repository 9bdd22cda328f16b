//! Session controller for the live stream client.
//!
//! [`LiveStream`] owns one RTMP and one SRT adapter, picks the adapter
//! from the URL scheme of each start request, moves the capture devices
//! when the transport changes and forwards the current adapter's events.

mod lifecycle;
mod options;
mod orchestrator;
mod state;

pub use lifecycle::LifecycleGlue;
pub use options::{LiveStreamOptions, DEFAULT_FLUSH_TIMEOUT};
pub use orchestrator::{LiveStream, DEFAULT_RTMP_URL};
pub use state::AdapterSet;

use std::sync::Arc;

use livestream_transport::TransportEngine;

/// Create a controller with default options.
pub fn create_live_stream(
    rtmp_engine: Arc<dyn TransportEngine>,
    srt_engine: Arc<dyn TransportEngine>,
) -> LiveStream {
    LiveStream::new(rtmp_engine, srt_engine, LiveStreamOptions::default())
}
