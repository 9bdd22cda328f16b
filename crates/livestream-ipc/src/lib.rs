//! Typed host<->controller messages for the live stream controller.
//!
//! This crate defines the delegate events reported to the caller, the
//! platform signals the host feeds in, and the capture device handles
//! shared by the controller and its transport adapters.

mod commands;
mod dispatch;
mod error;
mod events;
mod types;

pub use commands::HostSignal;
pub use dispatch::{EventDispatcher, EventSink};
pub use error::CaptureError;
pub use events::{LiveStreamDelegate, LiveStreamEvent};
pub use types::{CameraDevice, CameraPosition, Microphone, PreviewSurface, Protocol};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for host signals (Host → Controller).
pub const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (Controller → Host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded host signal channel.
pub fn signal_channel() -> (Sender<HostSignal>, Receiver<HostSignal>) {
    crossbeam_channel::bounded(SIGNAL_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<LiveStreamEvent>, Receiver<LiveStreamEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
