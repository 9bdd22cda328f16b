//! Audio/video capture configuration.
//!
//! This crate provides the immutable configuration values applied to a
//! live stream: audio and video encode parameters, the supported
//! resolution set and the default bitrate derivation.

mod audio;
mod error;
mod orientation;
mod resolution;
mod video;

pub use audio::AudioConfig;
pub use error::ConfigError;
pub use orientation::Orientation;
pub use resolution::{FrameSize, Resolution};
pub use video::{default_bitrate, VideoConfig};

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default audio bitrate in bits per second.
pub const DEFAULT_AUDIO_BITRATE: u32 = 128_000;

/// Default video frame rate.
pub const DEFAULT_FPS: f64 = 30.0;

/// Default GOP duration in milliseconds.
pub const DEFAULT_GOP_DURATION_MS: u64 = 1000;
