//! Video configuration and default bitrate derivation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolution::{FrameSize, Resolution};
use crate::{ConfigResult, DEFAULT_FPS, DEFAULT_GOP_DURATION_MS};

/// Video encode parameters.
///
/// Values are immutable once built; the `with_*` methods return a new
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Bitrate in bits per second.
    pub bitrate: u32,

    /// Logical resolution, independent of device orientation.
    pub resolution: Resolution,

    /// Frames per second.
    pub fps: f64,

    /// Interval between two key frames.
    pub gop_duration: Duration,
}

impl VideoConfig {
    /// Create a configuration with the default bitrate for `resolution`.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            bitrate: default_bitrate(resolution),
            resolution,
            fps: DEFAULT_FPS,
            gop_duration: Duration::from_millis(DEFAULT_GOP_DURATION_MS),
        }
    }

    /// Create a configuration from explicit pixel dimensions.
    ///
    /// Fails with `InvalidParameter` when the dimensions are not one of the
    /// supported resolutions.
    pub fn from_size(width: u32, height: u32) -> ConfigResult<Self> {
        let resolution = Resolution::from_size(FrameSize::new(width, height))?;
        Ok(Self::new(resolution))
    }

    /// Returns a copy with an explicit bitrate.
    pub fn with_bitrate(&self, bitrate: u32) -> Self {
        Self {
            bitrate,
            ..self.clone()
        }
    }

    /// Returns a copy with a different frame rate.
    pub fn with_fps(&self, fps: f64) -> Self {
        Self { fps, ..self.clone() }
    }

    /// Returns a copy with a different GOP duration.
    pub fn with_gop_duration(&self, gop_duration: Duration) -> Self {
        Self {
            gop_duration,
            ..self.clone()
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self::new(Resolution::default())
    }
}

/// Default bitrate for a resolution, banded by pixel count.
pub fn default_bitrate(resolution: Resolution) -> u32 {
    match resolution.size().pixel_count() {
        0..=102_240 => 800_000,
        102_241..=230_400 => 1_000_000,
        230_401..=409_920 => 1_300_000,
        409_921..=921_600 => 2_000_000,
        _ => 3_500_000,
    }
}
