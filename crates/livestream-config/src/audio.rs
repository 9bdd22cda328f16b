//! Audio configuration.

use serde::{Deserialize, Serialize};

use crate::DEFAULT_AUDIO_BITRATE;

/// Audio encode parameters.
///
/// Sample rate and channel count belong to the engine's audio source and
/// are not part of this configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Bitrate in bits per second.
    pub bitrate: u32,
}

impl AudioConfig {
    /// Create an audio configuration with the given bitrate.
    pub fn new(bitrate: u32) -> Self {
        Self { bitrate }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_BITRATE)
    }
}
