//! Supported resolutions and pixel dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::orientation::Orientation;
use crate::ConfigResult;

/// A pixel-dimension pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Create a new frame size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns the size with the longer side as width.
    pub fn normalized(self) -> Self {
        Self {
            width: self.width.max(self.height),
            height: self.width.min(self.height),
        }
    }

    /// Returns the size ordered for the given orientation: landscape puts
    /// the longer side first, portrait the shorter.
    pub fn oriented(self, orientation: Orientation) -> Self {
        let wide = self.normalized();
        if orientation.is_landscape() {
            wide
        } else {
            Self::new(wide.height, wide.width)
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolution tags of the 16:9 (`Wide*`) and 4:3 (`Standard*`) families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// 426x240.
    Wide240p,
    /// 640x360, nHD.
    Wide360p,
    /// 854x480, FWVGA.
    Wide480p,
    /// 1280x720, WXGA.
    Wide720p,
    /// 1920x1080, FHD.
    Wide1080p,
    /// 320x240, QVGA.
    Standard240p,
    /// 640x480, VGA.
    Standard480p,
    /// 800x600, SVGA.
    Standard600p,
    /// 1024x768, XGA.
    Standard768p,
    /// 1440x1080.
    Standard1080p,
}

impl Resolution {
    /// Every supported resolution.
    pub const ALL: [Resolution; 10] = [
        Self::Wide240p,
        Self::Wide360p,
        Self::Wide480p,
        Self::Wide720p,
        Self::Wide1080p,
        Self::Standard240p,
        Self::Standard480p,
        Self::Standard600p,
        Self::Standard768p,
        Self::Standard1080p,
    ];

    /// Pixel dimensions in landscape order.
    pub const fn size(self) -> FrameSize {
        match self {
            Self::Wide240p => FrameSize::new(426, 240),
            Self::Wide360p => FrameSize::new(640, 360),
            Self::Wide480p => FrameSize::new(854, 480),
            Self::Wide720p => FrameSize::new(1280, 720),
            Self::Wide1080p => FrameSize::new(1920, 1080),
            Self::Standard240p => FrameSize::new(320, 240),
            Self::Standard480p => FrameSize::new(640, 480),
            Self::Standard600p => FrameSize::new(800, 600),
            Self::Standard768p => FrameSize::new(1024, 768),
            Self::Standard1080p => FrameSize::new(1440, 1080),
        }
    }

    /// Look up the resolution for a pixel-dimension pair in either
    /// orientation.
    pub fn from_size(size: FrameSize) -> ConfigResult<Self> {
        let wide = size.normalized();
        Self::ALL
            .into_iter()
            .find(|resolution| resolution.size() == wide)
            .ok_or_else(|| ConfigError::InvalidParameter(format!("Unsupported resolution {size}")))
    }

    /// Returns the display name for this resolution.
    pub fn name(self) -> &'static str {
        match self {
            Self::Wide240p => "240p (16:9)",
            Self::Wide360p => "360p (16:9)",
            Self::Wide480p => "480p (16:9)",
            Self::Wide720p => "720p (16:9)",
            Self::Wide1080p => "1080p (16:9)",
            Self::Standard240p => "240p (4:3)",
            Self::Standard480p => "480p (4:3)",
            Self::Standard600p => "600p (4:3)",
            Self::Standard768p => "768p (4:3)",
            Self::Standard1080p => "1080p (4:3)",
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Wide720p
    }
}

impl TryFrom<FrameSize> for Resolution {
    type Error = ConfigError;

    fn try_from(size: FrameSize) -> ConfigResult<Self> {
        Self::from_size(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_in_both_orientations() {
        for resolution in Resolution::ALL {
            let size = resolution.size();
            let portrait = FrameSize::new(size.height, size.width);

            assert_eq!(Resolution::from_size(size).unwrap(), resolution);
            assert_eq!(Resolution::from_size(portrait).unwrap().size(), portrait.normalized());
        }
    }

    #[test]
    fn test_sizes_are_distinct() {
        for (i, a) in Resolution::ALL.iter().enumerate() {
            for b in &Resolution::ALL[i + 1..] {
                assert_ne!(a.size(), b.size(), "{} and {} share a size", a.name(), b.name());
            }
        }
    }

    #[test]
    fn test_unsupported_size_is_rejected() {
        for size in [
            FrameSize::new(480, 272),
            FrameSize::new(1280, 721),
            FrameSize::new(0, 0),
            FrameSize::new(3840, 2160),
        ] {
            assert!(matches!(
                Resolution::from_size(size),
                Err(ConfigError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_oriented_size() {
        let size = Resolution::Wide720p.size();

        assert_eq!(size.oriented(Orientation::LandscapeLeft), FrameSize::new(1280, 720));
        assert_eq!(size.oriented(Orientation::Portrait), FrameSize::new(720, 1280));
        assert_eq!(
            FrameSize::new(720, 1280).oriented(Orientation::LandscapeRight),
            FrameSize::new(1280, 720)
        );
    }
}
