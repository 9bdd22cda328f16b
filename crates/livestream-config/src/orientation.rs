//! Device orientation.

use serde::{Deserialize, Serialize};

/// Physical orientation of the capturing device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Orientation {
    /// Returns true for both landscape orientations.
    pub fn is_landscape(self) -> bool {
        matches!(self, Self::LandscapeLeft | Self::LandscapeRight)
    }

    /// Returns a simple string representation of the orientation.
    pub fn name(self) -> &'static str {
        match self {
            Self::Portrait => "Portrait",
            Self::PortraitUpsideDown => "PortraitUpsideDown",
            Self::LandscapeLeft => "LandscapeLeft",
            Self::LandscapeRight => "LandscapeRight",
        }
    }
}
