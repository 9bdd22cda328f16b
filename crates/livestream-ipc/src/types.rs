//! Common types shared by the controller and the transport adapters.

use serde::{Deserialize, Serialize};

/// Wire transport used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Rtmp,
    Srt,
}

impl Protocol {
    /// Map a URL scheme to a protocol.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "rtmp" => Some(Self::Rtmp),
            "srt" => Some(Self::Srt),
            _ => None,
        }
    }

    /// URL scheme for this protocol.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Rtmp => "rtmp",
            Self::Srt => "srt",
        }
    }
}

/// Side of the device a camera faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraPosition {
    Front,
    Back,
    #[default]
    Unspecified,
}

/// A camera known to the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Platform identifier.
    pub id: String,

    /// Side of the device the camera faces.
    pub position: CameraPosition,

    /// Upper bound (exclusive) for the zoom ratio.
    pub max_zoom: f32,
}

impl CameraDevice {
    /// Create a camera handle.
    pub fn new(id: impl Into<String>, position: CameraPosition) -> Self {
        Self {
            id: id.into(),
            position,
            max_zoom: 1.0,
        }
    }

    /// Returns the camera with a zoom upper bound.
    pub fn with_max_zoom(mut self, max_zoom: f32) -> Self {
        self.max_zoom = max_zoom;
        self
    }

    /// Front cameras are mirrored so the preview behaves like a mirror.
    pub fn is_mirrored(&self) -> bool {
        self.position == CameraPosition::Front
    }
}

/// A microphone known to the host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Microphone {
    /// Platform identifier.
    pub id: String,
}

impl Microphone {
    /// Create a microphone handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new("default")
    }
}

/// An opaque preview surface owned by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSurface {
    /// Host identifier of the surface.
    pub id: String,
}

impl PreviewSurface {
    /// Create a preview handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}
