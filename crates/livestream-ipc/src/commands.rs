//! Signals sent from the host platform to the controller.

use serde::{Deserialize, Serialize};

use livestream_config::Orientation;

/// Platform events the host forwards to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostSignal {
    /// The device orientation changed.
    OrientationChanged(Orientation),

    /// The application moved to the background.
    EnteredBackground,

    /// The application returned to the foreground.
    EnteredForeground,

    /// Stop ingesting signals.
    Shutdown,
}
