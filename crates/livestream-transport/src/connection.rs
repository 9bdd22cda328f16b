//! Session state and retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY_MS};

/// Connection state of one transport adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not streaming.
    #[default]
    Idle,

    /// Connect requested, waiting for the engine.
    Connecting,

    /// Connected, publish not yet confirmed.
    Connected,

    /// Connected and publishing.
    Publishing,

    /// Close requested, waiting for the engine.
    Disconnecting,

    /// The last attempt failed.
    Failed { reason: String },
}

impl SessionState {
    /// Returns true in the Idle state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true once the engine reported a connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Publishing)
    }

    /// Returns true while an attempt is pending or established.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Publishing)
    }

    /// Returns true if the last attempt failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Publishing => "Publishing",
            Self::Disconnecting => "Disconnecting",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Reconnection policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts.
    pub max_attempts: u32,

    /// Base delay between attempts (exponential backoff applied).
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RECONNECT_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// Check if more attempts are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// The two recovery tiers of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicies {
    /// Reconnects after a transport I/O error, handled inside the RTMP
    /// adapter against the same URL.
    pub io_error: ReconnectPolicy,

    /// Reconnects after the server rejected the connection. Owned by the
    /// controller; disabled by default so rejections surface as
    /// `ConnectionFailed`.
    pub rejection: ReconnectPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            io_error: ReconnectPolicy::default(),
            rejection: ReconnectPolicy::disabled(),
        }
    }
}
