use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SessionError;

/// Lifecycle of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    Errored,
}

impl SessionState {
    /// A connection attempt is in flight or open
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

/// How long to wait before reconnecting after each kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// After a transport error
    pub error_backoff: Duration,
    /// After the remote side closed the connection
    pub close_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_millis(1500),
            close_backoff: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    /// Backoff for `error`, or `None` when it must not be retried
    pub fn delay_for(&self, error: &SessionError) -> Option<Duration> {
        match error {
            SessionError::Transport(_) => Some(self.error_backoff),
            SessionError::TransportClosed(_) => Some(self.close_backoff),
            SessionError::Permission(_)
            | SessionError::Device(_)
            | SessionError::Decode(_)
            | SessionError::Recording(_) => None,
        }
    }
}
