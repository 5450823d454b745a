use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::state::SessionState;
use super::transcript::ConversationMessage;
use crate::recording::RecordingArtifact;

/// Everything observable about a session, published by the session loop
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub state: SessionState,
    pub is_speaking: bool,
    pub user_partial: String,
    pub assistant_partial: String,
    pub messages: Vec<ConversationMessage>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set while the session is `Active`
    pub active_since: Option<Instant>,
    pub recording: Option<RecordingArtifact>,
    /// User-facing description of the last failure
    pub error: Option<String>,
    pub reconnect_count: u32,
    /// A reconnect is scheduled after a lost connection
    pub reconnecting: bool,
}

impl SessionSnapshot {
    /// The user's session is connecting, active, or waiting to reconnect
    pub fn is_running(&self) -> bool {
        self.state.is_live() || self.reconnecting
    }

    /// Whole seconds spent in the current `Active` stretch. Zero otherwise.
    pub fn elapsed_secs(&self) -> u64 {
        self.active_since
            .map(|since| since.elapsed().as_secs())
            .unwrap_or(0)
    }
}

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Option<String>,

    pub state: SessionState,

    /// Whether assistant audio is playing
    pub is_speaking: bool,

    /// Uncommitted farmer transcription
    pub user_transcription: String,

    /// Uncommitted assistant transcription
    pub assistant_transcription: String,

    pub message_count: usize,

    /// When the user started the session
    pub started_at: Option<DateTime<Utc>>,

    pub elapsed_secs: u64,

    pub reconnect_count: u32,

    /// Waiting out the backoff before the next reconnect
    pub reconnecting: bool,

    pub error: Option<String>,

    /// Present once the session has been stopped
    pub recording: Option<RecordingArtifact>,
}

impl From<&SessionSnapshot> for SessionStats {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            state: snapshot.state,
            is_speaking: snapshot.is_speaking,
            user_transcription: snapshot.user_partial.clone(),
            assistant_transcription: snapshot.assistant_partial.clone(),
            message_count: snapshot.messages.len(),
            started_at: snapshot.started_at,
            elapsed_secs: snapshot.elapsed_secs(),
            reconnect_count: snapshot.reconnect_count,
            reconnecting: snapshot.reconnecting,
            error: snapshot.error.clone(),
            recording: snapshot.recording.clone(),
        }
    }
}

/// Request body for starting a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub profile: Option<super::persona::FarmerProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_only_counts_while_active() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.elapsed_secs(), 0);

        snapshot.state = SessionState::Active;
        snapshot.active_since = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(3)).await;

        let stats = SessionStats::from(&snapshot);
        assert_eq!(stats.elapsed_secs, 3);
    }

    #[test]
    fn test_running_includes_pending_reconnect() {
        let mut snapshot = SessionSnapshot {
            state: SessionState::Errored,
            ..Default::default()
        };
        assert!(!snapshot.is_running());

        snapshot.reconnecting = true;
        assert!(snapshot.is_running());
        assert!(SessionStats::from(&snapshot).reconnecting);
    }
}
