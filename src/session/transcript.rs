use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One committed utterance. Never changes once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, text: String) -> Self {
        let prefix = match role {
            Role::User => "u",
            Role::Assistant => "a",
        };

        Self {
            id: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            role,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// Accumulates streaming transcription for both sides until a turn completes
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user: String,
    assistant: String,
    skip_empty: bool,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop empty-text messages on commit instead of emitting them
    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    pub fn append_partial(&mut self, role: Role, delta: &str) {
        match role {
            Role::User => self.user.push_str(delta),
            Role::Assistant => self.assistant.push_str(delta),
        }
    }

    /// Current uncommitted text for `role`
    pub fn partial(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }

    /// Close the turn: user message first, then the assistant reply
    pub fn commit_turn(&mut self) -> Vec<ConversationMessage> {
        let user = std::mem::take(&mut self.user);
        let assistant = std::mem::take(&mut self.assistant);

        [(Role::User, user), (Role::Assistant, assistant)]
            .into_iter()
            .filter(|(_, text)| !(self.skip_empty && text.is_empty()))
            .map(|(role, text)| ConversationMessage::new(role, text))
            .collect()
    }

    /// Commit only the sides that have text, for a best-effort flush on a drop
    pub fn flush(&mut self) -> Vec<ConversationMessage> {
        let user = std::mem::take(&mut self.user);
        let assistant = std::mem::take(&mut self.assistant);

        [(Role::User, user), (Role::Assistant, assistant)]
            .into_iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(role, text)| ConversationMessage::new(role, text))
            .collect()
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.assistant.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.assistant.is_empty()
    }
}
