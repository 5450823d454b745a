use thiserror::Error;

/// Errors raised while decoding inbound PCM audio
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(String),

    #[error("audio payload of {len} bytes is not a multiple of {channels} channel(s) x 2 bytes")]
    MisalignedLength { len: usize, channels: u16 },

    #[error("channel count must be greater than zero")]
    NoChannels,
}

/// Failures surfaced by the voice session engine
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone could not be acquired. Terminal for the current attempt.
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// Mid-session transport failure. Retried with the long backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport closed while the session was still intended. Retried with the short backoff.
    #[error("transport closed{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    TransportClosed(Option<String>),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("recording error: {0}")]
    Recording(String),
}

impl SessionError {
    /// Message shown to the user, if this failure is user-facing at all
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            SessionError::Permission(_) => Some("Microphone access required."),
            _ => None,
        }
    }
}
