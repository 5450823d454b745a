//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Microphone capture streamed to the live speech service
//! - Gapless playback of the assistant's audio replies
//! - Turn-based transcript collection
//! - Recording of the whole conversation across reconnects
//! - Lifecycle state, including automatic reconnects while the user wants
//!   the session running

mod config;
mod persona;
mod session;
mod state;
mod stats;
mod transcript;

pub use config::{PartialPolicy, SessionConfig};
pub use persona::{FarmerProfile, Language, PersonaTemplate};
pub use session::VoiceSession;
pub use state::{RetryPolicy, SessionState};
pub use stats::{SessionSnapshot, SessionStats, StartRequest};
pub use transcript::{ConversationMessage, Role, TranscriptAggregator};
