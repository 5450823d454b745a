pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod recording;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFile, AudioFrame, AudioStreamSource,
    CaptureStream, FileDevices, OutputDevice, PlaybackHandle, PlaybackScheduler,
    PlaybackSynthesizer, SpeechEngine, SpeechSynthesizer, WireAudioChunk,
};
pub use config::Config;
pub use error::{DecodeError, SessionError};
pub use http::{create_router, AppState};
pub use recording::{RecordingArtifact, SessionRecorder};
pub use session::{
    ConversationMessage, FarmerProfile, Language, PersonaTemplate, Role, SessionConfig,
    SessionState, SessionStats, TranscriptAggregator, VoiceSession,
};
pub use transport::{LiveClient, LiveConfig, LiveConnection, SpeechTransport, TransportEvent};
