//! Conversation recording
//!
//! The recorder listens to both sides of the conversation through taps and
//! writes a single mixed WAV when the user ends the session.

mod recorder;
mod writer;

pub use recorder::{MicrophoneTap, PlaybackTap, RecordingArtifact, RecordingSegment, SessionRecorder};
pub use writer::WavFileWriter;
