use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::persona::{FarmerProfile, PersonaTemplate};
use super::state::RetryPolicy;
use crate::audio::{DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

/// What happens to uncommitted transcription when a connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialPolicy {
    /// Throw the partial text away
    #[default]
    Discard,
    /// Commit whatever was heard as messages
    Flush,
}

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Live model identifier
    pub model: String,

    /// Prebuilt voice of the assistant
    pub voice_name: String,

    /// Samples per outbound microphone frame
    pub frame_size: usize,

    /// Microphone rate sent to the service
    pub input_sample_rate: u32,

    /// Rate of assistant audio, also used for the recording
    pub output_sample_rate: u32,

    /// Where finished recordings are written
    pub recordings_dir: PathBuf,

    pub retry: RetryPolicy,

    pub partial_policy: PartialPolicy,

    /// Drop empty-text messages at turn boundaries
    pub skip_empty_turns: bool,

    /// Profile used when `start` is called without one
    pub profile: FarmerProfile,

    pub persona: PersonaTemplate,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice_name: "Puck".to_string(),
            frame_size: DEFAULT_FRAME_SIZE,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            recordings_dir: PathBuf::from("recordings"),
            retry: RetryPolicy::default(),
            partial_policy: PartialPolicy::Discard,
            skip_empty_turns: false,
            profile: FarmerProfile::default(),
            persona: PersonaTemplate::default(),
        }
    }
}
