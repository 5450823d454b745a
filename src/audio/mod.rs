pub mod backend;
pub mod capture;
pub mod clock;
pub mod codec;
pub mod file;
pub mod mixer;
pub mod playback;
pub mod resample;
pub mod speech;

#[cfg(feature = "audio-io")]
pub mod cpal_backend;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, AudioStreamSource, OutputConfig,
    OutputDevice,
};
pub use capture::{CaptureStream, FrameSegmenter, DEFAULT_FRAME_SIZE};
pub use clock::{AudioClock, InputClock, OutputClock};
pub use codec::{WireAudioChunk, INPUT_SAMPLE_RATE, OUTBOUND_MIME_TYPE, OUTPUT_SAMPLE_RATE};
pub use file::{AudioFile, FileDevices, FileMicrophone, NullOutput};
pub use mixer::TimelineMixer;
pub use playback::{PlaybackHandle, PlaybackScheduler};
pub use speech::{
    OnSpeechEnd, PlaybackSynthesizer, SpeechEngine, SpeechSynthesizer, DEFAULT_SPEECH_RATE,
};
