use anyhow::Result;
use tokio::sync::mpsc;

use super::clock::OutputClock;
use super::codec::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::SessionError;

/// Which side of the conversation produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStreamSource {
    /// Farmer speaking into the microphone
    Microphone,
    /// Synthesized speech from the remote service
    Assistant,
}

/// Normalized audio samples, planar by channel
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// One sample vector per channel, values in [-1, 1]
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Stream source (microphone or assistant)
    pub source: AudioStreamSource,
    /// Position on the producing device clock, in milliseconds
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn mono(samples: Vec<f32>, sample_rate: u32, source: AudioStreamSource) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
            source,
            timestamp_ms: 0,
        }
    }

    /// Frames per channel
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one
    pub fn mixdown(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.len())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Configuration for the microphone backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture rate delivered to the session (resampled if the device differs)
    pub target_sample_rate: u32,
    /// Capture channel count (the session only uses mono)
    pub target_channels: u16,
    /// Samples per delivered block
    pub block_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: INPUT_SAMPLE_RATE,
            target_channels: 1,
            block_size: 4096,
        }
    }
}

/// Configuration for the playback device
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Microphone capture backend
///
/// Implementations:
/// - cpal: default input device (feature `audio-io`)
/// - File: replay a WAV file in real time (headless runs, testing)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive mono frames at the target rate
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Scheduled playback output
///
/// The device plays each scheduled frame at its start time on the output clock
/// and reports the handle id on the completion channel once it has finished.
/// Stopped handles are never reported.
pub trait OutputDevice: Send + Sync {
    /// Clock of this output context
    fn clock(&self) -> &OutputClock;

    /// Schedule a frame to begin at `start_time` seconds on the output clock
    fn schedule(&self, handle_id: u64, frame: &AudioFrame, start_time: f64) -> Result<()>;

    /// Force-stop a scheduled or playing frame
    fn stop(&self, handle_id: u64);

    /// Release the device
    fn close(&mut self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Opens the device contexts a session needs
///
/// Only the session lifecycle calls this; every other component receives the
/// handles it produces.
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone. Denial is reported as `SessionError::Permission`.
    async fn open_microphone(
        &self,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, SessionError>;

    /// Open a playback context reporting finished handles on `completions`
    async fn open_output(
        &self,
        config: &OutputConfig,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputDevice>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_and_len() {
        let frame = AudioFrame::mono(vec![0.0; 12000], 24000, AudioStreamSource::Assistant);
        assert_eq!(frame.len(), 12000);
        assert_eq!(frame.channel_count(), 1);
        assert_eq!(frame.duration_secs(), 0.5);
    }

    #[test]
    fn test_mixdown_averages_channels() {
        let frame = AudioFrame {
            channels: vec![vec![0.5, 1.0], vec![-0.5, 0.0]],
            sample_rate: 24000,
            source: AudioStreamSource::Assistant,
            timestamp_ms: 0,
        };
        assert_eq!(frame.mixdown(), vec![0.0, 0.5]);
    }

    #[test]
    fn test_backend_config_default() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.target_sample_rate, 16000);
        assert_eq!(config.target_channels, 1);
        assert_eq!(config.block_size, 4096);
    }
}
