//! Headless devices: a WAV file stands in for the microphone and playback goes
//! to a null sink that keeps time with the wall clock.

use anyhow::{Context, Result};
use hound::WavReader;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, AudioStreamSource, OutputConfig,
    OutputDevice,
};
use super::clock::{AudioClock, InputClock, OutputClock};
use super::resample::resample_mono;
use crate::error::SessionError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples normalized to [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix to mono and resample to `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>> {
        let channels = self.channels.max(1) as usize;
        let mono: Vec<f32> = self
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        resample_mono(&mono, self.sample_rate, target_rate)
    }
}

/// Replays a WAV file as if it were a live microphone
///
/// Blocks are paced at real time. Once the file is exhausted the stream keeps
/// delivering silence, like an open microphone in a quiet room.
pub struct FileMicrophone {
    config: AudioBackendConfig,
    samples: Arc<Vec<f32>>,
    clock: InputClock,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileMicrophone {
    pub fn new(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;
        let samples = file.to_mono(config.target_sample_rate)?;

        Ok(Self {
            clock: InputClock::new(config.target_sample_rate),
            config,
            samples: Arc::new(samples),
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }

    pub fn clock(&self) -> &InputClock {
        &self.clock
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(32);
        let block_size = self.config.block_size.max(1);
        let rate = self.config.target_sample_rate;
        let samples = Arc::clone(&self.samples);
        let clock = self.clock.clone();
        let capturing = Arc::clone(&self.capturing);

        capturing.store(true, Ordering::SeqCst);

        let period = Duration::from_secs_f64(block_size as f64 / rate as f64);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut offset = 0usize;

            while capturing.load(Ordering::SeqCst) {
                ticker.tick().await;

                let mut block = vec![0.0f32; block_size];
                if offset < samples.len() {
                    let end = (offset + block_size).min(samples.len());
                    block[..end - offset].copy_from_slice(&samples[offset..end]);
                }
                offset += block_size;

                let mut frame = AudioFrame::mono(block, rate, AudioStreamSource::Microphone);
                frame.timestamp_ms = clock.now_ms();
                clock.advance(block_size as u64);

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            debug!("File microphone stopped");
        }));

        info!("File microphone started ({} Hz, {} samples per block)", rate, block_size);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file microphone"
    }
}

/// Playback sink that discards audio but keeps accurate time
///
/// Completion is reported when a frame's scheduled end passes on the wall clock.
pub struct NullOutput {
    clock: OutputClock,
    completions: mpsc::UnboundedSender<u64>,
    timers: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    closed: bool,
}

impl NullOutput {
    pub fn new(config: &OutputConfig, completions: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            clock: OutputClock::wall(config.sample_rate),
            completions,
            timers: Arc::new(Mutex::new(HashMap::new())),
            closed: false,
        }
    }
}

impl OutputDevice for NullOutput {
    fn clock(&self) -> &OutputClock {
        &self.clock
    }

    fn schedule(&self, handle_id: u64, frame: &AudioFrame, start_time: f64) -> Result<()> {
        if self.closed {
            anyhow::bail!("Output device is closed");
        }

        let end = start_time + frame.duration_secs();
        let wait = Duration::from_secs_f64((end - self.clock.now()).max(0.0));
        let completions = self.completions.clone();
        let timers = Arc::clone(&self.timers);

        // Held until the timer is registered, so it cannot complete first
        let mut pending = self.timers.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            timers.lock().remove(&handle_id);
            let _ = completions.send(handle_id);
        });
        pending.insert(handle_id, timer);

        Ok(())
    }

    fn stop(&self, handle_id: u64) {
        if let Some(timer) = self.timers.lock().remove(&handle_id) {
            timer.abort();
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            anyhow::bail!("Output device already closed");
        }
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "null output"
    }
}

/// Device provider backed by a WAV file and a null sink
pub struct FileDevices {
    input_path: PathBuf,
}

impl FileDevices {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
        }
    }
}

#[async_trait::async_trait]
impl AudioDevices for FileDevices {
    async fn open_microphone(
        &self,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, SessionError> {
        let mic = FileMicrophone::new(&self.input_path, config.clone()).map_err(|e| {
            warn!("Microphone file unavailable: {:#}", e);
            SessionError::Permission(format!("{:#}", e))
        })?;
        Ok(Box::new(mic))
    }

    async fn open_output(
        &self,
        config: &OutputConfig,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputDevice>, SessionError> {
        Ok(Box::new(NullOutput::new(config, completions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, samples: &[i16], rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_audio_file_normalizes_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mic.wav");
        write_wav(&path, &[16384, -16384], 16000);

        let file = AudioFile::open(&path).unwrap();
        assert_eq!(file.samples, vec![0.5, -0.5]);
        assert_eq!(file.to_mono(16000).unwrap(), vec![0.5, -0.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_microphone_pads_with_silence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mic.wav");
        write_wav(&path, &[8192; 6], 16000);

        let config = AudioBackendConfig {
            block_size: 4,
            ..Default::default()
        };
        let mut mic = FileMicrophone::new(&path, config).unwrap();
        let mut rx = mic.start().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();

        assert_eq!(first.channels[0], vec![0.25; 4]);
        assert_eq!(second.channels[0], vec![0.25, 0.25, 0.0, 0.0]);
        assert_eq!(third.channels[0], vec![0.0; 4]);
        assert!(mic.is_capturing());

        mic.stop().await.unwrap();
        assert!(!mic.is_capturing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_output_reports_completion_at_scheduled_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = NullOutput::new(&OutputConfig::default(), tx);

        let frame = AudioFrame::mono(vec![0.0; 12000], 24000, AudioStreamSource::Assistant);
        output.schedule(1, &frame, 0.0).unwrap();
        output.schedule(2, &frame, 0.5).unwrap();
        output.stop(2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_null_output_forgets_finished_handles() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = NullOutput::new(&OutputConfig::default(), tx);

        let empty = AudioFrame::mono(Vec::new(), 24000, AudioStreamSource::Assistant);
        for id in 0..50 {
            output.schedule(id, &empty, 0.0).unwrap();
        }
        for _ in 0..50 {
            rx.recv().await.unwrap();
        }

        assert!(output.timers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_permission_error() {
        let devices = FileDevices::new("/nonexistent/mic.wav");
        let result = devices.open_microphone(&AudioBackendConfig::default()).await;
        assert!(matches!(result, Err(SessionError::Permission(_))));
    }
}
