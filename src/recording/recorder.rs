use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::writer::WavFileWriter;
use crate::audio::mixer::TimelineMixer;
use crate::audio::resample::{resample_mono, AudioResampler};
use crate::audio::{AudioFrame, AudioStreamSource};

/// The finalized conversation recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingArtifact {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub segment_count: usize,
}

/// A piece of audio placed on the recording timeline
#[derive(Debug, Clone)]
pub struct RecordingSegment {
    pub source: AudioStreamSource,
    /// Seconds since the recorder started
    pub offset_secs: f64,
    /// Mono samples at the recorder rate
    pub samples: Vec<f32>,
}

#[derive(Debug, Default)]
struct RecordingBuffer {
    segments: Vec<RecordingSegment>,
    recording: bool,
}

/// Records the whole conversation, both sides mixed
///
/// One recorder lives for the whole user-intended session. Each connection
/// attempt asks for fresh taps; the taps map their device clock onto the
/// recorder timeline using the moment they were created as the epoch, so a
/// reconnect appends to the same recording instead of restarting it.
pub struct SessionRecorder {
    session_id: String,
    output_dir: PathBuf,
    sample_rate: u32,
    buffer: Arc<Mutex<RecordingBuffer>>,
    started_at: Option<Instant>,
    artifact: Option<RecordingArtifact>,
}

impl SessionRecorder {
    pub fn new(session_id: impl Into<String>, output_dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            session_id: session_id.into(),
            output_dir: output_dir.into(),
            sample_rate,
            buffer: Arc::new(Mutex::new(RecordingBuffer::default())),
            started_at: None,
            artifact: None,
        }
    }

    /// Begin accepting segments. Has no effect once started.
    pub fn start(&mut self) {
        if self.started_at.is_some() {
            return;
        }

        self.started_at = Some(Instant::now());
        self.buffer.lock().recording = true;
        info!("Session recording started: {}", self.session_id);
    }

    pub fn is_recording(&self) -> bool {
        self.buffer.lock().recording
    }

    /// Seconds on the recording timeline
    pub fn elapsed_secs(&self) -> f64 {
        self.started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn segment_count(&self) -> usize {
        self.buffer.lock().segments.len()
    }

    /// Tap for the raw microphone signal of the current connection
    pub fn microphone_tap(&self, input_rate: u32) -> Result<MicrophoneTap> {
        let resampler = if input_rate != self.sample_rate {
            Some(AudioResampler::new(input_rate, self.sample_rate)?)
        } else {
            None
        };

        Ok(MicrophoneTap {
            buffer: Arc::clone(&self.buffer),
            epoch: self.elapsed_secs(),
            sample_rate: self.sample_rate,
            resampler,
            cursor: None,
        })
    }

    /// Tap for the scheduled playback of the current connection
    ///
    /// `output_now` is the current reading of the output device clock. The
    /// device may have opened well before the tap is taken, so the tap maps
    /// the clock's zero, not its current reading, onto the recording timeline.
    pub fn playback_tap(&self, output_now: f64) -> PlaybackTap {
        PlaybackTap {
            buffer: Arc::clone(&self.buffer),
            epoch: self.elapsed_secs() - output_now,
            sample_rate: self.sample_rate,
        }
    }

    /// Mix everything recorded so far into one WAV file
    ///
    /// Safe with zero segments (an empty WAV is written). Repeated calls return
    /// the artifact produced by the first one.
    pub fn stop(&mut self) -> Result<RecordingArtifact> {
        if let Some(artifact) = &self.artifact {
            return Ok(artifact.clone());
        }

        let segments = {
            let mut buffer = self.buffer.lock();
            buffer.recording = false;
            std::mem::take(&mut buffer.segments)
        };

        let mut mixer = TimelineMixer::new(self.sample_rate);
        for segment in &segments {
            mixer.add(segment.offset_secs, &segment.samples);
        }
        let duration_secs = mixer.duration_secs();

        fs::create_dir_all(&self.output_dir).context("Failed to create recordings directory")?;
        let path = self.output_dir.join(format!("{}.wav", self.session_id));

        let mut writer = WavFileWriter::create(path, self.sample_rate)?;
        writer.write_samples(&mixer.finish())?;
        let (path, sample_count) = writer.finish()?;

        info!(
            "Session recording saved: {} ({:.1}s, {} segments, {} samples)",
            path.display(),
            duration_secs,
            segments.len(),
            sample_count
        );

        let artifact = RecordingArtifact {
            path,
            sample_rate: self.sample_rate,
            duration_secs,
            segment_count: segments.len(),
        };
        self.artifact = Some(artifact.clone());

        Ok(artifact)
    }

    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.artifact.as_ref()
    }
}

/// Microphone side of the recording mix
///
/// Microphone audio is continuous, so blocks are laid end to end starting at
/// the first block's capture time.
pub struct MicrophoneTap {
    buffer: Arc<Mutex<RecordingBuffer>>,
    epoch: f64,
    sample_rate: u32,
    resampler: Option<AudioResampler>,
    cursor: Option<f64>,
}

impl MicrophoneTap {
    pub fn push(&mut self, frame: &AudioFrame) {
        if !self.buffer.lock().recording {
            return;
        }

        if self.cursor.is_none() {
            self.cursor = Some(self.epoch + frame.timestamp_ms as f64 / 1000.0);
        }

        let samples = frame.mixdown();
        let samples = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&samples) {
                Ok(out) => out,
                Err(e) => {
                    warn!("Dropping microphone block from recording: {:#}", e);
                    return;
                }
            },
            None => samples,
        };

        self.append(samples);
    }

    /// Drain audio still held by the resampler. Call once capture has ended.
    pub fn finish(&mut self) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };

        match resampler.flush() {
            Ok(tail) => self.append(tail),
            Err(e) => warn!("Dropping microphone tail from recording: {:#}", e),
        }
    }

    fn append(&mut self, samples: Vec<f32>) {
        let Some(cursor) = self.cursor else {
            return;
        };
        if samples.is_empty() {
            return;
        }

        self.cursor = Some(cursor + samples.len() as f64 / self.sample_rate as f64);

        let mut buffer = self.buffer.lock();
        if buffer.recording {
            buffer.segments.push(RecordingSegment {
                source: AudioStreamSource::Microphone,
                offset_secs: cursor,
                samples,
            });
        }
    }
}

/// Assistant side of the recording mix
#[derive(Clone)]
pub struct PlaybackTap {
    buffer: Arc<Mutex<RecordingBuffer>>,
    epoch: f64,
    sample_rate: u32,
}

impl PlaybackTap {
    /// Record `frame` at its scheduled start on the output clock
    pub fn push(&self, frame: &AudioFrame, start_time: f64) {
        if !self.buffer.lock().recording {
            return;
        }

        let samples = match resample_mono(&frame.mixdown(), frame.sample_rate, self.sample_rate) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping playback frame from recording: {:#}", e);
                return;
            }
        };

        let mut buffer = self.buffer.lock();
        if buffer.recording {
            buffer.segments.push(RecordingSegment {
                source: AudioStreamSource::Assistant,
                offset_secs: self.epoch + start_time,
                samples,
            });
        }
    }

    /// Drop assistant audio scheduled past `output_time`, which will never play
    pub fn cut(&self, output_time: f64) {
        let cut_at = self.epoch + output_time;
        let rate = self.sample_rate as f64;

        let mut buffer = self.buffer.lock();
        buffer.segments.retain_mut(|segment| {
            if segment.source != AudioStreamSource::Assistant {
                return true;
            }
            let keep = ((cut_at - segment.offset_secs) * rate).round();
            if keep <= 0.0 {
                return false;
            }
            segment.samples.truncate(keep as usize);
            true
        });
    }
}
