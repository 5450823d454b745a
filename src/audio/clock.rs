//! Device clocks
//!
//! Capture and playback run on separate device contexts with their own rates
//! and their own notion of time. They are kept as two distinct types so a
//! capture timestamp can never be used to schedule playback by accident.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// A monotonic clock owned by an audio device context
pub trait AudioClock: Send + Sync {
    /// Seconds elapsed on this device since it was opened
    fn now(&self) -> f64;

    /// Native sample rate of the device
    fn sample_rate(&self) -> u32;
}

#[derive(Debug, Clone)]
enum ClockSource {
    /// Advanced by the device as frames are consumed or produced
    Frames(Arc<AtomicU64>),
    /// Follows wall time from the moment the device opened
    Wall(Instant),
}

#[derive(Debug, Clone)]
struct DeviceClock {
    sample_rate: u32,
    source: ClockSource,
}

impl DeviceClock {
    fn frames(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            source: ClockSource::Frames(Arc::new(AtomicU64::new(0))),
        }
    }

    fn wall(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            source: ClockSource::Wall(Instant::now()),
        }
    }

    fn now(&self) -> f64 {
        match &self.source {
            ClockSource::Frames(frames) => {
                frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
            }
            ClockSource::Wall(opened) => opened.elapsed().as_secs_f64(),
        }
    }

    fn advance(&self, frames: u64) {
        if let ClockSource::Frames(counter) = &self.source {
            counter.fetch_add(frames, Ordering::AcqRel);
        }
    }

    fn position_frames(&self) -> u64 {
        match &self.source {
            ClockSource::Frames(frames) => frames.load(Ordering::Acquire),
            ClockSource::Wall(opened) => {
                (opened.elapsed().as_secs_f64() * self.sample_rate as f64) as u64
            }
        }
    }
}

/// Clock of the microphone context (16 kHz by default)
#[derive(Debug, Clone)]
pub struct InputClock(DeviceClock);

impl InputClock {
    /// Clock advanced explicitly as captured frames are delivered
    pub fn new(sample_rate: u32) -> Self {
        Self(DeviceClock::frames(sample_rate))
    }

    /// Record that `frames` more samples were captured
    pub fn advance(&self, frames: u64) {
        self.0.advance(frames);
    }

    /// Current capture position in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.0.position_frames() * 1000 / self.0.sample_rate as u64
    }
}

impl AudioClock for InputClock {
    fn now(&self) -> f64 {
        self.0.now()
    }

    fn sample_rate(&self) -> u32 {
        self.0.sample_rate
    }
}

/// Clock of the playback context (24 kHz by default)
#[derive(Debug, Clone)]
pub struct OutputClock(DeviceClock);

impl OutputClock {
    /// Clock driven by a render callback consuming frames
    pub fn new(sample_rate: u32) -> Self {
        Self(DeviceClock::frames(sample_rate))
    }

    /// Clock following wall time, for devices without a render callback
    pub fn wall(sample_rate: u32) -> Self {
        Self(DeviceClock::wall(sample_rate))
    }

    /// Record that `frames` more samples were rendered
    pub fn advance(&self, frames: u64) {
        self.0.advance(frames);
    }

    /// Current render position in frames
    pub fn position_frames(&self) -> u64 {
        self.0.position_frames()
    }
}

impl AudioClock for OutputClock {
    fn now(&self) -> f64 {
        self.0.now()
    }

    fn sample_rate(&self) -> u32 {
        self.0.sample_rate
    }
}
