use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::backend::{AudioFrame, OutputDevice};
use super::clock::AudioClock;
use crate::recording::PlaybackTap;

/// One scheduled output buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: u64,
    /// Start time on the output clock, in seconds
    pub start_time: f64,
    /// Length of the buffer in seconds
    pub duration: f64,
}

/// Gapless, ordered playback of inbound assistant audio
///
/// Each frame starts where the previous one ends, unless the output clock has
/// already moved past that point, in which case it starts immediately. The
/// clock is read at enqueue time because the device drains on its own.
pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    next_start_time: f64,
    active: HashMap<u64, PlaybackHandle>,
    next_id: u64,
    tap: Option<PlaybackTap>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputDevice>, tap: Option<PlaybackTap>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active: HashMap::new(),
            next_id: 0,
            tap,
        }
    }

    /// Schedule `frame` after everything already queued
    pub fn enqueue(&mut self, frame: AudioFrame) -> Result<PlaybackHandle> {
        let now = self.output.clock().now();
        let start_time = self.next_start_time.max(now);

        let handle = PlaybackHandle {
            id: self.next_id,
            start_time,
            duration: frame.duration_secs(),
        };

        self.output.schedule(handle.id, &frame, start_time)?;
        self.next_id += 1;
        self.next_start_time = start_time + handle.duration;
        self.active.insert(handle.id, handle);

        if let Some(tap) = &self.tap {
            tap.push(&frame, start_time);
        }

        debug!(
            "Scheduled playback {} at {:.3}s for {:.3}s ({} active)",
            handle.id,
            start_time,
            handle.duration,
            self.active.len()
        );

        Ok(handle)
    }

    /// Natural completion reported by the device. Returns false for unknown ids.
    pub fn finished(&mut self, handle_id: u64) -> bool {
        self.active.remove(&handle_id).is_some()
    }

    /// Whether the assistant is audibly speaking
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Current reading of the output clock
    pub fn output_time(&self) -> f64 {
        self.output.clock().now()
    }

    /// Force-stop everything queued or playing
    ///
    /// Audio that never reached the speaker is cut from the recording too.
    pub fn stop_all(&mut self) {
        if !self.active.is_empty() {
            debug!("Stopping {} active playback handles", self.active.len());
            if let Some(tap) = &self.tap {
                tap.cut(self.output.clock().now());
            }
        }
        for (id, _) in self.active.drain() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;
    }

    /// Stop all playback and release the output device
    pub fn close(&mut self) -> Result<()> {
        self.stop_all();
        self.output.close().map_err(|e| {
            warn!("Failed to close output {}: {:#}", self.output.name(), e);
            e
        })
    }
}
