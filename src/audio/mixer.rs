// Timeline mixer for the conversation recording
//
// Places mono segments from any source at an offset on a shared timeline
// and sums overlapping samples, clipping to the 16-bit range on output.

use tracing::debug;

/// Accumulates segments on a single mono timeline
pub struct TimelineMixer {
    sample_rate: u32,
    timeline: Vec<f32>,
    segments: usize,
}

impl TimelineMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            timeline: Vec::new(),
            segments: 0,
        }
    }

    /// Add `samples` starting `offset_secs` into the timeline
    pub fn add(&mut self, offset_secs: f64, samples: &[f32]) {
        let start = (offset_secs.max(0.0) * self.sample_rate as f64).round() as usize;
        let end = start + samples.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0.0);
        }

        for (slot, sample) in self.timeline[start..end].iter_mut().zip(samples) {
            *slot += sample;
        }
        self.segments += 1;
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.timeline.len() as f64 / self.sample_rate as f64
    }

    /// Quantize the mix to 16-bit PCM with clipping
    pub fn finish(self) -> Vec<i16> {
        debug!(
            "Mixed {} segments into {} samples ({:.1}s)",
            self.segments,
            self.timeline.len(),
            self.duration_secs()
        );

        self.timeline
            .iter()
            .map(|&s| (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect()
    }
}
