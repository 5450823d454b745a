use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::AudioBackend;
use super::codec::{self, WireAudioChunk};
use crate::recording::MicrophoneTap;

/// Default samples per outbound frame
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Outbound chunks waiting for the session loop. Anything beyond this is dropped.
const CHUNK_QUEUE: usize = 16;

/// Cuts an arbitrary stream of samples into fixed-size frames
#[derive(Debug)]
pub struct FrameSegmenter {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameSegmenter {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame that is now complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples held back waiting for a full frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

type SharedTap = Arc<Mutex<Option<MicrophoneTap>>>;

/// Microphone capture pipeline
///
/// Segments the microphone signal into fixed frames, encodes each one and
/// hands it to the session loop. The raw signal is fanned out to the
/// recorder tap as it arrives; the tap is finished when capture ends, either
/// because the stream ran dry or because `stop` was called.
pub struct CaptureStream {
    frame_size: usize,
    backend: Option<Box<dyn AudioBackend>>,
    task: Option<JoinHandle<()>>,
    tap: Option<SharedTap>,
}

impl CaptureStream {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            backend: None,
            task: None,
            tap: None,
        }
    }

    /// Start capturing from `backend`
    ///
    /// Chunks are forwarded without back-pressure: when the receiver lags
    /// behind, the newest chunk is dropped.
    pub async fn start(
        &mut self,
        mut backend: Box<dyn AudioBackend>,
        tap: Option<MicrophoneTap>,
    ) -> Result<mpsc::Receiver<WireAudioChunk>> {
        if self.is_running() {
            anyhow::bail!("Capture already started");
        }

        let mut audio_rx = backend.start().await?;
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        let mut segmenter = FrameSegmenter::new(self.frame_size);
        let tap: SharedTap = Arc::new(Mutex::new(tap));
        let task_tap = Arc::clone(&tap);

        info!(
            "Capture started on {} ({} samples per frame)",
            backend.name(),
            self.frame_size
        );

        let task = tokio::spawn(async move {
            while let Some(block) = audio_rx.recv().await {
                if let Some(tap) = task_tap.lock().as_mut() {
                    tap.push(&block);
                }

                let samples = block.mixdown();
                for frame in segmenter.push(&samples) {
                    match chunk_tx.try_send(codec::encode(&frame)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("Outbound queue full, dropping capture frame");
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            }

            debug!("Microphone stream ended");
            finish_tap(&task_tap);
        });

        self.backend = Some(backend);
        self.task = Some(task);
        self.tap = Some(tap);

        Ok(chunk_rx)
    }

    /// Disconnect the input graph. Safe to call repeatedly or before `start`.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(tap) = self.tap.take() {
            finish_tap(&tap);
        }

        if let Some(mut backend) = self.backend.take() {
            info!("Stopping capture on {}", backend.name());
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop microphone backend: {:#}", e);
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

fn finish_tap(tap: &SharedTap) {
    if let Some(mut tap) = tap.lock().take() {
        tap.finish();
    }
}

impl Default for CaptureStream {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE)
    }
}
