// Hardware devices through cpal
//
// cpal streams are not Send on every platform, so each stream lives on its
// own thread that builds it, plays it and parks until told to shut down.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, AudioStreamSource, OutputConfig,
    OutputDevice,
};
use super::clock::{InputClock, OutputClock};
use super::resample::{resample_mono, AudioResampler};
use crate::error::SessionError;

/// A stream parked on its own thread
struct StreamThread {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build a stream on a dedicated thread and wait until it is playing
    async fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|s| {
                    s.play().context("Failed to start stream")?;
                    Ok(s)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = shutdown_rx.blocking_recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        ready_rx
            .await
            .map_err(|_| anyhow!("Audio thread exited before the stream started"))??;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Default input device
pub struct CpalMicrophone {
    config: AudioBackendConfig,
    device: cpal::Device,
    clock: InputClock,
    stream: Option<StreamThread>,
    capturing: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl AudioBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("Already capturing");
        }

        let device_config = self
            .device
            .default_input_config()
            .context("Failed to get input config")?
            .config();
        let device_rate = device_config.sample_rate.0;
        let device_channels = device_config.channels as usize;

        let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<f32>>(64);
        let device = self.device.clone();
        let capturing = Arc::clone(&self.capturing);

        let stream = StreamThread::spawn("krushi-mic", move || {
            device
                .build_input_stream(
                    &device_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !capturing.load(Ordering::Relaxed) {
                            return;
                        }
                        let mono: Vec<f32> = data
                            .chunks(device_channels)
                            .map(|f| f.iter().sum::<f32>() / device_channels as f32)
                            .collect();
                        if raw_tx.try_send(mono).is_err() {
                            debug!("Microphone block dropped");
                        }
                    },
                    |err| error!("Audio input stream error: {}", err),
                    None,
                )
                .context("Failed to build input stream")
        })
        .await?;

        let target_rate = self.config.target_sample_rate;
        let block_size = self.config.block_size.max(1);
        let mut resampler = if device_rate != target_rate {
            Some(AudioResampler::new(device_rate, target_rate)?)
        } else {
            None
        };
        let clock = self.clock.clone();
        let (frame_tx, frame_rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut pending = Vec::with_capacity(block_size * 2);
            while let Some(block) = raw_rx.recv().await {
                let block = match resampler.as_mut() {
                    Some(r) => match r.process(&block) {
                        Ok(out) => out,
                        Err(e) => {
                            warn!("Microphone resampling failed: {:#}", e);
                            continue;
                        }
                    },
                    None => block,
                };
                pending.extend(block);

                while pending.len() >= block_size {
                    let rest = pending.split_off(block_size);
                    let samples = std::mem::replace(&mut pending, rest);
                    let mut frame = AudioFrame::mono(samples, target_rate, AudioStreamSource::Microphone);
                    frame.timestamp_ms = clock.now_ms();
                    clock.advance(block_size as u64);
                    if frame_tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        });

        self.capturing.store(true, Ordering::SeqCst);
        self.stream = Some(stream);

        info!(
            "Microphone capture started ({} Hz device, {} Hz delivered)",
            device_rate, target_rate
        );

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            tokio::task::spawn_blocking(move || stream.stop())
                .await
                .context("Microphone shutdown panicked")?;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
}

/// Default output device with sample-accurate scheduling
pub struct CpalOutput {
    clock: OutputClock,
    device_rate: u32,
    voices: Arc<Mutex<Vec<Voice>>>,
    stream: Option<StreamThread>,
}

impl CpalOutput {
    async fn open(
        device: cpal::Device,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Self> {
        let device_config = device
            .default_output_config()
            .context("Failed to get output config")?
            .config();
        let device_rate = device_config.sample_rate.0;
        let channels = device_config.channels as usize;

        let clock = OutputClock::new(device_rate);
        let voices: Arc<Mutex<Vec<Voice>>> = Arc::new(Mutex::new(Vec::new()));

        let render_clock = clock.clone();
        let render_voices = Arc::clone(&voices);

        let stream = StreamThread::spawn("krushi-speaker", move || {
            device
                .build_output_stream(
                    &device_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let base = render_clock.position_frames();
                        let frames = data.len() / channels;
                        let mut voices = render_voices.lock();

                        for (i, out) in data.chunks_mut(channels).enumerate() {
                            let pos = base + i as u64;
                            let mut sum = 0.0f32;
                            for voice in voices.iter() {
                                if pos >= voice.start_frame {
                                    if let Some(s) = voice.samples.get((pos - voice.start_frame) as usize) {
                                        sum += s;
                                    }
                                }
                            }
                            out.fill(sum.clamp(-1.0, 1.0));
                        }

                        let end = base + frames as u64;
                        voices.retain(|voice| {
                            let done = voice.start_frame + voice.samples.len() as u64 <= end;
                            if done {
                                let _ = completions.send(voice.id);
                            }
                            !done
                        });

                        render_clock.advance(frames as u64);
                    },
                    |err| error!("Audio output stream error: {}", err),
                    None,
                )
                .context("Failed to build output stream")
        })
        .await?;

        info!("Speaker opened ({} Hz, {} channels)", device_rate, channels);

        Ok(Self {
            clock,
            device_rate,
            voices,
            stream: Some(stream),
        })
    }
}

impl OutputDevice for CpalOutput {
    fn clock(&self) -> &OutputClock {
        &self.clock
    }

    fn schedule(&self, handle_id: u64, frame: &AudioFrame, start_time: f64) -> Result<()> {
        if self.stream.is_none() {
            anyhow::bail!("Output device is closed");
        }

        let samples = resample_mono(&frame.mixdown(), frame.sample_rate, self.device_rate)?;
        let start_frame = (start_time * self.device_rate as f64).round() as u64;

        self.voices.lock().push(Voice {
            id: handle_id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop(&self, handle_id: u64) {
        self.voices.lock().retain(|v| v.id != handle_id);
    }

    fn close(&mut self) -> Result<()> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| anyhow!("Output device already closed"))?;
        self.voices.lock().clear();
        stream.stop();
        Ok(())
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

/// Device provider for the default host
#[derive(Default)]
pub struct CpalDevices;

#[async_trait::async_trait]
impl AudioDevices for CpalDevices {
    async fn open_microphone(
        &self,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, SessionError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SessionError::Permission("No input device available".into()))?;

        // Probing the config is where denied access surfaces on most hosts
        device
            .default_input_config()
            .map_err(|e| SessionError::Permission(e.to_string()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        Ok(Box::new(CpalMicrophone {
            clock: InputClock::new(config.target_sample_rate),
            config: config.clone(),
            device,
            stream: None,
            capturing: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn open_output(
        &self,
        _config: &OutputConfig,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputDevice>, SessionError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SessionError::Device("No output device available".into()))?;

        let output = CpalOutput::open(device, completions)
            .await
            .map_err(|e| SessionError::Device(format!("{:#}", e)))?;
        Ok(Box::new(output))
    }
}
