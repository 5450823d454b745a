//! Text-to-speech fallback
//!
//! Advice produced outside the live session (crop analysis, written answers)
//! is read aloud through a [`SpeechSynthesizer`]. Starting a new utterance
//! cancels the one in progress, and a cancelled utterance never reports
//! completion.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::{AudioDevices, AudioFrame, OutputConfig, OutputDevice};
use super::clock::AudioClock;
use crate::error::SessionError;

/// Speaking rate used for advice, slightly slower than conversational speech
pub const DEFAULT_SPEECH_RATE: f32 = 0.85;

/// Runs once an utterance has finished playing
pub type OnSpeechEnd = Box<dyn FnOnce() + Send + 'static>;

/// Reads text aloud in a given locale
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text` using `locale` (BCP 47, e.g. `mr-IN`)
    ///
    /// Anything already speaking is cancelled first. `on_end` runs when this
    /// utterance finishes, unless it is cancelled.
    fn speak(&self, text: &str, locale: &str, on_end: Option<OnSpeechEnd>) -> Result<()>;

    /// Silence the current utterance, if any
    fn cancel(&self);

    fn is_speaking(&self) -> bool;
}

/// Turns text into audio
pub trait SpeechEngine: Send + Sync {
    fn render(&self, text: &str, locale: &str, rate: f32) -> Result<AudioFrame>;
}

struct Utterance {
    id: u64,
    on_end: Option<OnSpeechEnd>,
}

/// Synthesizer that plays rendered speech on its own output device
pub struct PlaybackSynthesizer {
    engine: Arc<dyn SpeechEngine>,
    output: Box<dyn OutputDevice>,
    current: Arc<Mutex<Option<Utterance>>>,
    next_id: AtomicU64,
    rate: f32,
    watcher: JoinHandle<()>,
}

impl PlaybackSynthesizer {
    /// Open an output context on `devices` for speech playback
    pub async fn open(
        devices: &dyn AudioDevices,
        config: &OutputConfig,
        engine: Arc<dyn SpeechEngine>,
    ) -> Result<Self, SessionError> {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let output = devices.open_output(config, completions_tx).await?;
        Ok(Self::new(output, completions, engine))
    }

    pub fn new(
        output: Box<dyn OutputDevice>,
        completions: mpsc::UnboundedReceiver<u64>,
        engine: Arc<dyn SpeechEngine>,
    ) -> Self {
        let current = Arc::new(Mutex::new(None));
        let watcher = tokio::spawn(watch_completions(completions, Arc::clone(&current)));

        Self {
            engine,
            output,
            current,
            next_id: AtomicU64::new(0),
            rate: DEFAULT_SPEECH_RATE,
            watcher,
        }
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }
}

impl SpeechSynthesizer for PlaybackSynthesizer {
    fn speak(&self, text: &str, locale: &str, on_end: Option<OnSpeechEnd>) -> Result<()> {
        self.cancel();

        let frame = self.engine.render(text, locale, self.rate)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Speaking {:.1}s of advice in {} (utterance {})",
            frame.duration_secs(),
            locale,
            id
        );

        // Registered before scheduling so a fast completion finds it
        let mut current = self.current.lock();
        *current = Some(Utterance { id, on_end });
        if let Err(e) = self.output.schedule(id, &frame, self.output.clock().now()) {
            *current = None;
            return Err(e);
        }

        Ok(())
    }

    fn cancel(&self) {
        let cancelled = self.current.lock().take();
        if let Some(utterance) = cancelled {
            debug!("Cancelling utterance {}", utterance.id);
            self.output.stop(utterance.id);
        }
    }

    fn is_speaking(&self) -> bool {
        self.current.lock().is_some()
    }
}

impl Drop for PlaybackSynthesizer {
    fn drop(&mut self) {
        self.watcher.abort();
        if let Err(e) = self.output.close() {
            warn!("Failed to close speech output: {:#}", e);
        }
    }
}

async fn watch_completions(
    mut completions: mpsc::UnboundedReceiver<u64>,
    current: Arc<Mutex<Option<Utterance>>>,
) {
    while let Some(id) = completions.recv().await {
        let finished = {
            let mut current = current.lock();
            match current.as_ref() {
                Some(utterance) if utterance.id == id => current.take(),
                _ => None,
            }
        };

        if let Some(on_end) = finished.and_then(|utterance| utterance.on_end) {
            on_end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::AudioStreamSource;
    use crate::audio::file::NullOutput;
    use crate::session::Language;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Renders 10ms of silence per character and remembers what it was asked
    #[derive(Default)]
    struct CountingEngine {
        requests: Mutex<Vec<(String, String, f32)>>,
    }

    impl SpeechEngine for CountingEngine {
        fn render(&self, text: &str, locale: &str, rate: f32) -> Result<AudioFrame> {
            self.requests
                .lock()
                .push((text.to_string(), locale.to_string(), rate));
            Ok(AudioFrame::mono(
                vec![0.0; text.chars().count() * 240],
                24000,
                AudioStreamSource::Assistant,
            ))
        }
    }

    fn synthesizer() -> (PlaybackSynthesizer, Arc<CountingEngine>) {
        let engine = Arc::new(CountingEngine::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let output = NullOutput::new(&OutputConfig::default(), tx);
        let synth = PlaybackSynthesizer::new(Box::new(output), rx, engine.clone());
        (synth, engine)
    }

    fn counter() -> (Arc<AtomicUsize>, OnSpeechEnd) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&count);
        let on_end: OnSpeechEnd = Box::new(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        (count, on_end)
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_end_runs_after_utterance() {
        let (synth, engine) = synthesizer();
        let (ended, on_end) = counter();

        synth
            .speak("Pani dya", Language::Marathi.locale_code(), Some(on_end))
            .unwrap();
        assert!(synth.is_speaking());
        assert_eq!(
            engine.requests.lock()[0],
            ("Pani dya".to_string(), "mr-IN".to_string(), DEFAULT_SPEECH_RATE)
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(!synth.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_speak_is_harmless() {
        let (synth, _engine) = synthesizer();
        let (ended, on_end) = counter();

        synth.cancel();
        assert!(!synth.is_speaking());

        synth.speak("Hello", "en-US", Some(on_end)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_utterance_never_ends() {
        let (synth, _engine) = synthesizer();
        let (ended, on_end) = counter();

        synth.speak("Fawarni kara", "hi-IN", Some(on_end)).unwrap();
        synth.cancel();
        assert!(!synth.is_speaking());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ended.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_utterance_replaces_current() {
        let (synth, _engine) = synthesizer();
        let (first_ended, first) = counter();
        let (second_ended, second) = counter();

        synth.speak("pahila salla", "mr-IN", Some(first)).unwrap();
        synth.speak("dusra", "mr-IN", Some(second)).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(first_ended.load(Ordering::SeqCst), 0);
        assert_eq!(second_ended.load(Ordering::SeqCst), 1);
    }
}
