// Shared mocks for session-level integration tests
//
// The mock devices and transport record everything the session does to them
// so tests can assert how many capture graphs, outputs and connections are
// alive at any moment.

#![allow(dead_code)]

use anyhow::Result;
use krushi_voice::audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, AudioStreamSource, OutputClock,
    OutputConfig, OutputDevice,
};
use krushi_voice::error::SessionError;
use krushi_voice::session::{SessionConfig, SessionSnapshot, SessionState, VoiceSession};
use krushi_voice::transport::{
    LiveConfig, LiveConnection, OpenConnection, ServerMessage, SpeechTransport, TransportEvent,
};
use krushi_voice::WireAudioChunk;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ============================================================================
// Devices
// ============================================================================

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub mics_opened: usize,
    pub mics_started: usize,
    pub mics_stopped: usize,
    pub outputs_opened: usize,
    pub outputs_closed: usize,
    pub scheduled: Vec<(u64, f64)>,
    pub stopped_handles: Vec<u64>,
}

#[derive(Clone, Default)]
pub struct MockDevices {
    pub log: Arc<Mutex<DeviceLog>>,
    /// Blocks every microphone delivers right after it starts
    pub mic_blocks: Arc<Mutex<Vec<Vec<f32>>>>,
    pub deny_microphone: bool,
}

impl MockDevices {
    pub fn live_captures(&self) -> usize {
        let log = self.log.lock();
        log.mics_started - log.mics_stopped
    }

    pub fn live_outputs(&self) -> usize {
        let log = self.log.lock();
        log.outputs_opened - log.outputs_closed
    }
}

#[async_trait::async_trait]
impl AudioDevices for MockDevices {
    async fn open_microphone(
        &self,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, SessionError> {
        if self.deny_microphone {
            return Err(SessionError::Permission("denied by user".to_string()));
        }

        self.log.lock().mics_opened += 1;
        Ok(Box::new(MockMicrophone {
            log: Arc::clone(&self.log),
            blocks: self.mic_blocks.lock().clone(),
            sample_rate: config.target_sample_rate,
            tx: None,
        }))
    }

    async fn open_output(
        &self,
        config: &OutputConfig,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputDevice>, SessionError> {
        self.log.lock().outputs_opened += 1;
        Ok(Box::new(MockOutput {
            log: Arc::clone(&self.log),
            clock: OutputClock::wall(config.sample_rate),
            _completions: completions,
            closed: false,
        }))
    }
}

struct MockMicrophone {
    log: Arc<Mutex<DeviceLog>>,
    blocks: Vec<Vec<f32>>,
    sample_rate: u32,
    tx: Option<mpsc::Sender<AudioFrame>>,
}

#[async_trait::async_trait]
impl AudioBackend for MockMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(64);
        let mut timestamp_ms = 0;
        for block in &self.blocks {
            let mut frame =
                AudioFrame::mono(block.clone(), self.sample_rate, AudioStreamSource::Microphone);
            frame.timestamp_ms = timestamp_ms;
            timestamp_ms += (block.len() as u64 * 1000) / self.sample_rate as u64;
            tx.try_send(frame)?;
        }

        self.tx = Some(tx);
        self.log.lock().mics_started += 1;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            self.log.lock().mics_stopped += 1;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.tx.is_some()
    }

    fn name(&self) -> &str {
        "mock microphone"
    }
}

struct MockOutput {
    log: Arc<Mutex<DeviceLog>>,
    clock: OutputClock,
    _completions: mpsc::UnboundedSender<u64>,
    closed: bool,
}

impl OutputDevice for MockOutput {
    fn clock(&self) -> &OutputClock {
        &self.clock
    }

    fn schedule(&self, handle_id: u64, _frame: &AudioFrame, start_time: f64) -> Result<()> {
        self.log.lock().scheduled.push((handle_id, start_time));
        Ok(())
    }

    fn stop(&self, handle_id: u64) {
        self.log.lock().stopped_handles.push(handle_id);
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.lock().outputs_closed += 1;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock output"
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Test-side view of one opened connection
#[derive(Clone)]
pub struct MockLink {
    pub config: LiveConfig,
    pub events: mpsc::Sender<TransportEvent>,
    pub sent: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl MockLink {
    pub async fn message(&self, json: serde_json::Value) {
        let msg: ServerMessage = serde_json::from_value(json).unwrap();
        let _ = self.events.send(TransportEvent::Message(msg)).await;
    }

    pub async fn error(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Error(reason.to_string())).await;
    }

    pub async fn remote_close(&self) {
        let _ = self.events.send(TransportEvent::Closed(None)).await;
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub attempts: Arc<AtomicUsize>,
    pub links: Arc<Mutex<Vec<MockLink>>>,
    /// Failures returned by the next connect calls, in order
    pub failures: Arc<Mutex<VecDeque<SessionError>>>,
    /// How long the setup handshake takes
    pub connect_delay: Arc<Mutex<Duration>>,
}

impl MockTransport {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn link(&self, index: usize) -> MockLink {
        self.links.lock()[index].clone()
    }

    pub fn open_links(&self) -> usize {
        self.links
            .lock()
            .iter()
            .filter(|link| link.close_count() == 0)
            .count()
    }
}

#[async_trait::async_trait]
impl SpeechTransport for MockTransport {
    async fn connect(&self, config: &LiveConfig) -> Result<OpenConnection, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(failure);
        }

        let (tx, rx) = mpsc::channel(64);
        let link = MockLink {
            config: config.clone(),
            events: tx,
            sent: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        };
        self.links.lock().push(link.clone());

        Ok(OpenConnection {
            connection: Box::new(MockConnection {
                sent: link.sent,
                closed: link.closed,
            }),
            events: rx,
        })
    }
}

struct MockConnection {
    sent: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl LiveConnection for MockConnection {
    fn send_realtime_input(&self, _chunk: WireAudioChunk) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) == 0 {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub session: VoiceSession,
    pub transport: MockTransport,
    pub devices: MockDevices,
    pub recordings: TempDir,
}

pub fn harness_with(
    devices: MockDevices,
    configure: impl FnOnce(&mut SessionConfig),
) -> Harness {
    let recordings = TempDir::new().unwrap();
    let mut config = SessionConfig {
        recordings_dir: recordings.path().to_path_buf(),
        ..Default::default()
    };
    configure(&mut config);

    let transport = MockTransport::default();
    let session = VoiceSession::spawn(
        config,
        Arc::new(transport.clone()),
        Arc::new(devices.clone()),
    );

    Harness {
        session,
        transport,
        devices,
        recordings,
    }
}

pub fn harness() -> Harness {
    harness_with(MockDevices::default(), |_| {})
}

pub async fn wait_for(
    session: &VoiceSession,
    what: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = session.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(what))
        .await
        .expect("timed out waiting for session")
        .expect("session loop ended");
    snapshot.clone()
}

pub async fn wait_for_state(session: &VoiceSession, state: SessionState) -> SessionSnapshot {
    wait_for(session, |s| s.state == state).await
}

/// Poll `condition` while letting other tasks run
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
