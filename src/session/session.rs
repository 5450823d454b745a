use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::{PartialPolicy, SessionConfig};
use super::persona::FarmerProfile;
use super::state::SessionState;
use super::stats::{SessionSnapshot, SessionStats};
use super::transcript::{ConversationMessage, Role, TranscriptAggregator};
use crate::audio::{
    codec, AudioBackend, AudioBackendConfig, AudioClock, AudioDevices, CaptureStream,
    OutputConfig, OutputDevice, PlaybackScheduler, WireAudioChunk,
};
use crate::error::SessionError;
use crate::recording::{RecordingArtifact, SessionRecorder};
use crate::transport::{
    LiveConfig, LiveConnection, OpenConnection, ServerMessage, SpeechTransport, TransportEvent,
};

enum Command {
    Start {
        profile: Option<FarmerProfile>,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<Option<RecordingArtifact>>,
    },
}

/// Inputs of the session loop. `generation` identifies the connection
/// attempt that produced the event; anything from an older attempt is stale.
enum Event {
    Connected {
        generation: u64,
        result: Result<Opened, SessionError>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Chunk {
        generation: u64,
        chunk: WireAudioChunk,
    },
    PlaybackFinished {
        generation: u64,
        id: u64,
    },
    RetryDue {
        generation: u64,
    },
}

/// Devices and transport acquired by one connection attempt
struct Opened {
    microphone: Box<dyn AudioBackend>,
    output: Box<dyn OutputDevice>,
    completions: mpsc::UnboundedReceiver<u64>,
    connection: OpenConnection,
}

impl Opened {
    async fn release(self) {
        let Opened {
            microphone,
            mut output,
            connection,
            ..
        } = self;
        drop(microphone);

        let mut connection = connection.connection;
        if let Err(e) = connection.close().await {
            warn!("Failed to close stale connection: {:#}", e);
        }
        if let Err(e) = output.close() {
            warn!("Failed to close stale output: {:#}", e);
        }
    }
}

/// Everything that lives exactly as long as one open connection
struct Link {
    connection: Box<dyn LiveConnection>,
    capture: CaptureStream,
    scheduler: PlaybackScheduler,
    forwarders: Vec<JoinHandle<()>>,
}

impl Link {
    /// Best-effort release. Each step runs even if an earlier one failed.
    async fn release(mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }

        if let Err(e) = self.connection.close().await {
            warn!("Failed to close live connection: {:#}", e);
        }
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop capture: {:#}", e);
        }
        if let Err(e) = self.scheduler.close() {
            debug!("Output close failed: {:#}", e);
        }
    }
}

/// Handle to a running voice session
///
/// The session itself runs as a single task that owns all mutable state.
/// Handles are cheap to clone; the task exits once every handle is dropped.
#[derive(Clone)]
pub struct VoiceSession {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionSnapshot>,
}

impl VoiceSession {
    /// Spawn the session loop. Nothing connects until `start` is called.
    pub fn spawn(
        config: SessionConfig,
        transport: Arc<dyn SpeechTransport>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionSnapshot::default());

        let core = SessionCore::new(config, transport, devices, event_tx, status_tx);
        tokio::spawn(core.run(command_rx, event_rx));

        Self {
            commands: command_tx,
            status: status_rx,
        }
    }

    /// Begin a user-intended session
    ///
    /// Returns once the connection attempt is under way; watch `subscribe`
    /// for the session becoming active. Ignored while a session is running.
    pub async fn start(&self, profile: Option<FarmerProfile>) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Start { profile, reply })
            .map_err(|_| anyhow!("Session loop has stopped"))?;
        done.await.context("Session loop dropped the start request")
    }

    /// End the session and finalize the recording. Safe to call at any time.
    pub async fn stop(&self) -> Result<Option<RecordingArtifact>> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .map_err(|_| anyhow!("Session loop has stopped"))?;
        done.await.context("Session loop dropped the stop request")
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats::from(&*self.status.borrow())
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// True while a `start` would be ignored
    pub fn is_running(&self) -> bool {
        self.status.borrow().is_running()
    }

    /// Committed messages, oldest first
    pub fn transcript(&self) -> Vec<ConversationMessage> {
        self.status.borrow().messages.clone()
    }

    /// Artifact of the last stopped session
    pub fn recording(&self) -> Option<RecordingArtifact> {
        self.status.borrow().recording.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }
}

struct SessionCore {
    config: SessionConfig,
    transport: Arc<dyn SpeechTransport>,
    devices: Arc<dyn AudioDevices>,
    events: mpsc::UnboundedSender<Event>,
    status: watch::Sender<SessionSnapshot>,

    state: SessionState,
    /// The user wants the session running. Gates every reconnect.
    intended: bool,
    generation: u64,
    profile: FarmerProfile,

    recorder: Option<SessionRecorder>,
    messages: Vec<ConversationMessage>,
    transcript: TranscriptAggregator,

    link: Option<Link>,
    pending_connect: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,

    error: Option<String>,
    reconnects: u32,
    started_at: Option<chrono::DateTime<Utc>>,
    active_since: Option<Instant>,
}

impl SessionCore {
    fn new(
        config: SessionConfig,
        transport: Arc<dyn SpeechTransport>,
        devices: Arc<dyn AudioDevices>,
        events: mpsc::UnboundedSender<Event>,
        status: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let transcript = TranscriptAggregator::new().skip_empty(config.skip_empty_turns);
        let profile = config.profile.clone();

        Self {
            config,
            transport,
            devices,
            events,
            status,
            state: SessionState::Idle,
            intended: false,
            generation: 0,
            profile,
            recorder: None,
            messages: Vec::new(),
            transcript,
            link: None,
            pending_connect: None,
            retry: None,
            error: None,
            reconnects: 0,
            started_at: None,
            active_since: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        debug!("Session loop started");

        // Status is published before replying so callers observe the outcome
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { profile, reply }) => {
                        self.start(profile).await;
                        self.publish();
                        let _ = reply.send(());
                    }
                    Some(Command::Stop { reply }) => {
                        let artifact = self.stop().await;
                        self.publish();
                        let _ = reply.send(artifact);
                    }
                    None => break,
                },
                Some(event) = events.recv() => {
                    if self.handle(event).await {
                        self.publish();
                    }
                }
            }
        }

        self.stop().await;
        debug!("Session loop finished");
    }

    async fn start(&mut self, profile: Option<FarmerProfile>) {
        if self.intended && (self.state.is_live() || self.retry.is_some()) {
            warn!("Voice session already running");
            return;
        }

        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
        // Leftovers of a failed attempt
        self.teardown().await;

        self.intended = true;
        self.profile = profile.unwrap_or_else(|| self.config.profile.clone());

        let session_id = format!("krushi-{}", uuid::Uuid::new_v4());
        let mut recorder = SessionRecorder::new(
            session_id.clone(),
            self.config.recordings_dir.clone(),
            self.config.output_sample_rate,
        );
        recorder.start();
        self.recorder = Some(recorder);

        self.messages.clear();
        self.transcript.clear();
        self.reconnects = 0;
        self.error = None;
        self.started_at = Some(Utc::now());

        info!(
            "Starting voice session {} for {} ({}, {})",
            session_id,
            self.profile.name,
            self.profile.crop,
            self.profile.language.locale_code()
        );

        self.connect();
    }

    async fn stop(&mut self) -> Option<RecordingArtifact> {
        self.intended = false;
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }

        if self.state != SessionState::Idle {
            info!("Stopping voice session");
            self.state = SessionState::Closing;
            self.publish();
        }

        self.teardown().await;

        let artifact = match self.recorder.as_mut() {
            Some(recorder) => match recorder.stop() {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    error!("Failed to save session recording: {:#}", e);
                    None
                }
            },
            None => None,
        };

        self.state = SessionState::Idle;
        self.error = None;
        artifact
    }

    fn live_config(&self) -> LiveConfig {
        LiveConfig {
            model: self.config.model.clone(),
            voice_name: self.config.voice_name.clone(),
            system_instruction: self.config.persona.render(&self.profile),
            language_code: Some(self.profile.language.locale_code().to_string()),
            response_modalities: vec!["AUDIO".to_string()],
            input_transcription: true,
            output_transcription: true,
        }
    }

    /// Open devices and transport for a new connection attempt
    fn connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.state = SessionState::Connecting;

        let devices = Arc::clone(&self.devices);
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let live = self.live_config();
        let mic_config = AudioBackendConfig {
            target_sample_rate: self.config.input_sample_rate,
            target_channels: 1,
            block_size: self.config.frame_size,
        };
        let output_config = OutputConfig {
            sample_rate: self.config.output_sample_rate,
            channels: 1,
        };

        debug!("Connection attempt {}", generation);

        self.pending_connect = Some(tokio::spawn(async move {
            let result = open(devices, transport, mic_config, output_config, live).await;
            let _ = events.send(Event::Connected { generation, result });
        }));
    }

    /// Returns true when observable state may have changed
    async fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Connected { generation, result } => {
                if generation != self.generation || !self.intended {
                    debug!("Releasing stale connection attempt {}", generation);
                    if let Ok(opened) = result {
                        opened.release().await;
                    }
                    return false;
                }

                self.pending_connect = None;
                match result {
                    Ok(opened) => self.activate(opened).await,
                    Err(SessionError::TransportClosed(reason)) => {
                        let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                        self.fail(SessionError::Transport(format!("closed during setup: {}", reason)))
                            .await
                    }
                    Err(e) => self.fail(e).await,
                }
                true
            }
            Event::Transport { generation, event } => {
                if generation != self.generation {
                    return false;
                }

                match event {
                    TransportEvent::Message(msg) => self.on_server_message(msg),
                    TransportEvent::Error(e) => self.fail(SessionError::Transport(e)).await,
                    TransportEvent::Closed(reason) => {
                        self.fail(SessionError::TransportClosed(reason)).await
                    }
                }
                true
            }
            Event::Chunk { generation, chunk } => {
                if generation != self.generation {
                    return false;
                }
                if let Some(link) = &self.link {
                    if let Err(e) = link.connection.send_realtime_input(chunk) {
                        debug!("Dropping microphone chunk: {:#}", e);
                    }
                }
                false
            }
            Event::PlaybackFinished { generation, id } => {
                if generation != self.generation {
                    return false;
                }
                self.link
                    .as_mut()
                    .map(|link| link.scheduler.finished(id))
                    .unwrap_or(false)
            }
            Event::RetryDue { generation } => {
                if generation != self.generation
                    || !self.intended
                    || self.state != SessionState::Errored
                {
                    debug!("Ignoring stale retry {}", generation);
                    return false;
                }

                self.retry = None;
                self.reconnects += 1;
                info!("Reconnecting voice session (attempt {})", self.reconnects);
                self.connect();
                true
            }
        }
    }

    /// Wire the opened devices and transport together and go active
    async fn activate(&mut self, opened: Opened) {
        let Opened {
            microphone,
            output,
            completions,
            connection,
        } = opened;
        let OpenConnection {
            mut connection,
            events: transport_events,
        } = connection;

        let mic_tap = self.recorder.as_ref().and_then(|recorder| {
            recorder
                .microphone_tap(self.config.input_sample_rate)
                .map_err(|e| warn!("Recording without microphone: {:#}", e))
                .ok()
        });
        // The output clock has been running since the device opened
        let output_now = output.clock().now();
        let playback_tap = self
            .recorder
            .as_ref()
            .map(|recorder| recorder.playback_tap(output_now));

        let mut scheduler = PlaybackScheduler::new(output, playback_tap);
        let mut capture = CaptureStream::new(self.config.frame_size);

        let chunks = match capture.start(microphone, mic_tap).await {
            Ok(chunks) => chunks,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!("Failed to close live connection: {:#}", close_err);
                }
                if let Err(close_err) = scheduler.close() {
                    debug!("Output close failed: {:#}", close_err);
                }
                self.fail(SessionError::Device(format!("{:#}", e))).await;
                return;
            }
        };

        let generation = self.generation;
        let forwarders = vec![
            forward_chunks(generation, chunks, self.events.clone()),
            forward_transport(generation, transport_events, self.events.clone()),
            forward_completions(generation, completions, self.events.clone()),
        ];

        self.link = Some(Link {
            connection,
            capture,
            scheduler,
            forwarders,
        });
        self.state = SessionState::Active;
        self.active_since = Some(Instant::now());
        self.error = None;

        info!("Voice session active");
    }

    fn on_server_message(&mut self, msg: ServerMessage) {
        if let Some(text) = msg.output_transcript() {
            self.transcript.append_partial(Role::Assistant, text);
        }
        if let Some(text) = msg.input_transcript() {
            self.transcript.append_partial(Role::User, text);
        }

        if msg.turn_complete() && self.state == SessionState::Active {
            let turn = self.transcript.commit_turn();
            debug!("Turn complete ({} messages)", turn.len());
            self.messages.extend(turn);
        }

        let Some(link) = self.link.as_mut() else {
            return;
        };

        for payload in msg.audio_payloads() {
            let frame = match codec::decode_base64(payload, self.config.output_sample_rate, 1) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping undecodable assistant audio: {}", e);
                    continue;
                }
            };

            if let Err(e) = link.scheduler.enqueue(frame) {
                warn!("Failed to schedule assistant audio: {:#}", e);
            }
        }
    }

    /// Handle a failed or lost connection
    ///
    /// Resources are released first. While the session is still intended it
    /// moves to `Errored` and, for transport failures, schedules a reconnect.
    async fn fail(&mut self, error: SessionError) {
        let delay = self.config.retry.delay_for(&error);
        self.teardown().await;

        if !self.intended {
            info!("Connection ended: {}", error);
            self.state = SessionState::Idle;
            return;
        }

        self.error = Some(
            error
                .user_message()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        );
        self.state = SessionState::Errored;

        let Some(delay) = delay else {
            error!("Voice session failed: {}", error);
            return;
        };

        warn!(
            "Voice session interrupted ({}), reconnecting in {}ms",
            error,
            delay.as_millis()
        );

        let generation = self.generation;
        let deadline = Instant::now() + delay;
        let events = self.events.clone();
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(Event::RetryDue { generation });
        }));
    }

    /// Drop the current connection attempt and everything it opened
    async fn teardown(&mut self) {
        self.generation += 1;

        if let Some(task) = self.pending_connect.take() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.release().await;
        }

        match self.config.partial_policy {
            PartialPolicy::Discard => self.transcript.clear(),
            PartialPolicy::Flush => {
                let flushed = self.transcript.flush();
                self.messages.extend(flushed);
            }
        }

        self.active_since = None;
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            session_id: self.recorder.as_ref().map(|r| r.session_id().to_string()),
            state: self.state,
            is_speaking: self
                .link
                .as_ref()
                .map(|link| link.scheduler.is_speaking())
                .unwrap_or(false),
            user_partial: self.transcript.partial(Role::User).to_string(),
            assistant_partial: self.transcript.partial(Role::Assistant).to_string(),
            messages: self.messages.clone(),
            started_at: self.started_at,
            active_since: self.active_since,
            recording: self.recorder.as_ref().and_then(|r| r.artifact().cloned()),
            error: self.error.clone(),
            reconnect_count: self.reconnects,
            reconnecting: self.intended && self.retry.is_some(),
        };

        self.status.send_replace(snapshot);
    }
}

async fn open(
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn SpeechTransport>,
    mic_config: AudioBackendConfig,
    output_config: OutputConfig,
    live: LiveConfig,
) -> Result<Opened, SessionError> {
    let microphone = devices.open_microphone(&mic_config).await?;

    let (completions_tx, completions) = mpsc::unbounded_channel();
    let mut output = devices.open_output(&output_config, completions_tx).await?;

    match transport.connect(&live).await {
        Ok(connection) => Ok(Opened {
            microphone,
            output,
            completions,
            connection,
        }),
        Err(e) => {
            if let Err(close_err) = output.close() {
                debug!("Output close failed: {:#}", close_err);
            }
            Err(e)
        }
    }
}

fn forward_chunks(
    generation: u64,
    mut chunks: mpsc::Receiver<WireAudioChunk>,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = chunks.recv().await {
            if events.send(Event::Chunk { generation, chunk }).is_err() {
                return;
            }
        }
    })
}

fn forward_transport(
    generation: u64,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = transport_events.recv().await {
            if events.send(Event::Transport { generation, event }).is_err() {
                return;
            }
        }

        // Event stream ended without saying why
        let _ = events.send(Event::Transport {
            generation,
            event: TransportEvent::Closed(None),
        });
    })
}

fn forward_completions(
    generation: u64,
    mut completions: mpsc::UnboundedReceiver<u64>,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(id) = completions.recv().await {
            if events.send(Event::PlaybackFinished { generation, id }).is_err() {
                return;
            }
        }
    })
}
