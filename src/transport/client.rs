use anyhow::{anyhow, bail, Result};
use futures::stream::StreamExt;
use futures::SinkExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{RealtimeInputMessage, ServerMessage};
use super::{LiveConfig, LiveConnection, OpenConnection, SpeechTransport, TransportEvent};
use crate::audio::WireAudioChunk;
use crate::error::SessionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames waiting for the socket writer
const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 256;

/// WebSocket client for the live speech service
#[derive(Debug, Clone)]
pub struct LiveClient {
    endpoint: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl LiveClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            connect_timeout,
        }
    }

    fn url(&self) -> String {
        match &self.api_key {
            Some(key) => format!("{}?key={}", self.endpoint, key),
            None => self.endpoint.clone(),
        }
    }

    /// Send the setup message and wait for the service to acknowledge it
    async fn handshake(socket: &mut Socket, config: &LiveConfig) -> Result<(), SessionError> {
        let setup = serde_json::to_string(&config.to_setup())
            .map_err(|e| SessionError::Transport(format!("Failed to encode setup: {}", e)))?;

        socket
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| SessionError::Transport(format!("Failed to send setup: {}", e)))?;

        while let Some(msg) = socket.next().await {
            match msg {
                Ok(Message::Close(frame)) => {
                    return Err(SessionError::TransportClosed(
                        frame.map(|f| f.reason.as_str().to_string()),
                    ));
                }
                Ok(msg) => {
                    if let Some(server) = parse(&msg) {
                        if server.is_setup_complete() {
                            return Ok(());
                        }
                    }
                }
                Err(e) => return Err(SessionError::Transport(e.to_string())),
            }
        }

        Err(SessionError::TransportClosed(None))
    }
}

/// Decode a text or binary frame into a server message
fn parse(msg: &Message) -> Option<ServerMessage> {
    let parsed = match msg {
        Message::Text(text) => serde_json::from_str::<ServerMessage>(text.as_str()),
        Message::Binary(bytes) => serde_json::from_slice::<ServerMessage>(bytes),
        _ => return None,
    };

    match parsed {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("Failed to parse server message: {}", e);
            None
        }
    }
}

#[async_trait::async_trait]
impl SpeechTransport for LiveClient {
    async fn connect(&self, config: &LiveConfig) -> Result<OpenConnection, SessionError> {
        info!("Connecting to live service at {}", self.endpoint);

        let open = async {
            let (mut socket, _) = connect_async(self.url())
                .await
                .map_err(|e| SessionError::Transport(format!("Failed to connect: {}", e)))?;
            Self::handshake(&mut socket, config).await?;
            Ok::<_, SessionError>(socket)
        };

        let socket = tokio::time::timeout(self.connect_timeout, open)
            .await
            .map_err(|_| SessionError::Transport("Timed out opening live session".into()))??;

        info!("Live session open (model {})", config.model);

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(INBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!("Socket writer stopped: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let event = match msg {
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.as_str().to_string());
                        let _ = event_tx.send(TransportEvent::Closed(reason)).await;
                        return;
                    }
                    Ok(msg) => match parse(&msg) {
                        Some(server) => TransportEvent::Message(server),
                        None => continue,
                    },
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = event_tx.send(TransportEvent::Closed(None)).await;
        });

        Ok(OpenConnection {
            connection: Box::new(LiveSocket {
                out_tx,
                writer: Some(writer),
                reader: Some(reader),
                closed: false,
            }),
            events: event_rx,
        })
    }
}

/// Writer side of an open live session
struct LiveSocket {
    out_tx: mpsc::Sender<Message>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait::async_trait]
impl LiveConnection for LiveSocket {
    fn send_realtime_input(&self, chunk: WireAudioChunk) -> Result<()> {
        if self.closed {
            bail!("Live session is closed");
        }

        let payload = serde_json::to_string(&RealtimeInputMessage::new(chunk))?;
        match self.out_tx.try_send(Message::Text(payload.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("Socket send queue full, dropping chunk");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(anyhow!("Live session writer has stopped")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let _ = self.out_tx.send(Message::Close(None)).await;
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
                warn!("Timed out flushing close frame");
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!("Live session closed");
        Ok(())
    }
}

impl Drop for LiveSocket {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
