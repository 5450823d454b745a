// Integration tests for the WebSocket live transport
//
// A local tokio-tungstenite server plays the live speech service.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use krushi_voice::audio::codec;
use krushi_voice::error::SessionError;
use krushi_voice::transport::{LiveClient, LiveConfig, SpeechTransport, TransportEvent};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

fn live_config() -> LiveConfig {
    LiveConfig {
        model: "models/live".to_string(),
        voice_name: "Puck".to_string(),
        system_instruction: "Be brief.".to_string(),
        language_code: Some("en-US".to_string()),
        response_modalities: vec!["AUDIO".to_string()],
        input_transcription: true,
        output_transcription: true,
    }
}

async fn listener() -> Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    Ok((listener, url))
}

#[tokio::test]
async fn test_full_session_exchange() -> Result<()> {
    let (listener, url) = listener().await?;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let setup = ws.next().await.unwrap().unwrap();
        seen_tx
            .send(serde_json::from_str(setup.to_text().unwrap()).unwrap())
            .unwrap();
        ws.send(Message::Text(r#"{"setupComplete": {}}"#.into()))
            .await
            .unwrap();

        let input = ws.next().await.unwrap().unwrap();
        seen_tx
            .send(serde_json::from_str(input.to_text().unwrap()).unwrap())
            .unwrap();

        ws.send(Message::Text(
            r#"{"serverContent": {"outputTranscription": {"text": "Ram Ram"}, "turnComplete": true}}"#
                .into(),
        ))
        .await
        .unwrap();
        ws.close(None).await.unwrap();
    });

    let client = LiveClient::new(url, None, Duration::from_secs(5));
    let mut open = client.connect(&live_config()).await?;

    let setup = seen_rx.recv().await.unwrap();
    assert_eq!(setup["setup"]["model"], "models/live");
    assert_eq!(setup["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");

    open.connection
        .send_realtime_input(codec::encode(&[0.0, 0.5]))?;
    let input = seen_rx.recv().await.unwrap();
    assert_eq!(
        input["realtimeInput"]["mediaChunks"][0]["mimeType"],
        "audio/pcm;rate=16000"
    );

    match open.events.recv().await {
        Some(TransportEvent::Message(msg)) => {
            assert_eq!(msg.output_transcript(), Some("Ram Ram"));
            assert!(msg.turn_complete());
        }
        other => panic!("expected a server message, got {:?}", other),
    }

    assert!(matches!(
        open.events.recv().await,
        Some(TransportEvent::Closed(_))
    ));

    open.connection.close().await?;
    // Second close is a no-op
    open.connection.close().await?;
    assert!(open.connection.send_realtime_input(codec::encode(&[0.0])).is_err());

    Ok(())
}

#[tokio::test]
async fn test_close_before_setup_complete() -> Result<()> {
    let (listener, url) = listener().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await;
        ws.close(None).await.unwrap();
    });

    let client = LiveClient::new(url, None, Duration::from_secs(5));
    let result = client.connect(&live_config()).await;

    assert!(matches!(result, Err(SessionError::TransportClosed(_))));
    Ok(())
}

#[tokio::test]
async fn test_setup_timeout() -> Result<()> {
    let (listener, url) = listener().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Read the setup but never acknowledge it
        while ws.next().await.is_some() {}
    });

    let client = LiveClient::new(url, None, Duration::from_millis(200));
    let result = client.connect(&live_config()).await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let client = LiveClient::new("ws://127.0.0.1:9", None, Duration::from_secs(2));
    let result = client.connect(&live_config()).await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
}
