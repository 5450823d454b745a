//! Remote live speech service
//!
//! A connection carries microphone chunks out and server messages (audio,
//! transcription deltas, turn boundaries) back. The session engine only sees
//! the `SpeechTransport` trait; `LiveClient` is the WebSocket implementation.

pub mod client;
pub mod messages;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::audio::WireAudioChunk;
use crate::error::SessionError;
pub use client::LiveClient;
pub use messages::{
    Content, Empty, GenerationConfig, PrebuiltVoiceConfig, RealtimeInputMessage, ServerMessage,
    Setup, SetupMessage, SpeechConfig, TextPart, VoiceConfig,
};

/// Per-connection session configuration sent on open
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    /// BCP-47 code of the conversation language, e.g. `mr-IN`
    pub language_code: Option<String>,
    pub response_modalities: Vec<String>,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl LiveConfig {
    pub fn to_setup(&self) -> SetupMessage {
        SetupMessage {
            setup: Setup {
                model: self.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: self.response_modalities.clone(),
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: self.voice_name.clone(),
                            },
                        },
                        language_code: self.language_code.clone(),
                    },
                },
                system_instruction: (!self.system_instruction.is_empty()).then(|| Content {
                    parts: vec![TextPart {
                        text: self.system_instruction.clone(),
                    }],
                }),
                input_audio_transcription: self.input_transcription.then(Empty::default),
                output_audio_transcription: self.output_transcription.then(Empty::default),
            },
        }
    }
}

/// Something that happened on an open connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// The connection failed mid-session
    Error(String),
    /// The remote side closed the connection
    Closed(Option<String>),
}

/// An open duplex session
#[async_trait::async_trait]
pub trait LiveConnection: Send + Sync {
    /// Queue a microphone chunk for sending. Never waits on the network.
    fn send_realtime_input(&self, chunk: WireAudioChunk) -> Result<()>;

    /// Close the session. Only the first call has any effect.
    async fn close(&mut self) -> Result<()>;
}

/// An opened connection and the stream of its events
pub struct OpenConnection {
    pub connection: Box<dyn LiveConnection>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait::async_trait]
pub trait SpeechTransport: Send + Sync {
    /// Open a session. Resolves once the service has accepted the configuration.
    async fn connect(&self, config: &LiveConfig) -> Result<OpenConnection, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LiveConfig {
        LiveConfig {
            model: "models/live".to_string(),
            voice_name: "Puck".to_string(),
            system_instruction: "Be brief.".to_string(),
            language_code: Some("mr-IN".to_string()),
            response_modalities: vec!["AUDIO".to_string()],
            input_transcription: true,
            output_transcription: true,
        }
    }

    #[test]
    fn test_setup_serialization() {
        let json = serde_json::to_value(config().to_setup()).unwrap();

        assert_eq!(json["setup"]["model"], "models/live");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["languageCode"],
            "mr-IN"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_setup_omits_disabled_transcription() {
        let mut config = config();
        config.input_transcription = false;
        config.system_instruction.clear();

        let json = serde_json::to_value(config.to_setup()).unwrap();
        assert!(json["setup"].get("inputAudioTranscription").is_none());
        assert!(json["setup"].get("systemInstruction").is_none());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_server_content_parsing() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{
                "serverContent": {
                    "modelTurn": {"parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                        {"text": "thinking"},
                        {"inlineData": {"data": "AQA="}}
                    ]},
                    "outputTranscription": {"text": "Ram Ram"},
                    "inputTranscription": {"text": "namaskar"},
                    "turnComplete": true
                }
            }"#,
        )
        .unwrap();

        assert_eq!(msg.output_transcript(), Some("Ram Ram"));
        assert_eq!(msg.input_transcript(), Some("namaskar"));
        assert!(msg.turn_complete());
        assert_eq!(msg.audio_payloads().collect::<Vec<_>>(), vec!["AAA=", "AQA="]);
        assert!(!msg.is_setup_complete());
    }

    #[test]
    fn test_setup_complete_parsing() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(!msg.turn_complete());
        assert_eq!(msg.audio_payloads().count(), 0);
    }

    #[test]
    fn test_realtime_input_serialization() {
        let chunk = crate::audio::codec::encode(&[0.0]);
        let json = serde_json::to_value(RealtimeInputMessage::new(chunk)).unwrap();

        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");
    }
}
