//! PCM16 wire codec
//!
//! Outbound microphone frames are quantized to signed 16-bit little-endian PCM
//! and base64 framed. Inbound assistant audio arrives the same way at 24 kHz.

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::backend::{AudioFrame, AudioStreamSource};
use crate::error::DecodeError;

/// Microphone capture rate expected by the remote service
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate of synthesized speech returned by the remote service
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Format tag attached to every outbound chunk
pub const OUTBOUND_MIME_TYPE: &str = "audio/pcm;rate=16000";

const SCALE: f32 = 32768.0;

/// Base64-framed PCM ready for the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAudioChunk {
    /// Base64-encoded little-endian PCM16 bytes
    pub data: String,
    pub mime_type: String,
}

impl WireAudioChunk {
    /// Raw PCM bytes carried by this chunk
    pub fn payload(&self) -> Result<Vec<u8>, DecodeError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
    }
}

/// Quantize a single normalized sample
fn quantize(sample: f32) -> i16 {
    (sample * SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a mono frame of normalized samples into a wire chunk
pub fn encode(samples: &[f32]) -> WireAudioChunk {
    let pcm_bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| quantize(s).to_le_bytes())
        .collect();

    WireAudioChunk {
        data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
        mime_type: OUTBOUND_MIME_TYPE.to_string(),
    }
}

/// Decode interleaved PCM16 bytes into a planar frame
pub fn decode(bytes: &[u8], sample_rate: u32, channel_count: u16) -> Result<AudioFrame, DecodeError> {
    if channel_count == 0 {
        return Err(DecodeError::NoChannels);
    }

    let stride = 2 * channel_count as usize;
    if bytes.len() % stride != 0 {
        return Err(DecodeError::MisalignedLength {
            len: bytes.len(),
            channels: channel_count,
        });
    }

    let frame_count = bytes.len() / stride;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count as usize];

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % channel_count as usize].push(value as f32 / SCALE);
    }

    Ok(AudioFrame {
        channels,
        sample_rate,
        source: AudioStreamSource::Assistant,
        timestamp_ms: 0,
    })
}

/// Decode a base64 inline-data payload
pub fn decode_base64(data: &str, sample_rate: u32, channel_count: u16) -> Result<AudioFrame, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
    decode(&bytes, sample_rate, channel_count)
}
