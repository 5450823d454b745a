// Integration tests for the file-backed devices
//
// These tests verify that a WAV file can stand in for the microphone and that
// a session recording round-trips through disk.

use anyhow::Result;
use krushi_voice::audio::{
    AudioBackendConfig, AudioDevices, AudioFile, CaptureStream, FileDevices,
};
use krushi_voice::error::SessionError;
use krushi_voice::recording::SessionRecorder;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_fixture(dir: &Path, name: &str, rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_fixture(dir.path(), "farmer.wav", 16000, 1, &vec![1000; 16000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 16000);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9);
    assert!(audio.path.contains("farmer.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_stereo_48k_becomes_mono_16k() -> Result<()> {
    let dir = TempDir::new()?;
    // Left at half scale, right silent: the mono mix sits at a quarter
    let interleaved: Vec<i16> = (0..48000).flat_map(|_| [16384i16, 0]).collect();
    let path = write_fixture(dir.path(), "stereo.wav", 48000, 2, &interleaved);

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.samples.len() % audio.channels as usize, 0);

    let mono = audio.to_mono(16000)?;
    assert!(mono.len() > 15900 && mono.len() < 16100, "got {}", mono.len());

    // Away from the filter edges the level is preserved
    let middle = &mono[4000..12000];
    assert!(middle.iter().all(|s| (s - 0.25).abs() < 0.01));

    Ok(())
}

#[tokio::test]
async fn test_missing_microphone_file_is_permission_error() {
    let devices = FileDevices::new("/nonexistent/mic.wav");
    let result = devices.open_microphone(&AudioBackendConfig::default()).await;

    assert!(matches!(result, Err(SessionError::Permission(_))));
}

#[tokio::test(start_paused = true)]
async fn test_file_microphone_feeds_capture_and_recording() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_fixture(dir.path(), "mic.wav", 16000, 1, &vec![8192; 8192]);

    let mut recorder = SessionRecorder::new("file-mic", dir.path().join("recordings"), 24000);
    recorder.start();

    let devices = FileDevices::new(&path);
    let microphone = devices.open_microphone(&AudioBackendConfig::default()).await?;

    let mut capture = CaptureStream::default();
    let mut chunks = capture
        .start(microphone, Some(recorder.microphone_tap(16000)?))
        .await?;

    let first = chunks.recv().await.unwrap();
    let second = chunks.recv().await.unwrap();
    assert_eq!(first.mime_type, "audio/pcm;rate=16000");
    assert_eq!(first.payload()?.len(), 4096 * 2);
    assert_eq!(second.payload()?.len(), 4096 * 2);

    capture.stop().await?;
    // Stopping twice is fine
    capture.stop().await?;

    let artifact = recorder.stop()?;
    assert!(artifact.segment_count >= 2);
    assert!(artifact.path.exists());

    let reader = hound::WavReader::open(&artifact.path)?;
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.spec().channels, 1);
    assert!(reader.duration() > 0);

    Ok(())
}
