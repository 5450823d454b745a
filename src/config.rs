use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::{FarmerProfile, PartialPolicy, RetryPolicy, SessionConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub recordings_path: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    pub endpoint: String,
    /// Usually supplied through `KRUSHI__TRANSPORT__API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub voice_name: String,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_close_backoff_ms")]
    pub close_backoff_ms: u64,
    #[serde(default)]
    pub partial_policy: PartialPolicy,
    #[serde(default)]
    pub skip_empty_turns: bool,
    #[serde(default)]
    pub profile: Option<FarmerProfile>,
}

fn default_error_backoff_ms() -> u64 {
    1500
}

fn default_close_backoff_ms() -> u64 {
    800
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            error_backoff_ms: default_error_backoff_ms(),
            close_backoff_ms: default_close_backoff_ms(),
            partial_policy: PartialPolicy::default(),
            skip_empty_turns: false,
            profile: None,
        }
    }
}

impl Config {
    /// Load `path` (extension optional) with `KRUSHI__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("KRUSHI").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.connect_timeout_ms)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();

        SessionConfig {
            model: self.transport.model.clone(),
            voice_name: self.transport.voice_name.clone(),
            frame_size: self.audio.frame_size,
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            recordings_dir: PathBuf::from(&self.audio.recordings_path),
            retry: RetryPolicy {
                error_backoff: Duration::from_millis(self.session.error_backoff_ms),
                close_backoff: Duration::from_millis(self.session.close_backoff_ms),
            },
            partial_policy: self.session.partial_policy,
            skip_empty_turns: self.session.skip_empty_turns,
            profile: self.session.profile.clone().unwrap_or(defaults.profile),
            persona: defaults.persona,
        }
    }
}
