//! Configuration for the Cadence voice engine
//!
//! Values load from an optional TOML file (`cadence.toml` in the project
//! config directory or a path given on the command line), with environment
//! variable overrides for deployment-sensitive fields. Every threshold the
//! engine uses is a field here; the defaults are the hand-tuned values the
//! engine ships with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Connection and keep-alive parameters
    pub connection: ConnectionConfig,

    /// Audio sample formats on the wire and at the devices
    pub audio: AudioConfig,

    /// Voice activity detection thresholds
    pub vad: VadConfig,

    /// Turn-taking and inactivity timings
    pub session: SessionConfig,

    /// Agent behavior parameters injected into the session config frame
    pub agent: AgentConfig,
}

/// Transport connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// WebSocket URL of the remote speech agent
    pub agent_url: String,

    /// Token-issuance endpoint (returns an opaque bearer credential)
    pub token_url: String,

    /// API key presented to the token endpoint (from `CADENCE_API_KEY` env)
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Seconds between keep-alive frames
    pub keepalive_secs: u64,

    /// Fixed delay before a reconnect attempt
    pub reconnect_delay_secs: u64,

    /// Reconnect attempt ceiling; exhausting it surfaces `rate_limited`
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            agent_url: "wss://localhost:7860/agent".to_string(),
            token_url: "http://localhost:7860/token".to_string(),
            api_key: None,
            keepalive_secs: 10,
            reconnect_delay_secs: 2,
            max_reconnect_attempts: 5,
        }
    }
}

impl ConnectionConfig {
    /// Keep-alive interval as a [`Duration`]
    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Reconnect delay as a [`Duration`]
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Sample formats for capture and playback
///
/// Both directions carry mono i16 little-endian linear PCM; only the rates
/// differ (16 kHz up for speech recognition, 24 kHz down from synthesis).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AudioConfig {
    /// Outbound (microphone) sample rate in Hz
    pub capture_sample_rate: u32,

    /// Inbound (synthesized) sample rate in Hz
    pub playback_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
        }
    }
}

/// Voice activity detection thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct VadConfig {
    /// Minimum RMS energy for a frame to count as speech
    pub energy_threshold: f32,

    /// Silence duration that ends an utterance
    pub silence_duration_secs: f32,

    /// Minimum accumulated speech before a segment may be emitted
    pub min_speech_duration_secs: f32,

    /// Buffer cap; exceeding it flushes a segment without resetting state
    pub max_buffer_duration_secs: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            silence_duration_secs: 1.0,
            min_speech_duration_secs: 0.1,
            max_buffer_duration_secs: 12.0,
        }
    }
}

/// Turn-taking and inactivity timings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SessionConfig {
    /// Seconds of inactivity before the session is put to sleep
    pub sleep_after_secs: u32,

    /// Seconds of inactivity before the session is torn down entirely
    pub hard_disconnect_secs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sleep_after_secs: 60,
            hard_disconnect_secs: 300,
        }
    }
}

/// Agent behavior parameters forwarded verbatim in the session config frame
///
/// The content provider that builds these strings is a collaborator; the
/// engine treats them as opaque.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AgentConfig {
    /// System prompt for the remote agent
    pub system_prompt: String,

    /// Opening line the agent speaks when the session starts
    pub first_message: Option<String>,

    /// Voice identifier understood by the remote synthesizer
    pub voice: Option<String>,
}

impl Config {
    /// Load configuration from the given file, or fall back to the default
    /// location and then to built-in defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut config = if resolved.is_file() {
            let raw = std::fs::read_to_string(&resolved)?;
            let config: Self = toml::from_str(&raw)?;
            tracing::debug!(path = %resolved.display(), "configuration loaded");
            config
        } else {
            if path.is_some() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    resolved.display()
                )));
            }
            tracing::debug!("no config file, using defaults");
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Check the fields that would otherwise fail deep inside a session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable endpoint URLs.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.connection.agent_url)
            .map_err(|e| Error::Config(format!("invalid agent_url: {e}")))?;
        url::Url::parse(&self.connection.token_url)
            .map_err(|e| Error::Config(format!("invalid token_url: {e}")))?;
        Ok(())
    }

    /// Default config file location under the platform config directory
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("dev", "omni", "cadence").map_or_else(
            || PathBuf::from("cadence.toml"),
            |dirs| dirs.config_dir().join("cadence.toml"),
        )
    }

    /// Overlay environment variables onto file/default values
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CADENCE_AGENT_URL") {
            self.connection.agent_url = url;
        }
        if let Ok(url) = std::env::var("CADENCE_TOKEN_URL") {
            self.connection.token_url = url;
        }
        if let Ok(key) = std::env::var("CADENCE_API_KEY") {
            self.connection.api_key = Some(key);
        }
    }
}
