//! Configuration types for a voice chat session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChatError, Result};

/// Environment variable overriding [`ChatEndpointConfig::base_url`].
pub const ENV_BASE_URL: &str = "VOXCHAT_BASE_URL";
/// Environment variable overriding [`ChatEndpointConfig::agent_id`].
pub const ENV_AGENT_ID: &str = "VOXCHAT_AGENT_ID";
/// Environment variable overriding [`TtsConfig::base_url`].
pub const ENV_TTS_URL: &str = "VOXCHAT_TTS_URL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Streaming chat endpoint.
    pub chat: ChatEndpointConfig,
    /// Speech synthesis backend.
    pub tts: TtsConfig,
    /// Narration of completed replies.
    pub playback: PlaybackConfig,
    /// Dictation (speech recognition) settings.
    pub recognition: RecognitionConfig,
}

/// Chat endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatEndpointConfig {
    /// Backend base URL, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Agent whose `/chat/stream` endpoint is used.
    pub agent_id: String,
    /// Optional user id forwarded with each request.
    pub user_id: Option<String>,
    /// Connect timeout in seconds. The stream itself has no overall timeout.
    pub connect_timeout_secs: u64,
}

impl Default for ChatEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_owned(),
            agent_id: String::new(),
            user_id: None,
            connect_timeout_secs: 10,
        }
    }
}

impl ChatEndpointConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Speech synthesis backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL of the backend exposing `/api/tts`.
    pub base_url: String,
    /// Preset speaker id.
    pub speaker: String,
    /// Speech speed, 0.5 to 2.0.
    pub speed: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_owned(),
            speaker: "default".to_owned(),
            speed: 1.0,
            timeout_secs: 30,
        }
    }
}

impl TtsConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What to do when a reply finishes while another is still being narrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPolicy {
    /// Stop the current narration and start the newest one.
    #[default]
    Supersede,
    /// Play narrations one after another in arrival order.
    Queue,
}

/// Narration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Speak completed replies aloud.
    pub enabled: bool,
    /// Overlap policy.
    pub policy: PlaybackPolicy,
    /// Convert Markdown to plain text before synthesis.
    pub strip_markdown: bool,
    /// Directory the terminal client writes rendered audio into.
    pub output_dir: Option<PathBuf>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: PlaybackPolicy::Supersede,
            strip_markdown: true,
            output_dir: None,
        }
    }
}

/// Dictation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Recognition locale, e.g. `zh-CN`.
    pub locale: String,
    /// Inserted between consecutive final fragments. Empty for CJK locales.
    pub separator: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            locale: "zh-CN".to_owned(),
            separator: String::new(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxchat/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voxchat")
            .join("config.toml")
    }

    /// Apply `VOXCHAT_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.chat.base_url = url;
        }
        if let Some(agent) = lookup(ENV_AGENT_ID).filter(|v| !v.trim().is_empty()) {
            self.chat.agent_id = agent;
        }
        if let Some(url) = lookup(ENV_TTS_URL).filter(|v| !v.trim().is_empty()) {
            self.tts.base_url = url;
        }
    }

    /// Check that the configuration can drive a session.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.chat.base_url.trim().is_empty() {
            return Err(ChatError::Config("chat.base_url is empty".into()));
        }
        if self.chat.agent_id.trim().is_empty() {
            return Err(ChatError::Config("chat.agent_id is empty".into()));
        }
        if self.playback.enabled {
            if self.tts.base_url.trim().is_empty() {
                return Err(ChatError::Config("tts.base_url is empty".into()));
            }
            if !(0.5..=2.0).contains(&self.tts.speed) {
                return Err(ChatError::Config(format!(
                    "tts.speed must be within 0.5..=2.0, got {}",
                    self.tts.speed
                )));
            }
        }
        Ok(())
    }
}
