//! Speech synthesis providers.
//!
//! [`HttpSynthesizer`] calls the backend's `/api/tts` endpoint, which takes
//! form fields `text`, `speaker`, `speed` and answers with WAV bytes.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::TtsConfig;
use crate::error::{ChatError, Result};

/// Turns text into encoded audio. One call in flight per session.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SynthesisFailed`] if the engine cannot render it.
    async fn synthesize(&self, text: &str) -> Result<Bytes>;
}

/// A preset voice offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Speaker {
    /// Speaker id to put in [`TtsConfig::speaker`].
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct SpeakersResponse {
    #[serde(default)]
    speakers: Vec<Speaker>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    healthy: bool,
}

/// [`SpeechSynthesizer`] over the backend's HTTP TTS endpoint.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    speaker: String,
    speed: f32,
}

impl HttpSynthesizer {
    /// Build a synthesizer from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            speaker: config.speaker.clone(),
            speed: config.speed,
        })
    }

    /// Whether the backend reports its TTS engine as healthy.
    ///
    /// Any transport or decoding problem counts as unhealthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tts/health", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!("TTS health check returned HTTP {}", r.status().as_u16());
                return false;
            }
            Err(e) => {
                warn!("TTS health check failed: {e}");
                return false;
            }
        };
        response
            .json::<HealthResponse>()
            .await
            .map(|h| h.healthy)
            .unwrap_or(false)
    }

    /// Preset speakers available on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] on request or decoding failure.
    pub async fn speakers(&self) -> Result<Vec<Speaker>> {
        let url = format!("{}/api/tts/speakers", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ChatError::Transport(format!(
                "speaker list returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let body: SpeakersResponse = response.json().await?;
        Ok(body.speakers)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        let url = format!("{}/api/tts", self.base_url);
        let speed = self.speed.to_string();
        let form = [
            ("text", text),
            ("speaker", self.speaker.as_str()),
            ("speed", speed.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ChatError::SynthesisFailed(format!("TTS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::SynthesisFailed(format!(
                "TTS HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ChatError::SynthesisFailed(format!("TTS read failed: {e}")))?;
        info!(
            "synthesized {} chars into {} bytes",
            text.chars().count(),
            audio.len()
        );
        Ok(audio)
    }
}
