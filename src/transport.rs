//! Chat-turn transport.
//!
//! [`ChatTransport`] opens the streaming endpoint and hands back raw body
//! chunks; decoding is done by [`crate::protocol`]. [`HttpChatTransport`]
//! talks to `POST {base_url}/api/agents/{agent_id}/chat/stream`.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ChatEndpointConfig;
use crate::error::{ChatError, Result};

/// A boxed stream of raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Request body of one chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Continuity token from the previous completed turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Optional user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ChatRequest {
    /// Request for `message` continuing `thread_id`.
    pub fn new(message: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            thread_id,
            user_id: None,
        }
    }

    /// Attach a user id.
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Opens one streamed reply per call.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `request` and return the response body as raw chunks.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] when the request cannot be sent or
    /// the server answers with a non-success status.
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// [`ChatTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    url: String,
    user_id: Option<String>,
}

impl HttpChatTransport {
    /// Build a transport for the configured agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent id is empty or the HTTP client cannot be built.
    pub fn new(config: &ChatEndpointConfig) -> Result<Self> {
        if config.agent_id.trim().is_empty() {
            return Err(ChatError::Config("chat.agent_id is empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("cannot build HTTP client: {e}")))?;

        let url = stream_url(&config.base_url, &config.agent_id);
        info!("chat transport configured: {url}");

        Ok(Self {
            client,
            url,
            user_id: config.user_id.clone(),
        })
    }

    /// Endpoint URL requests are sent to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> ChatError {
        let message = extract_error_message(body);
        ChatError::Transport(format!("HTTP {}: {message}", status.as_u16()))
    }
}

/// Streaming endpoint for `agent_id` under `base_url`.
fn stream_url(base_url: &str, agent_id: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/api/agents/{agent_id}/chat/stream")
}

/// Pull `detail` out of an error body, falling back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream> {
        let mut body = request.clone();
        if body.user_id.is_none() {
            body.user_id = self.user_id.clone();
        }

        debug!(
            thread_id = body.thread_id.as_deref().unwrap_or("-"),
            "opening chat stream"
        );

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatError::Transport(format!("read error: {e}"))));
        Ok(Box::pin(stream))
    }
}
