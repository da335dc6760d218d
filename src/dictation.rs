//! Dictation lane: speech recognition into the input field.
//!
//! Recognized text never goes straight into the history. Fragments fold into
//! a [`RecognitionTranscript`]; the caller shows [`Dictation::preview`] and
//! submits [`Dictation::take_utterance`] when the user is done.
//!
//! One recognition handle per session: acquired by [`Dictation::start`],
//! released by [`Dictation::stop`]. A provider that reports
//! [`ChatError::RecognitionUnavailable`] puts the lane into text-only mode;
//! the error is returned once and later starts are quiet no-ops.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::transcript::{RecognitionEvent, RecognitionTranscript};

/// A speech recognition engine.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Begin recognizing; fragments are sent on `events` until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RecognitionUnavailable`] when there is no device
    /// or permission was denied.
    async fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<()>;

    /// Stop recognizing and release the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to shut down cleanly.
    async fn stop(&self) -> Result<()>;
}

/// Lifecycle of the dictation lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictationState {
    /// Not listening.
    Idle,
    /// Recognition handle held; fragments arriving.
    Listening,
    /// Recognition cannot be used; the session is text-only.
    Unavailable,
}

/// Per-session dictation lane.
pub struct Dictation {
    provider: Arc<dyn RecognitionProvider>,
    state: DictationState,
    transcript: RecognitionTranscript,
    events: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
}

impl std::fmt::Debug for Dictation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictation")
            .field("state", &self.state)
            .field("transcript", &self.transcript)
            .finish_non_exhaustive()
    }
}

impl Dictation {
    /// Lane over `provider`, joining final fragments with `separator`.
    pub fn new(provider: Arc<dyn RecognitionProvider>, separator: impl Into<String>) -> Self {
        Self {
            provider,
            state: DictationState::Idle,
            transcript: RecognitionTranscript::with_separator(separator),
            events: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> DictationState {
        self.state
    }

    /// Start listening.
    ///
    /// Returns `Ok(true)` when listening, `Ok(false)` when already listening
    /// or recognition was found unavailable earlier.
    ///
    /// # Errors
    ///
    /// Returns the provider's error. [`ChatError::RecognitionUnavailable`] is
    /// returned only the first time.
    pub async fn start(&mut self) -> Result<bool> {
        match self.state {
            DictationState::Listening => return Ok(false),
            DictationState::Unavailable => {
                debug!("recognition unavailable; staying text-only");
                return Ok(false);
            }
            DictationState::Idle => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match self.provider.start(tx).await {
            Ok(()) => {
                self.events = Some(rx);
                self.state = DictationState::Listening;
                info!("dictation started");
                Ok(true)
            }
            Err(ChatError::RecognitionUnavailable(reason)) => {
                self.state = DictationState::Unavailable;
                warn!("recognition unavailable, continuing text-only: {reason}");
                Err(ChatError::RecognitionUnavailable(reason))
            }
            Err(e) => {
                warn!("dictation failed to start: {e}");
                Err(e)
            }
        }
    }

    /// Wait for the next fragment, apply it, and return it.
    ///
    /// Returns `None` when not listening or the provider closed its channel.
    pub async fn next_event(&mut self) -> Option<RecognitionEvent> {
        let rx = self.events.as_mut()?;
        match rx.recv().await {
            Some(event) => {
                self.transcript.apply(&event);
                Some(event)
            }
            None => {
                debug!("recognition provider closed its channel");
                self.events = None;
                if self.state == DictationState::Listening {
                    self.state = DictationState::Idle;
                }
                None
            }
        }
    }

    /// Stop listening and release the recognition handle.
    ///
    /// Fragments already delivered are applied before returning.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the handle is considered released anyway.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != DictationState::Listening {
            return Ok(());
        }
        let result = self.provider.stop().await;
        if let Some(mut rx) = self.events.take() {
            while let Ok(event) = rx.try_recv() {
                self.transcript.apply(&event);
            }
        }
        self.state = DictationState::Idle;
        info!("dictation stopped");
        result
    }

    /// Committed text followed by the latest interim fragment.
    pub fn preview(&self) -> String {
        self.transcript.preview()
    }

    /// Committed text only.
    pub fn committed(&self) -> &str {
        self.transcript.committed()
    }

    /// Drain the committed utterance for submission.
    pub fn take_utterance(&mut self) -> String {
        self.transcript.take_committed()
    }

    /// Discard everything heard so far.
    pub fn clear(&mut self) {
        self.transcript.clear();
    }
}
