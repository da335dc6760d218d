//! Per-session bundle of the turn controller, narration, and dictation.
//!
//! Recognizer and synthesizer are owned here, not held as process-wide
//! singletons. The recognition handle is acquired on the first
//! [`VoiceSession::start_dictation`] and everything is released by
//! [`VoiceSession::shutdown`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::controller::{SubmitOutcome, TurnController, TurnState};
use crate::dictation::{Dictation, DictationState, RecognitionProvider};
use crate::error::{ChatError, Result};
use crate::playback::{HttpSynthesizer, Playback, PlaybackOptions, PlaybackSequencer, WavFileSink};
use crate::session::Session;
use crate::transcript::RecognitionEvent;
use crate::transport::{ChatTransport, HttpChatTransport};

/// One live conversation with typed and spoken input.
pub struct VoiceSession {
    controller: TurnController,
    playback: Option<Arc<PlaybackSequencer>>,
    recognizer: Option<Arc<dyn RecognitionProvider>>,
    separator: String,
    dictation: Option<Dictation>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("controller", &self.controller)
            .field("playback", &self.playback.is_some())
            .field("dictation", &self.dictation_state())
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    /// Text-only session over `transport`.
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            controller: TurnController::new(transport),
            playback: None,
            recognizer: None,
            separator: String::new(),
            dictation: None,
        }
    }

    /// Session wired from configuration: HTTP chat, and HTTP synthesis into
    /// WAV files when playback is enabled and an output directory is set.
    ///
    /// Must be called inside a tokio runtime when playback is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the HTTP clients cannot be built, or
    /// an I/O error if the output directory cannot be created.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let transport = Arc::new(HttpChatTransport::new(&config.chat)?);
        let mut session = Self::new(transport);
        session.separator = config.recognition.separator.clone();

        match (config.playback.enabled, &config.playback.output_dir) {
            (true, Some(dir)) => {
                let synthesizer = Arc::new(HttpSynthesizer::new(&config.tts)?);
                let sink = Arc::new(WavFileSink::new(dir)?);
                let options = PlaybackOptions {
                    policy: config.playback.policy,
                    strip_markdown: config.playback.strip_markdown,
                };
                session = session.with_playback(Arc::new(PlaybackSequencer::spawn(
                    synthesizer,
                    sink,
                    options,
                )));
            }
            (true, None) => info!("playback enabled but no output_dir set; narration off"),
            (false, _) => {}
        }
        Ok(session)
    }

    /// Narrate completed replies through `playback`.
    pub fn with_playback(mut self, playback: Arc<PlaybackSequencer>) -> Self {
        self.controller = self.controller.with_playback(playback.clone());
        self.playback = Some(playback);
        self
    }

    /// Enable dictation through `provider`, joining final fragments with
    /// `separator`.
    pub fn with_recognizer(
        mut self,
        provider: Arc<dyn RecognitionProvider>,
        separator: impl Into<String>,
    ) -> Self {
        self.recognizer = Some(provider);
        self.separator = separator.into();
        self
    }

    /// The turn controller. Clone it to submit from another task.
    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    /// The playback worker, if narration is on.
    pub fn playback(&self) -> Option<&Arc<PlaybackSequencer>> {
        self.playback.as_ref()
    }

    /// Copy of the session as it is now.
    pub fn snapshot(&self) -> Session {
        self.controller.snapshot()
    }

    /// Turn controller state.
    pub fn state(&self) -> TurnState {
        self.controller.state()
    }

    /// Submit typed text.
    ///
    /// # Errors
    ///
    /// See [`TurnController::submit`].
    pub async fn submit(&self, text: &str) -> Result<SubmitOutcome> {
        self.controller.submit(text).await
    }

    /// Abort the turn in flight and silence narration.
    pub fn cancel(&self) -> bool {
        let cancelled = self.controller.cancel();
        if cancelled && let Some(playback) = &self.playback {
            playback.stop();
        }
        cancelled
    }

    /// Dictation state; `Unavailable` when no recognizer is configured.
    pub fn dictation_state(&self) -> DictationState {
        match (&self.dictation, &self.recognizer) {
            (Some(d), _) => d.state(),
            (None, Some(_)) => DictationState::Idle,
            (None, None) => DictationState::Unavailable,
        }
    }

    /// Start dictation. `Ok(false)` when already listening or text-only.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RecognitionUnavailable`] the first time the
    /// recognizer turns out to be unusable.
    pub async fn start_dictation(&mut self) -> Result<bool> {
        let Some(dictation) = self.dictation_mut() else {
            return Ok(false);
        };
        dictation.start().await
    }

    /// Next recognition fragment, applied to the input preview.
    pub async fn next_recognition_event(&mut self) -> Option<RecognitionEvent> {
        self.dictation.as_mut()?.next_event().await
    }

    /// Stop dictation and release the recognizer.
    ///
    /// # Errors
    ///
    /// Returns the recognizer's error.
    pub async fn stop_dictation(&mut self) -> Result<()> {
        match self.dictation.as_mut() {
            Some(dictation) => dictation.stop().await,
            None => Ok(()),
        }
    }

    /// Input-field preview of what has been heard.
    pub fn dictation_preview(&self) -> String {
        self.dictation
            .as_ref()
            .map(Dictation::preview)
            .unwrap_or_default()
    }

    /// Submit the committed dictation.
    ///
    /// The utterance is drained only once a turn has been started for it; it
    /// stays in the input buffer when another turn is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyInput`] when nothing has been committed.
    pub async fn submit_dictation(&mut self) -> Result<SubmitOutcome> {
        let utterance = match self.dictation.as_ref() {
            Some(dictation) if !dictation.committed().trim().is_empty() => {
                dictation.committed().to_owned()
            }
            _ => return Err(ChatError::EmptyInput),
        };
        let outcome = self.controller.submit(&utterance).await?;
        if outcome != SubmitOutcome::Busy
            && let Some(dictation) = self.dictation.as_mut()
        {
            dictation.take_utterance();
        }
        Ok(outcome)
    }

    /// Cancel the turn, release the recognizer, and stop the playback worker.
    pub async fn shutdown(&mut self) {
        self.controller.cancel();
        if let Err(e) = self.stop_dictation().await {
            warn!("recognizer did not stop cleanly: {e}");
        }
        if let Some(playback) = &self.playback {
            playback.shutdown().await;
        }
        info!(session = %self.controller.snapshot().id(), "voice session shut down");
    }

    fn dictation_mut(&mut self) -> Option<&mut Dictation> {
        if self.dictation.is_none() {
            let provider = self.recognizer.clone()?;
            self.dictation = Some(Dictation::new(provider, self.separator.clone()));
        }
        self.dictation.as_mut()
    }
}
