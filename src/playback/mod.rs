//! Narration of completed replies.
//!
//! [`PlaybackSequencer`] owns one synthesizer and one sink and renders at most
//! one utterance at a time on a worker task. Overlap is resolved by
//! [`PlaybackPolicy`]: `Supersede` drops the current render (and anything
//! queued) for the newest request, `Queue` plays requests in order.
//!
//! - [`synth`]: [`SpeechSynthesizer`] and the HTTP backend
//! - [`sink`]: [`AudioSink`] and the WAV file sink

pub mod sink;
pub mod synth;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use crate::config::PlaybackPolicy;
use crate::error::{ChatError, Result};
use crate::narration;
pub use sink::{AudioSink, WavFileSink};
pub use synth::{HttpSynthesizer, Speaker, SpeechSynthesizer};

/// Capacity of the playback event channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Identifier of one enqueued utterance.
pub type UtteranceId = u64;

/// Accepts finished reply text for narration.
pub trait Playback: Send + Sync {
    /// Schedule `text` for synthesis and playback.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyUtterance`] for blank text and
    /// [`ChatError::PlaybackClosed`] if the worker has stopped.
    fn enqueue(&self, text: &str) -> Result<()>;

    /// Silence the current utterance and drop anything queued.
    fn stop(&self);
}

/// Progress reported by the playback worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Synthesis of an utterance began.
    Started {
        /// Utterance id.
        id: UtteranceId,
        /// Text as enqueued.
        text: String,
    },
    /// The utterance played to the end.
    Finished {
        /// Utterance id.
        id: UtteranceId,
    },
    /// A newer utterance replaced this one before or during playback.
    Superseded {
        /// Utterance id.
        id: UtteranceId,
    },
    /// Playback was stopped on request.
    Stopped {
        /// Utterance id.
        id: UtteranceId,
    },
    /// Synthesis or output failed. The reply text is unaffected.
    Failed {
        /// Utterance id.
        id: UtteranceId,
        /// Error description.
        error: String,
    },
}

/// Worker options.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    /// Overlap policy.
    pub policy: PlaybackPolicy,
    /// Convert Markdown to plain text before synthesis.
    pub strip_markdown: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            policy: PlaybackPolicy::Supersede,
            strip_markdown: true,
        }
    }
}

#[derive(Debug)]
struct Utterance {
    id: UtteranceId,
    text: String,
}

#[derive(Debug)]
enum Command {
    Enqueue(Utterance),
    Stop,
}

/// Handle to the playback worker of one session.
///
/// Dropping the handle stops the worker.
#[derive(Debug)]
pub struct PlaybackSequencer {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PlaybackEvent>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSequencer {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        options: PlaybackOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let worker = Worker {
            rx,
            synthesizer,
            sink,
            options,
            events: events.clone(),
            queue: VecDeque::new(),
            closed: false,
        };
        let worker = tokio::spawn(worker.run(cancel.clone()));

        info!(policy = ?options.policy, "playback worker started");
        Self {
            tx,
            events,
            next_id: AtomicU64::new(1),
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Subscribe to playback progress.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Stop the worker and wait for it to exit. Later calls return at once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return;
        };
        if let Err(e) = worker.await {
            warn!("playback worker ended abnormally: {e}");
        }
        info!("playback worker stopped");
    }
}

impl Playback for PlaybackSequencer {
    fn enqueue(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            warn!("refusing to enqueue blank narration");
            return Err(ChatError::EmptyUtterance);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, chars = text.chars().count(), "narration enqueued");
        self.tx
            .send(Command::Enqueue(Utterance {
                id,
                text: text.to_owned(),
            }))
            .map_err(|_| ChatError::PlaybackClosed("playback worker has stopped".into()))
    }

    fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

impl Drop for PlaybackSequencer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<Command>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    options: PlaybackOptions,
    events: broadcast::Sender<PlaybackEvent>,
    queue: VecDeque<Utterance>,
    /// Command channel closed; finish what is queued, then exit.
    closed: bool,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let Some(current) = self.queue.pop_front() else {
                if self.closed {
                    return;
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    command = self.rx.recv() => match command {
                        Some(Command::Enqueue(u)) => self.queue.push_back(u),
                        Some(Command::Stop) => {}
                        None => self.closed = true,
                    },
                }
                continue;
            };

            let id = current.id;
            self.emit(PlaybackEvent::Started {
                id,
                text: current.text.clone(),
            });

            let render = render(
                Arc::clone(&self.synthesizer),
                Arc::clone(&self.sink),
                current.text,
                self.options.strip_markdown,
            );
            tokio::pin!(render);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    result = &mut render => {
                        match result {
                            Ok(()) => self.emit(PlaybackEvent::Finished { id }),
                            Err(e) => {
                                warn!(id, "narration failed: {e}");
                                self.emit(PlaybackEvent::Failed { id, error: e.to_string() });
                            }
                        }
                        break;
                    }
                    command = self.rx.recv(), if !self.closed => match command {
                        Some(Command::Enqueue(next)) => match self.options.policy {
                            PlaybackPolicy::Supersede => {
                                debug!(id, next = next.id, "superseding narration");
                                self.emit(PlaybackEvent::Superseded { id });
                                for dropped in self.queue.drain(..) {
                                    self.events.send(PlaybackEvent::Superseded { id: dropped.id }).ok();
                                }
                                self.queue.push_back(next);
                                break;
                            }
                            PlaybackPolicy::Queue => self.queue.push_back(next),
                        },
                        Some(Command::Stop) => {
                            self.emit(PlaybackEvent::Stopped { id });
                            for dropped in self.queue.drain(..) {
                                self.events.send(PlaybackEvent::Stopped { id: dropped.id }).ok();
                            }
                            break;
                        }
                        None => self.closed = true,
                    },
                }
            }
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn render(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    text: String,
    strip_markdown: bool,
) -> Result<()> {
    let speech = if strip_markdown {
        narration::to_speech_text(&text)
    } else {
        text
    };
    if speech.trim().is_empty() {
        debug!("nothing speakable after markdown stripping");
        return Ok(());
    }

    let audio = synthesizer.synthesize(&speech).await.map_err(|e| match e {
        ChatError::SynthesisFailed(m) => ChatError::SynthesisFailed(m),
        other => ChatError::SynthesisFailed(other.message()),
    })?;
    sink.play(audio)
        .await
        .map_err(|e| ChatError::SynthesisFailed(format!("playback failed: {}", e.message())))
}
