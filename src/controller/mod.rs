//! Turn controller: drives one conversation's send/stream/complete cycle.
//!
//! The rules live in [`machine`]; this module performs the effects. One
//! turn at a time: [`TurnController::submit`] returns
//! [`SubmitOutcome::Busy`] while a reply is in flight. The stream read is
//! raced against a [`CancellationToken`] so [`TurnController::cancel`] stops
//! it promptly.
//!
//! The session lock is never held across an `.await`.

pub mod machine;

pub use machine::{Effect, SessionEvent, TurnInput, TurnMachine, TurnState, transition};

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::playback::Playback;
use crate::protocol::decode_stream;
use crate::session::{Session, Turn};
use crate::transport::{ChatRequest, ChatTransport};

/// Capacity of the session event channel.
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Failure message of a turn whose `submit` future was dropped.
pub const TURN_ABANDONED: &str = "turn abandoned before completion";

/// Result of [`TurnController::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A turn was already in flight; nothing was created.
    Busy,
    /// The turn ran to a frozen state. Holds the assistant turn.
    Finished(Turn),
}

struct Inner {
    machine: TurnMachine,
    cancel: Option<CancellationToken>,
}

/// Settles the turn if the `submit` future is dropped before `drive` returns,
/// so no turn is left `Streaming` and the controller returns to idle.
struct SettleGuard<'a> {
    controller: &'a TurnController,
    armed: bool,
}

impl SettleGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon();
        }
    }
}

/// Owns one session and runs its turns.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct TurnController {
    inner: Arc<Mutex<Inner>>,
    transport: Arc<dyn ChatTransport>,
    playback: Option<Arc<dyn Playback>>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("state", &self.state())
            .field("playback", &self.playback.is_some())
            .finish_non_exhaustive()
    }
}

impl TurnController {
    /// Controller for a fresh session.
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self::with_session(transport, Session::new())
    }

    /// Controller continuing `session`.
    pub fn with_session(transport: Arc<dyn ChatTransport>, session: Session) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                machine: TurnMachine::new(session),
                cancel: None,
            })),
            transport,
            playback: None,
            events,
        }
    }

    /// Narrate completed replies through `playback`.
    pub fn with_playback(mut self, playback: Arc<dyn Playback>) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Subscribe to session changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> TurnState {
        self.lock().machine.state()
    }

    /// Copy of the session as it is now.
    pub fn snapshot(&self) -> Session {
        self.lock().machine.session().clone()
    }

    /// Submit `text` and drive the reply to completion.
    ///
    /// The user turn and an empty streaming assistant turn are in the
    /// history before this first suspends.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyInput`] for blank text. Stream failures are
    /// not errors here; they are recorded on the returned turn.
    pub async fn submit(&self, text: &str) -> Result<SubmitOutcome> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let (request, cancel) = {
            let mut inner = self.lock();
            if inner.machine.state().is_active() {
                debug!("submit refused: turn in flight");
                return Ok(SubmitOutcome::Busy);
            }
            let cancel = CancellationToken::new();
            inner.cancel = Some(cancel.clone());
            match self.apply(&mut inner, TurnInput::Submit(text.to_owned())) {
                Some(request) => (request, cancel),
                None => {
                    inner.cancel = None;
                    return Ok(SubmitOutcome::Busy);
                }
            }
        };

        let guard = SettleGuard {
            controller: self,
            armed: true,
        };
        self.drive(request, &cancel).await;
        guard.disarm();

        let mut inner = self.lock();
        self.settle(&mut inner);
        match inner.machine.session().last_turn() {
            Some(turn) => Ok(SubmitOutcome::Finished(turn.clone())),
            None => Err(ChatError::Transport("history lost during turn".to_owned())),
        }
    }

    fn settle(&self, inner: &mut Inner) {
        self.apply(inner, TurnInput::Settle);
        inner.cancel = None;
    }

    /// Freeze and settle a turn whose `submit` future was dropped mid-flight.
    fn abandon(&self) {
        let mut inner = self.lock();
        if let Some(cancel) = &inner.cancel {
            cancel.cancel();
        }
        if inner.machine.state().is_open() {
            warn!("submit dropped before the turn finished");
            self.apply(
                &mut inner,
                TurnInput::StreamFailed(ChatError::Cancelled(TURN_ABANDONED.to_owned())),
            );
        }
        self.settle(&mut inner);
    }

    /// Abort the turn in flight.
    ///
    /// Returns `true` if a turn was cancelled. A no-op once `done` has been
    /// processed or when idle.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        let effects = transition(&mut inner.machine, TurnInput::Cancel);
        let cancelled = effects.contains(&Effect::AbortStream);
        self.perform(&mut inner, effects);
        cancelled
    }

    async fn drive(&self, request: ChatRequest, cancel: &CancellationToken) {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = self.transport.open(&request) => opened,
        };

        let bytes = match opened {
            Ok(bytes) => bytes,
            Err(e) => {
                self.feed(TurnInput::StreamFailed(e));
                return;
            }
        };
        self.feed(TurnInput::RequestOpened);

        let mut events = decode_stream(bytes);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("stream read aborted");
                    return;
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    let terminal = event.is_terminal();
                    self.feed(TurnInput::Stream(event));
                    if terminal {
                        return;
                    }
                }
                Some(Err(e)) => {
                    self.feed(TurnInput::StreamFailed(e));
                    return;
                }
                None => return,
            }
        }
    }

    fn feed(&self, input: TurnInput) {
        let mut inner = self.lock();
        self.apply(&mut inner, input);
    }

    /// Run a transition and perform its effects. Returns the request to open,
    /// if the transition asked for one.
    fn apply(&self, inner: &mut Inner, input: TurnInput) -> Option<ChatRequest> {
        let effects = transition(&mut inner.machine, input);
        self.perform(inner, effects)
    }

    fn perform(&self, inner: &mut Inner, effects: Vec<Effect>) -> Option<ChatRequest> {
        let mut open = None;
        for effect in effects {
            match effect {
                Effect::OpenStream(request) => open = Some(request),
                Effect::AbortStream => {
                    if let Some(cancel) = &inner.cancel {
                        cancel.cancel();
                    }
                }
                Effect::Play(text) => {
                    if let Some(playback) = &self.playback
                        && let Err(e) = playback.enqueue(&text)
                    {
                        warn!("narration not scheduled: {e}");
                    }
                }
                Effect::Notify(event) => {
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                }
            }
        }
        open
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
