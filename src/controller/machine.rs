//! Turn lifecycle as a pure state machine.
//!
//! Every stimulus the controller sees (a submit, a decoded event, a read
//! failure, a cancel) is a [`TurnInput`]. [`transition`] applies one input
//! to a [`TurnMachine`] and returns the [`Effect`]s the driver must perform.
//! No I/O happens here, so whole conversations can be replayed in tests.
//!
//! ```text
//! Idle ──Submit──▶ Sending ──RequestOpened──▶ Streaming ──Done──▶ Completing ──Settle──▶ Idle
//!                     │                           │
//!                     └────Error / failure / Cancel──────▶ Failed ──Settle──▶ Idle
//! ```

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::protocol::StreamEvent;
use crate::session::{FailureKind, Session, Turn, TurnFailure, TurnStatus};
use crate::transcript::TurnText;
use crate::transport::ChatRequest;

/// Failure message of a turn the user cancelled.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Ready for input.
    Idle,
    /// Request issued, no response yet.
    Sending,
    /// Reply arriving.
    Streaming,
    /// `done` processed; waiting to settle.
    Completing,
    /// Turn failed or was cancelled; waiting to settle.
    Failed,
}

impl TurnState {
    /// Whether a turn is in flight (a new submit would be refused).
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Whether the stream is still being read.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

/// Everything that can happen to a turn.
#[derive(Debug)]
pub enum TurnInput {
    /// User submitted text.
    Submit(String),
    /// The transport accepted the request.
    RequestOpened,
    /// The decoder produced an event.
    Stream(StreamEvent),
    /// Opening or reading the stream failed.
    StreamFailed(ChatError),
    /// User asked to abort.
    Cancel,
    /// The driver is done with the turn.
    Settle,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the reply stream for this request.
    OpenStream(ChatRequest),
    /// Narrate the completed reply.
    Play(String),
    /// Stop reading the reply stream.
    AbortStream,
    /// Tell observers.
    Notify(SessionEvent),
}

/// Session change broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A turn was added to the history.
    TurnAppended {
        /// History index.
        index: usize,
        /// The new turn.
        turn: Turn,
    },
    /// Text was appended to the streaming turn.
    ContentAppended {
        /// History index.
        index: usize,
        /// The appended fragment.
        delta: String,
    },
    /// A turn was frozen.
    TurnUpdated {
        /// History index.
        index: usize,
        /// The turn after the change.
        turn: Turn,
    },
    /// The server assigned or rotated the thread id.
    ThreadIdChanged(String),
    /// The controller moved to a new state.
    StateChanged(TurnState),
}

/// State plus the session it owns.
#[derive(Debug)]
pub struct TurnMachine {
    state: TurnState,
    session: Session,
    reply: TurnText,
}

impl TurnMachine {
    /// Machine over `session`, starting idle.
    pub fn new(session: Session) -> Self {
        Self {
            state: TurnState::Idle,
            session,
            reply: TurnText::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// The session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Text of the reply in progress (or just finished).
    pub fn reply(&self) -> &str {
        self.reply.as_str()
    }

    fn set_state(&mut self, state: TurnState, effects: &mut Vec<Effect>) {
        if self.state != state {
            debug!("turn state {:?} -> {:?}", self.state, state);
            self.state = state;
            effects.push(Effect::Notify(SessionEvent::StateChanged(state)));
        }
    }

    fn last_index(&self) -> usize {
        self.session.len().saturating_sub(1)
    }

    fn freeze(&mut self, status: TurnStatus, failure: Option<TurnFailure>) -> Option<Effect> {
        let index = self.last_index();
        self.session
            .update_last_turn(|turn| {
                turn.status = status;
                turn.failure = failure;
                Effect::Notify(SessionEvent::TurnUpdated {
                    index,
                    turn: turn.clone(),
                })
            })
    }

    fn fail(&mut self, error: ChatError) -> Vec<Effect> {
        let mut effects = Vec::new();
        let kind = failure_kind(&error);
        let message = error.message();
        match kind {
            FailureKind::Cancelled => info!("turn cancelled"),
            _ => warn!(?kind, "turn failed: {message}"),
        }
        effects.extend(self.freeze(TurnStatus::Failed, Some(TurnFailure { kind, message })));
        self.set_state(TurnState::Failed, &mut effects);
        effects
    }
}

fn failure_kind(error: &ChatError) -> FailureKind {
    match error {
        ChatError::StreamTerminatedEarly(_) => FailureKind::Incomplete,
        ChatError::ServerError(_) => FailureKind::Server,
        ChatError::Cancelled(_) => FailureKind::Cancelled,
        _ => FailureKind::Transport,
    }
}

/// Apply `input` to `machine` and return the effects to perform, in order.
///
/// Inputs that do not fit the current state are ignored and produce no
/// effects. In particular, events decoded after the turn froze are dropped.
pub fn transition(machine: &mut TurnMachine, input: TurnInput) -> Vec<Effect> {
    let mut effects = Vec::new();

    match input {
        TurnInput::Submit(text) => {
            if machine.state != TurnState::Idle {
                debug!("submit ignored in state {:?}", machine.state);
                return effects;
            }
            if text.trim().is_empty() {
                return effects;
            }

            let request = ChatRequest::new(text.clone(), machine.session.thread_id().map(str::to_owned));
            let user = Turn::user(text);
            let index = machine.session.append_turn(user.clone());
            effects.push(Effect::Notify(SessionEvent::TurnAppended { index, turn: user }));

            let assistant = Turn::assistant_streaming();
            let index = machine.session.append_turn(assistant.clone());
            effects.push(Effect::Notify(SessionEvent::TurnAppended {
                index,
                turn: assistant,
            }));

            machine.reply = TurnText::new();
            machine.set_state(TurnState::Sending, &mut effects);
            effects.push(Effect::OpenStream(request));
        }

        TurnInput::RequestOpened => {
            if machine.state == TurnState::Sending {
                machine.set_state(TurnState::Streaming, &mut effects);
            }
        }

        TurnInput::Stream(event) => {
            if !machine.state.is_open() {
                debug!("dropping {event:?} in state {:?}", machine.state);
                return effects;
            }
            machine.set_state(TurnState::Streaming, &mut effects);

            match event {
                StreamEvent::Content(delta) => {
                    let text = machine.reply.append(&delta).to_owned();
                    machine.session.update_last_turn(|turn| turn.text = text);
                    effects.push(Effect::Notify(SessionEvent::ContentAppended {
                        index: machine.last_index(),
                        delta,
                    }));
                }
                StreamEvent::Done { thread_id } => {
                    effects.extend(machine.freeze(TurnStatus::Complete, None));
                    if let Some(id) = thread_id
                        && machine.session.thread_id() != Some(id.as_str())
                    {
                        machine.session.set_thread_id(id.clone());
                        effects.push(Effect::Notify(SessionEvent::ThreadIdChanged(id)));
                    }
                    machine.set_state(TurnState::Completing, &mut effects);
                    info!(
                        chars = machine.reply.as_str().chars().count(),
                        deltas = machine.reply.delta_count(),
                        "turn complete"
                    );
                    if !machine.reply.as_str().trim().is_empty() {
                        effects.push(Effect::Play(machine.reply.as_str().to_owned()));
                    }
                }
                StreamEvent::Error(message) => {
                    effects.extend(machine.fail(ChatError::ServerError(message)));
                }
            }
        }

        TurnInput::StreamFailed(error) => {
            if !machine.state.is_open() {
                debug!("dropping late failure in state {:?}: {error}", machine.state);
                return effects;
            }
            effects.extend(machine.fail(error));
        }

        TurnInput::Cancel => {
            if machine.state.is_open() {
                effects.push(Effect::AbortStream);
                effects.extend(machine.fail(ChatError::Cancelled(CANCELLED_BY_USER.to_owned())));
            }
        }

        TurnInput::Settle => {
            if matches!(machine.state, TurnState::Completing | TurnState::Failed) {
                machine.set_state(TurnState::Idle, &mut effects);
            }
        }
    }

    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::INCOMPLETE_STREAM;
    use crate::session::Role;

    fn run(machine: &mut TurnMachine, inputs: Vec<TurnInput>) -> Vec<Effect> {
        inputs
            .into_iter()
            .flat_map(|input| transition(machine, input))
            .collect()
    }

    fn content(text: &str) -> TurnInput {
        TurnInput::Stream(StreamEvent::Content(text.to_owned()))
    }

    fn done(thread_id: Option<&str>) -> TurnInput {
        TurnInput::Stream(StreamEvent::Done {
            thread_id: thread_id.map(str::to_owned),
        })
    }

    fn plays(effects: &[Effect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Play(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn started() -> (TurnMachine, Vec<Effect>) {
        let mut machine = TurnMachine::new(Session::with_id("s"));
        let effects = run(
            &mut machine,
            vec![TurnInput::Submit("hello".into()), TurnInput::RequestOpened],
        );
        (machine, effects)
    }

    // ── Submit ──────────────────────────────────────────────────────────

    #[test]
    fn submit_appends_both_turns_before_network() {
        let mut machine = TurnMachine::new(Session::with_id("s"));
        let effects = transition(&mut machine, TurnInput::Submit("hello".into()));

        assert_eq!(machine.state(), TurnState::Sending);
        let history = machine.session().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].status, TurnStatus::Complete);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].status, TurnStatus::Streaming);
        assert!(history[1].text.is_empty());

        assert!(matches!(
            effects.last(),
            Some(Effect::OpenStream(req)) if req.message == "hello" && req.thread_id.is_none()
        ));
    }

    #[test]
    fn submit_while_active_creates_nothing() {
        let (mut machine, _) = started();
        let effects = transition(&mut machine, TurnInput::Submit("again".into()));
        assert!(effects.is_empty());
        assert_eq!(machine.session().len(), 2);
    }

    #[test]
    fn blank_submit_is_ignored() {
        let mut machine = TurnMachine::new(Session::with_id("s"));
        assert!(transition(&mut machine, TurnInput::Submit("  ".into())).is_empty());
        assert!(machine.session().is_empty());
        assert_eq!(machine.state(), TurnState::Idle);
    }

    // ── Streaming ───────────────────────────────────────────────────────

    #[test]
    fn hello_scenario() {
        let (mut machine, _) = started();
        let effects = run(
            &mut machine,
            vec![content("Hi"), content(" there"), done(Some("abc"))],
        );

        let reply = &machine.session().history()[1];
        assert_eq!(reply.text, "Hi there");
        assert_eq!(reply.status, TurnStatus::Complete);
        assert_eq!(machine.session().thread_id(), Some("abc"));
        assert_eq!(machine.state(), TurnState::Completing);
        assert_eq!(plays(&effects), vec!["Hi there"]);
        assert!(effects.contains(&Effect::Notify(SessionEvent::ThreadIdChanged("abc".into()))));

        transition(&mut machine, TurnInput::Settle);
        assert_eq!(machine.state(), TurnState::Idle);
    }

    #[test]
    fn content_before_request_opened_still_streams() {
        let mut machine = TurnMachine::new(Session::with_id("s"));
        run(&mut machine, vec![TurnInput::Submit("q".into()), content("a")]);
        assert_eq!(machine.state(), TurnState::Streaming);
        assert_eq!(machine.reply(), "a");
    }

    #[test]
    fn text_only_grows() {
        let (mut machine, _) = started();
        let mut previous = String::new();
        for delta in ["你", "好", "", "，世界"] {
            transition(&mut machine, content(delta));
            let now = machine.session().history()[1].text.clone();
            assert!(now.starts_with(&previous));
            previous = now;
        }
        assert_eq!(previous, "你好，世界");
    }

    #[test]
    fn thread_id_echoed_on_next_request() {
        let (mut machine, _) = started();
        run(&mut machine, vec![done(Some("abc")), TurnInput::Settle]);
        let effects = transition(&mut machine, TurnInput::Submit("next".into()));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::OpenStream(req) if req.thread_id.as_deref() == Some("abc")
        )));
    }

    #[test]
    fn done_without_thread_id_keeps_previous() {
        let (mut machine, _) = started();
        run(&mut machine, vec![done(Some("abc")), TurnInput::Settle]);
        run(&mut machine, vec![TurnInput::Submit("next".into()), done(None)]);
        assert_eq!(machine.session().thread_id(), Some("abc"));
    }

    #[test]
    fn blank_reply_is_not_played() {
        let (mut machine, _) = started();
        let effects = run(&mut machine, vec![content("  \n"), done(None)]);
        assert!(plays(&effects).is_empty());
        assert_eq!(machine.session().history()[1].status, TurnStatus::Complete);
    }

    // ── Failure ─────────────────────────────────────────────────────────

    #[test]
    fn server_error_is_verbatim() {
        let (mut machine, _) = started();
        let effects = run(
            &mut machine,
            vec![TurnInput::Stream(StreamEvent::Error("quota exceeded".into()))],
        );
        let reply = &machine.session().history()[1];
        assert_eq!(reply.status, TurnStatus::Failed);
        assert_eq!(
            reply.failure,
            Some(TurnFailure {
                kind: FailureKind::Server,
                message: "quota exceeded".into()
            })
        );
        assert!(plays(&effects).is_empty());
        assert_eq!(machine.state(), TurnState::Failed);
    }

    #[test]
    fn early_close_keeps_partial_text() {
        let (mut machine, _) = started();
        run(
            &mut machine,
            vec![
                content("a"),
                content("b"),
                TurnInput::StreamFailed(ChatError::StreamTerminatedEarly(INCOMPLETE_STREAM.into())),
            ],
        );
        let reply = &machine.session().history()[1];
        assert_eq!(reply.text, "ab");
        assert_eq!(reply.status, TurnStatus::Failed);
        assert!(reply.failure.as_ref().is_some_and(|f| f.kind == FailureKind::Incomplete
            && f.message == INCOMPLETE_STREAM));
    }

    #[test]
    fn transport_failure_while_sending() {
        let mut machine = TurnMachine::new(Session::with_id("s"));
        run(
            &mut machine,
            vec![
                TurnInput::Submit("q".into()),
                TurnInput::StreamFailed(ChatError::Transport("HTTP 502: bad gateway".into())),
            ],
        );
        let reply = &machine.session().history()[1];
        assert!(reply.failure.as_ref().is_some_and(|f| f.kind == FailureKind::Transport));
        assert_eq!(machine.state(), TurnState::Failed);
    }

    #[test]
    fn failure_kind_follows_error_variant() {
        let cases = [
            (ChatError::ServerError("boom".into()), FailureKind::Server),
            (ChatError::Cancelled("abandoned".into()), FailureKind::Cancelled),
            (ChatError::StreamTerminatedEarly("cut".into()), FailureKind::Incomplete),
            (ChatError::Transport("reset".into()), FailureKind::Transport),
        ];
        for (error, expected) in cases {
            let message = error.message();
            let (mut machine, _) = started();
            transition(&mut machine, TurnInput::StreamFailed(error));
            let reply = &machine.session().history()[1];
            assert_eq!(
                reply.failure,
                Some(TurnFailure {
                    kind: expected,
                    message
                })
            );
        }
    }

    // ── Cancellation ────────────────────────────────────────────────────

    #[test]
    fn cancel_mid_stream() {
        let (mut machine, _) = started();
        transition(&mut machine, content("partial"));
        let effects = transition(&mut machine, TurnInput::Cancel);

        assert_eq!(effects.first(), Some(&Effect::AbortStream));
        let reply = &machine.session().history()[1];
        assert_eq!(reply.status, TurnStatus::Failed);
        assert!(reply.is_cancelled());
        assert_eq!(reply.text, "partial");

        let late = run(&mut machine, vec![content(" more"), done(Some("x"))]);
        assert!(late.is_empty());
        assert_eq!(machine.session().history()[1].text, "partial");
        assert!(machine.session().thread_id().is_none());
    }

    #[test]
    fn cancel_after_done_is_noop() {
        let (mut machine, _) = started();
        run(&mut machine, vec![content("Hi"), done(None)]);
        assert!(transition(&mut machine, TurnInput::Cancel).is_empty());
        assert_eq!(machine.session().history()[1].status, TurnStatus::Complete);
    }

    #[test]
    fn cancel_when_idle_is_noop() {
        let mut machine = TurnMachine::new(Session::with_id("s"));
        assert!(transition(&mut machine, TurnInput::Cancel).is_empty());
    }

    #[test]
    fn no_path_leaves_turn_streaming_after_settle() {
        let endings: Vec<Vec<TurnInput>> = vec![
            vec![done(None)],
            vec![TurnInput::Stream(StreamEvent::Error("x".into()))],
            vec![TurnInput::StreamFailed(ChatError::StreamTerminatedEarly("x".into()))],
            vec![TurnInput::Cancel],
        ];
        for ending in endings {
            let (mut machine, _) = started();
            run(&mut machine, ending);
            transition(&mut machine, TurnInput::Settle);
            assert_eq!(machine.state(), TurnState::Idle);
            assert!(machine.session().history()[1].status.is_frozen());
        }
    }
}
