//! Conversation session: ordered turn history plus the server's thread id.
//!
//! [`Session`] holds data only. The ordering and status rules are enforced
//! by [`TurnController`](crate::controller::TurnController), its only writer;
//! callers get read-only snapshots.

use serde::{Deserialize, Serialize};

/// Session identifier (UUID v4).
pub type SessionId = String;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Typed or dictated input.
    User,
    /// Streamed reply.
    Assistant,
}

/// Lifecycle status of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Created but not yet sent.
    Pending,
    /// Reply is arriving.
    Streaming,
    /// Frozen after a `done` record.
    Complete,
    /// Frozen after an error, truncation, or cancellation.
    Failed,
}

impl TurnStatus {
    /// Whether the turn can no longer change.
    pub fn is_frozen(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Why a turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server sent an `error` record.
    Server,
    /// The stream closed before a terminal record.
    Incomplete,
    /// The user cancelled. Not a failure that needs an apology.
    Cancelled,
    /// The request could not be sent or the body could not be read.
    Transport,
}

/// Failure detail attached to a failed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    /// Failure category.
    pub kind: FailureKind,
    /// Message for display; server messages are verbatim.
    pub message: String,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Author.
    pub role: Role,
    /// Message text. For a failed assistant turn, whatever had arrived.
    pub text: String,
    /// Lifecycle status.
    pub status: TurnStatus,
    /// Present only when `status` is [`TurnStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
}

impl Turn {
    /// A user turn, complete on creation.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            status: TurnStatus::Complete,
            failure: None,
        }
    }

    /// An empty assistant turn awaiting its reply.
    pub fn assistant_streaming() -> Self {
        Self {
            role: Role::Assistant,
            text: String::new(),
            status: TurnStatus::Streaming,
            failure: None,
        }
    }

    /// Whether the turn failed because the user cancelled it.
    pub fn is_cancelled(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Cancelled)
    }
}

/// A conversation with one remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    thread_id: Option<String>,
    history: Vec<Turn>,
}

impl Session {
    /// A new, empty session with a fresh id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// A new, empty session with a caller-chosen id.
    pub fn with_id(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            history: Vec::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Server continuity token, once a turn has completed.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Replace the continuity token. The server may rotate it.
    pub fn set_thread_id(&mut self, thread_id: impl Into<String>) {
        self.thread_id = Some(thread_id.into());
    }

    /// All turns in order.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Most recent turn.
    pub fn last_turn(&self) -> Option<&Turn> {
        self.history.last()
    }

    /// Append a turn and return its index.
    pub fn append_turn(&mut self, turn: Turn) -> usize {
        self.history.push(turn);
        self.history.len() - 1
    }

    /// Mutate the most recent turn in place.
    ///
    /// Returns `None` when the history is empty.
    pub fn update_last_turn<R>(&mut self, f: impl FnOnce(&mut Turn) -> R) -> Option<R> {
        self.history.last_mut().map(f)
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether there are no turns yet.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
