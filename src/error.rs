//! Error types for voxchat.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`ChatError::code()`].
//! Codes are part of the public API contract and will not change.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// A complete `data:` line could not be decoded. Absorbed by the decoder.
    pub const MALFORMED_FRAME: &str = "MALFORMED_FRAME";

    /// The response closed before a `done` or `error` record arrived.
    pub const STREAM_TERMINATED_EARLY: &str = "STREAM_TERMINATED_EARLY";

    /// The server sent an explicit `error` record.
    pub const SERVER_ERROR: &str = "SERVER_ERROR";

    /// The user aborted the turn.
    pub const CANCELLED: &str = "CANCELLED";

    /// Speech recognition cannot be used (permission denied, no device).
    pub const RECOGNITION_UNAVAILABLE: &str = "RECOGNITION_UNAVAILABLE";

    /// Speech synthesis or audio playback failed.
    pub const SYNTHESIS_FAILED: &str = "SYNTHESIS_FAILED";

    /// The chat transport could not open or read the stream.
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";

    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Submitted input was empty or whitespace-only.
    pub const EMPTY_INPUT: &str = "EMPTY_INPUT";

    /// Text handed to the playback sequencer was empty or whitespace-only.
    pub const EMPTY_UTTERANCE: &str = "EMPTY_UTTERANCE";

    /// The playback worker is no longer running.
    pub const PLAYBACK_CLOSED: &str = "PLAYBACK_CLOSED";

    /// Filesystem error.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Errors produced by voxchat.
///
/// The Display impl formats as `[CODE] message`, except for [`ChatError::Io`]
/// which wraps the underlying error.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A complete `data:` line could not be decoded.
    #[error("[{}] {}", error_codes::MALFORMED_FRAME, .0)]
    MalformedFrame(String),

    /// The response closed before a terminal record.
    #[error("[{}] {}", error_codes::STREAM_TERMINATED_EARLY, .0)]
    StreamTerminatedEarly(String),

    /// Explicit `error` record from the server. The message is kept verbatim.
    #[error("[{}] {}", error_codes::SERVER_ERROR, .0)]
    ServerError(String),

    /// User-initiated abort.
    #[error("[{}] {}", error_codes::CANCELLED, .0)]
    Cancelled(String),

    /// Recognition provider refused to start.
    #[error("[{}] {}", error_codes::RECOGNITION_UNAVAILABLE, .0)]
    RecognitionUnavailable(String),

    /// Synthesis or playback failed.
    #[error("[{}] {}", error_codes::SYNTHESIS_FAILED, .0)]
    SynthesisFailed(String),

    /// Transport-level failure (connect, HTTP status, read).
    #[error("[{}] {}", error_codes::TRANSPORT_FAILED, .0)]
    Transport(String),

    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Submitted input was blank.
    #[error("[{}] input is empty", error_codes::EMPTY_INPUT)]
    EmptyInput,

    /// Blank text reached the playback sequencer.
    #[error("[{}] refusing to narrate empty text", error_codes::EMPTY_UTTERANCE)]
    EmptyUtterance,

    /// The playback worker has shut down.
    #[error("[{}] {}", error_codes::PLAYBACK_CLOSED, .0)]
    PlaybackClosed(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => error_codes::MALFORMED_FRAME,
            Self::StreamTerminatedEarly(_) => error_codes::STREAM_TERMINATED_EARLY,
            Self::ServerError(_) => error_codes::SERVER_ERROR,
            Self::Cancelled(_) => error_codes::CANCELLED,
            Self::RecognitionUnavailable(_) => error_codes::RECOGNITION_UNAVAILABLE,
            Self::SynthesisFailed(_) => error_codes::SYNTHESIS_FAILED,
            Self::Transport(_) => error_codes::TRANSPORT_FAILED,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::EmptyInput => error_codes::EMPTY_INPUT,
            Self::EmptyUtterance => error_codes::EMPTY_UTTERANCE,
            Self::PlaybackClosed(_) => error_codes::PLAYBACK_CLOSED,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::MalformedFrame(m)
            | Self::StreamTerminatedEarly(m)
            | Self::ServerError(m)
            | Self::Cancelled(m)
            | Self::RecognitionUnavailable(m)
            | Self::SynthesisFailed(m)
            | Self::Transport(m)
            | Self::Config(m)
            | Self::PlaybackClosed(m) => m.clone(),
            Self::EmptyInput => "input is empty".to_owned(),
            Self::EmptyUtterance => "refusing to narrate empty text".to_owned(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// Returns true if resubmitting the same input may succeed.
    ///
    /// Truncated streams and transport hiccups are transient. Server errors
    /// are surfaced verbatim and may be quota or content problems, so they
    /// are left to the user. Cancellation was asked for.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StreamTerminatedEarly(_) | Self::Transport(_) => true,
            Self::ServerError(_) | Self::Cancelled(_) => false,
            Self::MalformedFrame(_) => false,
            Self::RecognitionUnavailable(_) | Self::SynthesisFailed(_) => false,
            Self::Config(_) | Self::EmptyInput | Self::EmptyUtterance => false,
            Self::PlaybackClosed(_) | Self::Io(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Convenience alias for voxchat results.
pub type Result<T> = std::result::Result<T, ChatError>;
