//! voxchat: streaming-turn coordination for voice chat with a remote agent.
//!
//! Typed or dictated input goes out, a token-by-token reply streams back,
//! and the completed reply is optionally spoken aloud:
//! Input → Turn Controller → Transport → Frame Decoder → Session → Playback
//!
//! # Architecture
//!
//! - **Protocol**: decodes `data: <json>` lines from a chunked body into
//!   [`StreamEvent`]s, independent of chunk boundaries
//! - **Transcript**: append-only reply text and the dictation preview buffer
//! - **Controller**: a pure turn state machine plus an async driver with
//!   single-flight submits and cooperative cancellation
//! - **Playback**: one synthesis worker per session, `Supersede` or `Queue`
//! - **Dictation**: recognition fragments into the input field, never the
//!   history
//!
//! Chat transport, speech synthesis, audio output, and recognition are
//! traits; HTTP and WAV-file adapters ship for the first three.

pub mod config;
pub mod controller;
pub mod dictation;
pub mod error;
pub mod narration;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod voice_session;

pub use config::{ChatConfig, PlaybackPolicy};
pub use controller::{SessionEvent, SubmitOutcome, TurnController, TurnState};
pub use dictation::{Dictation, DictationState, RecognitionProvider};
pub use error::{ChatError, Result};
pub use playback::{AudioSink, Playback, PlaybackEvent, PlaybackSequencer, SpeechSynthesizer};
pub use protocol::StreamEvent;
pub use session::{FailureKind, Role, Session, Turn, TurnFailure, TurnStatus};
pub use transcript::{RecognitionEvent, RecognitionKind};
pub use transport::{ChatRequest, ChatTransport, HttpChatTransport};
pub use voice_session::VoiceSession;
