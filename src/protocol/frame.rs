//! Single-record classification.
//!
//! # Examples
//!
//! ```
//! use voxchat::protocol::frame::{StreamEvent, parse_line};
//!
//! let event = parse_line(r#"data: {"content":"Hi","done":false}"#);
//! assert!(matches!(event, Some(Ok(StreamEvent::Content(ref t))) if t == "Hi"));
//!
//! assert!(parse_line(": keep-alive").is_none());
//! ```

use serde::Deserialize;

use crate::error::ChatError;

/// Marker that prefixes every record line.
pub const DATA_FIELD: &str = "data";

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta to append to the reply.
    Content(String),
    /// The reply is complete.
    Done {
        /// Continuity token to echo on the next turn.
        thread_id: Option<String>,
    },
    /// The server failed to produce a reply.
    Error(String),
}

impl StreamEvent {
    /// Whether this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

/// Raw JSON record. The backend mixes fields (`{"content": .., "done": false}`,
/// `{"error": .., "done": true}`), so every field is optional.
#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl WireRecord {
    fn classify(self) -> Option<StreamEvent> {
        if let Some(error) = self.error {
            return Some(StreamEvent::Error(error));
        }
        if let Some(content) = self.content {
            return Some(StreamEvent::Content(content));
        }
        if self.done == Some(true) {
            return Some(StreamEvent::Done {
                thread_id: self.thread_id.filter(|id| !id.is_empty()),
            });
        }
        None
    }
}

/// Split `field: value`, dropping one space after the colon.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (field, value) = line.split_once(':')?;
    Some((field, value.strip_prefix(' ').unwrap_or(value)))
}

/// Classify one complete line.
///
/// Returns `None` for lines that are not `data:` records (blank separators,
/// comments, other SSE fields). Returns `Some(Err(MalformedFrame))` when a
/// `data:` payload is not a recognizable record.
pub fn parse_line(line: &str) -> Option<Result<StreamEvent, ChatError>> {
    let (field, payload) = split_field(line)?;
    if field != DATA_FIELD {
        return None;
    }

    let record: WireRecord = match serde_json::from_str(payload) {
        Ok(r) => r,
        Err(e) => return Some(Err(ChatError::MalformedFrame(format!("{e}: {payload}")))),
    };

    Some(
        record
            .classify()
            .ok_or_else(|| ChatError::MalformedFrame(format!("unrecognized record: {payload}"))),
    )
}
