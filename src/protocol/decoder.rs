//! Incremental frame decoder.
//!
//! Network reads do not respect record boundaries: one record may arrive in
//! two reads and one read may carry several records. [`FrameDecoder`] keeps a
//! byte-level line buffer so a UTF-8 sequence split across reads is rebuilt
//! before decoding, and only parses a line once its `\n` has arrived.
//!
//! # Examples
//!
//! ```
//! use voxchat::protocol::{FrameDecoder, StreamEvent};
//!
//! let mut decoder = FrameDecoder::new();
//! assert!(decoder.push(b"data: {\"conte").is_empty());
//! let events = decoder.push(b"nt\":\"Hi\"}\n\n");
//! assert_eq!(events, vec![StreamEvent::Content("Hi".into())]);
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use super::frame::{StreamEvent, parse_line};
use crate::error::{ChatError, Result};

/// Message attached to [`ChatError::StreamTerminatedEarly`].
pub const INCOMPLETE_STREAM: &str = "incomplete stream";

/// A boxed stream of decoded events.
///
/// Yields `Ok` events until the first terminal event, then ends. If the
/// body closes first, the last item is `Err(StreamTerminatedEarly)`; a read
/// failure ends it with `Err(Transport)`.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Push-based line decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    line_buffer: Vec<u8>,
    terminated: bool,
    malformed: usize,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of complete `data:` lines skipped as malformed so far.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Feed a chunk and return the events completed by it.
    ///
    /// Nothing is returned after the terminal event.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line_buffer.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let line = std::mem::take(&mut self.line_buffer);
            if let Some(event) = self.decode_line(&line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.terminated = true;
                    return events;
                }
            }
        }
        self.line_buffer.extend_from_slice(rest);
        events
    }

    /// Decode whatever is left once the body has closed.
    ///
    /// A last record without its trailing newline is still a whole record.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.terminated || self.line_buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.line_buffer);
        let event = self.decode_line(&line)?;
        if event.is_terminal() {
            self.terminated = true;
        }
        Some(event)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(l) => l,
            Err(e) => {
                self.malformed += 1;
                debug!("skipping non-UTF-8 line: {e}");
                return None;
            }
        };
        match parse_line(line)? {
            Ok(event) => Some(event),
            Err(e) => {
                self.malformed += 1;
                debug!("skipping frame: {e}");
                None
            }
        }
    }
}

/// Internal state for [`decode_stream`].
struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    /// The body has closed without a terminal record.
    eof: bool,
    /// Nothing more will be yielded once `pending` drains.
    done: bool,
}

/// Decode a chunked byte stream into a lazy, finite [`EventStream`].
pub fn decode_stream<S>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        eof: false,
        done: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            if state.eof {
                state.done = true;
                warn!(
                    malformed = state.decoder.malformed_count(),
                    "stream closed without a terminal record"
                );
                let err = ChatError::StreamTerminatedEarly(INCOMPLETE_STREAM.into());
                return Some((Err(err), state));
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend(state.decoder.push(&chunk));
                    state.done = state.decoder.is_terminated();
                }
                Some(Err(e)) => {
                    state.done = true;
                    warn!("stream read failed: {e}");
                    let err = match e {
                        ChatError::Transport(m) => ChatError::Transport(m),
                        other => ChatError::Transport(other.message()),
                    };
                    return Some((Err(err), state));
                }
                None => {
                    state.pending.extend(state.decoder.finish());
                    if state.decoder.is_terminated() {
                        state.done = true;
                    } else {
                        state.eof = true;
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = concat!(
        "data: {\"content\":\"Hi\",\"done\":false}\n\n",
        "data: {\"content\":\" there\",\"done\":false}\n\n",
        "data: {\"done\":true,\"thread_id\":\"abc\"}\n\n",
    );

    fn chunks_of(body: &[u8], size: usize) -> Vec<Result<Bytes>> {
        body.chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn collect(chunks: Vec<Result<Bytes>>) -> Vec<Result<StreamEvent>> {
        decode_stream(futures_util::stream::iter(chunks))
            .collect()
            .await
    }

    fn text_of(events: &[Result<StreamEvent>]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::Content(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    // ── FrameDecoder ──────────────────────────────────────────

    #[test]
    fn split_mid_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"content\":\"H").is_empty());
        let events = decoder.push(b"i\"}\n");
        assert_eq!(events, vec![StreamEvent::Content("Hi".into())]);
    }

    #[test]
    fn two_records_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data: {\"content\":\"a\"}\ndata: {\"content\":\"b\"}\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("a".into()),
                StreamEvent::Content("b".into())
            ]
        );
    }

    #[test]
    fn crlf_lines() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data: {\"content\":\"a\"}\r\n\r\n");
        assert_eq!(events, vec![StreamEvent::Content("a".into())]);
    }

    #[test]
    fn multibyte_char_split_across_reads() {
        let line = "data: {\"content\":\"你好\"}\n".as_bytes();
        // Split inside the three-byte encoding of the first character.
        let split = line.iter().position(|&b| b >= 0x80).map(|p| p + 1);
        let Some(split) = split else {
            unreachable!("line contains a multibyte character")
        };

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let events = decoder.push(&line[split..]);
        assert_eq!(events, vec![StreamEvent::Content("你好".into())]);
    }

    #[test]
    fn malformed_line_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data: {not json}\ndata: {\"content\":\"ok\"}\n");
        assert_eq!(events, vec![StreamEvent::Content("ok".into())]);
        assert_eq!(decoder.malformed_count(), 1);
    }

    #[test]
    fn nothing_after_terminal() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data: {\"done\":true}\ndata: {\"content\":\"late\"}\n");
        assert_eq!(events, vec![StreamEvent::Done { thread_id: None }]);
        assert!(decoder.is_terminated());
        assert!(decoder.push(b"data: {\"content\":\"later\"}\n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn finish_decodes_unterminated_last_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"done\":true,\"thread_id\":\"t\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(StreamEvent::Done {
                thread_id: Some("t".into())
            })
        );
        assert!(decoder.is_terminated());
    }

    #[test]
    fn finish_on_empty_buffer() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.finish().is_none());
    }

    // ── decode_stream ─────────────────────────────────────────

    #[tokio::test]
    async fn chunk_boundary_independence() {
        let body = BODY.as_bytes();
        let single = collect(chunks_of(body, body.len())).await;
        let expected = text_of(&single);
        assert_eq!(expected, "Hi there");

        for size in [1, 2, 3, 7, 16, 64] {
            let events = collect(chunks_of(body, size)).await;
            assert_eq!(text_of(&events), expected, "chunk size {size}");
            assert!(matches!(
                events.last(),
                Some(Ok(StreamEvent::Done { thread_id: Some(id) })) if id == "abc"
            ));
        }
    }

    #[tokio::test]
    async fn stream_ends_after_terminal() {
        let body = format!("{BODY}data: {{\"content\":\"ignored\"}}\n");
        let events = collect(chunks_of(body.as_bytes(), 5)).await;
        assert_eq!(events.len(), 3);
        assert_eq!(text_of(&events), "Hi there");
    }

    #[tokio::test]
    async fn early_close_is_reported() {
        let body = "data: {\"content\":\"Hi\"}\n\ndata: {\"content\":\" there\"}\n\n";
        let events = collect(chunks_of(body.as_bytes(), 4)).await;
        assert_eq!(text_of(&events), "Hi there");
        assert!(matches!(
            events.last(),
            Some(Err(ChatError::StreamTerminatedEarly(m))) if m == INCOMPLETE_STREAM
        ));
    }

    #[tokio::test]
    async fn early_close_after_unterminated_content() {
        let body = "data: {\"content\":\"Hi\"}";
        let events = collect(chunks_of(body.as_bytes(), 3)).await;
        assert_eq!(events.len(), 2);
        assert_eq!(text_of(&events), "Hi");
        assert!(matches!(
            events.last(),
            Some(Err(ChatError::StreamTerminatedEarly(_)))
        ));
    }

    #[tokio::test]
    async fn empty_body_is_incomplete() {
        let events = collect(Vec::new()).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(ChatError::StreamTerminatedEarly(_))
        ));
    }

    #[tokio::test]
    async fn read_error_ends_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"content\":\"Hi\"}\n")),
            Err(ChatError::Transport("connection reset".into())),
            Ok(Bytes::from_static(b"data: {\"done\":true}\n")),
        ];
        let events = collect(chunks).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events.last(),
            Some(Err(ChatError::Transport(m))) if m == "connection reset"
        ));
    }

    #[tokio::test]
    async fn server_error_record_is_terminal() {
        let body = "data: {\"error\":\"quota exceeded\",\"done\":true}\n\n";
        let events = collect(chunks_of(body.as_bytes(), 10)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Ok(StreamEvent::Error(m)) if m == "quota exceeded"
        ));
    }
}
