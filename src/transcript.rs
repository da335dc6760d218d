//! Transcript assembly.
//!
//! Both lanes append and never rewrite what is already committed:
//!
//! - [`TurnText`] concatenates reply deltas in arrival order.
//! - [`RecognitionTranscript`] folds interim/final speech fragments into a
//!   committed utterance plus a live preview.

use serde::{Deserialize, Serialize};

/// Whether a recognition fragment is tentative or committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionKind {
    /// Tentative, may be revised by the next fragment.
    Interim,
    /// Permanent.
    Final,
}

/// One fragment from a recognition provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    /// Interim or final.
    pub kind: RecognitionKind,
    /// Recognized text of this fragment.
    pub text: String,
}

impl RecognitionEvent {
    /// An interim fragment.
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            kind: RecognitionKind::Interim,
            text: text.into(),
        }
    }

    /// A final fragment.
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            kind: RecognitionKind::Final,
            text: text.into(),
        }
    }
}

/// Reply text of the active assistant turn.
///
/// The server sends exactly the delta to append, so there is no dedup,
/// reordering, or trimming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnText {
    text: String,
    deltas: usize,
}

impl TurnText {
    /// Empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the text so far.
    pub fn append(&mut self, delta: &str) -> &str {
        self.text.push_str(delta);
        self.deltas += 1;
        &self.text
    }

    /// Text so far.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of deltas applied.
    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    /// Consume and return the text.
    pub fn into_string(self) -> String {
        self.text
    }
}

/// Dictation buffer: committed text plus the latest interim hypothesis.
#[derive(Debug, Clone, Default)]
pub struct RecognitionTranscript {
    committed: String,
    interim: String,
    separator: String,
}

impl RecognitionTranscript {
    /// Empty transcript; final fragments are joined without a separator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty transcript joining final fragments with `separator`.
    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            ..Self::default()
        }
    }

    /// Apply one fragment.
    pub fn apply(&mut self, event: &RecognitionEvent) {
        match event.kind {
            RecognitionKind::Interim => self.interim = event.text.clone(),
            RecognitionKind::Final => self.commit(&event.text),
        }
    }

    fn commit(&mut self, text: &str) {
        self.interim.clear();
        if text.is_empty() {
            return;
        }
        if !self.committed.is_empty() {
            self.committed.push_str(&self.separator);
        }
        self.committed.push_str(text);
    }

    /// Committed text: what gets submitted.
    pub fn committed(&self) -> &str {
        &self.committed
    }

    /// Committed text followed by the latest interim fragment.
    pub fn preview(&self) -> String {
        if self.interim.is_empty() {
            return self.committed.clone();
        }
        let mut preview = self.committed.clone();
        if !preview.is_empty() {
            preview.push_str(&self.separator);
        }
        preview.push_str(&self.interim);
        preview
    }

    /// Whether anything, committed or interim, has been heard.
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.interim.is_empty()
    }

    /// Drain the committed text for submission and reset both buffers.
    pub fn take_committed(&mut self) -> String {
        self.interim.clear();
        std::mem::take(&mut self.committed)
    }

    /// Drop everything heard so far.
    pub fn clear(&mut self) {
        self.committed.clear();
        self.interim.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TurnText ──────────────────────────────────────────────

    #[test]
    fn deltas_concatenate_in_order() {
        let mut text = TurnText::new();
        text.append("Hi");
        assert_eq!(text.append(" there"), "Hi there");
        assert_eq!(text.delta_count(), 2);
    }

    #[test]
    fn whitespace_is_preserved() {
        let mut text = TurnText::new();
        text.append("  a ");
        text.append("\n");
        assert_eq!(text.as_str(), "  a \n");
    }

    #[test]
    fn repeated_deltas_are_not_deduplicated() {
        let mut text = TurnText::new();
        text.append("ha");
        text.append("ha");
        assert_eq!(text.into_string(), "haha");
    }

    #[test]
    fn growth_is_monotonic() {
        let mut text = TurnText::new();
        let mut previous = String::new();
        for delta in ["你", "好", "", "，", "世界"] {
            let current = text.append(delta).to_owned();
            assert!(current.starts_with(&previous));
            previous = current;
        }
    }

    // ── RecognitionTranscript ─────────────────────────────────

    #[test]
    fn interim_replaces_preview() {
        let mut t = RecognitionTranscript::new();
        t.apply(&RecognitionEvent::interim("hel"));
        t.apply(&RecognitionEvent::interim("hello"));
        assert_eq!(t.preview(), "hello");
        assert_eq!(t.committed(), "");
    }

    #[test]
    fn final_commits_and_clears_preview() {
        let mut t = RecognitionTranscript::new();
        t.apply(&RecognitionEvent::interim("hello wor"));
        t.apply(&RecognitionEvent::final_text("hello world"));
        assert_eq!(t.committed(), "hello world");
        assert_eq!(t.preview(), "hello world");
    }

    #[test]
    fn preview_is_committed_plus_interim() {
        let mut t = RecognitionTranscript::with_separator(" ");
        t.apply(&RecognitionEvent::final_text("first sentence."));
        t.apply(&RecognitionEvent::interim("second"));
        assert_eq!(t.preview(), "first sentence. second");
        assert_eq!(t.committed(), "first sentence.");
    }

    #[test]
    fn finals_join_without_separator_by_default() {
        let mut t = RecognitionTranscript::new();
        t.apply(&RecognitionEvent::final_text("你好"));
        t.apply(&RecognitionEvent::final_text("世界"));
        assert_eq!(t.committed(), "你好世界");
    }

    #[test]
    fn empty_final_only_clears_interim() {
        let mut t = RecognitionTranscript::with_separator(" ");
        t.apply(&RecognitionEvent::final_text("a"));
        t.apply(&RecognitionEvent::interim("noise"));
        t.apply(&RecognitionEvent::final_text(""));
        assert_eq!(t.committed(), "a");
        assert_eq!(t.preview(), "a");
    }

    #[test]
    fn take_committed_resets() {
        let mut t = RecognitionTranscript::new();
        t.apply(&RecognitionEvent::final_text("send me"));
        t.apply(&RecognitionEvent::interim("pending"));
        assert_eq!(t.take_committed(), "send me");
        assert!(t.is_empty());
        assert_eq!(t.preview(), "");
    }

    #[test]
    fn clear_drops_everything() {
        let mut t = RecognitionTranscript::new();
        t.apply(&RecognitionEvent::final_text("a"));
        t.apply(&RecognitionEvent::interim("b"));
        t.clear();
        assert!(t.is_empty());
    }
}
