//! Markdown to speakable text.
//!
//! Agents often answer in Markdown. Read aloud verbatim, the synthesizer
//! pronounces list bullets, emphasis stars, and link targets. This walks the
//! Markdown event stream and keeps only the visible text.

use pulldown_cmark::{Event, Parser, TagEnd};

/// Convert Markdown to plain text suitable for synthesis.
///
/// Block ends become line breaks, blank lines collapse, and runs of spaces
/// shrink to one.
///
/// # Examples
///
/// ```
/// use voxchat::narration::to_speech_text;
///
/// let text = to_speech_text("## Plan\n\n- **Call** the [team](https://x.y)\n- `ship`");
/// assert_eq!(text, "Plan\nCall the team\nship");
/// ```
pub fn to_speech_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_)
                | TagEnd::TableRow,
            ) => out.push('\n'),
            _ => {}
        }
    }

    tidy(&out)
}

fn tidy(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(to_speech_text("Hi there"), "Hi there");
    }

    #[test]
    fn emphasis_markers_removed() {
        assert_eq!(to_speech_text("this is **very** _nice_"), "this is very nice");
    }

    #[test]
    fn headings_and_lists() {
        let md = "# Title\n\n1. first\n2. second\n\n* third";
        assert_eq!(to_speech_text(md), "Title\nfirst\nsecond\nthird");
    }

    #[test]
    fn links_keep_label_images_keep_alt() {
        let md = "see [docs](https://example.com) ![a chart](c.png)";
        assert_eq!(to_speech_text(md), "see docs a chart");
    }

    #[test]
    fn code_fence_content_kept_markers_dropped() {
        let md = "```\nhello\n```";
        assert_eq!(to_speech_text(md), "hello");
    }

    #[test]
    fn blockquote_and_rule() {
        let md = "> quoted\n\n---\n\nafter";
        assert_eq!(to_speech_text(md), "quoted\nafter");
    }

    #[test]
    fn cjk_text_preserved() {
        assert_eq!(to_speech_text("**你好**，世界"), "你好，世界");
    }

    #[test]
    fn markup_only_is_empty() {
        assert_eq!(to_speech_text("---"), "");
        assert_eq!(to_speech_text("   "), "");
    }
}
