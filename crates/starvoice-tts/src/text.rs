//! Text normalizer and chunker.
//!
//! Generated readings arrive as markdown with the odd emoji, HTML tag or
//! leaked reasoning block. [`Chunker::chunk`] turns that into an ordered list
//! of plain-text [`Segment`]s, each short enough for one synthesis request.
//!
//! Chunking runs in three passes over the normalized text:
//!
//! 1. split into sentence units at `.`, `!` or `?` followed by whitespace or
//!    end of text (no terminal punctuation at all → one unit);
//! 2. greedily merge consecutive units while the segment stays within the
//!    limit;
//! 3. split any segment still over the limit on word boundaries.
//!
//! Lengths are counted in `char`s, not bytes.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::DEFAULT_MAX_CHUNK_CHARS;

/// Emoji and pictograph code points, plus the joiners and selectors that
/// glue them together.
static EMOJI: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(concat!(
        "[",
        r"\x{1F000}-\x{1FAFF}",
        r"\x{2600}-\x{27BF}",
        r"\x{2B00}-\x{2BFF}",
        r"\x{2300}-\x{23FF}",
        r"\x{E0020}-\x{E007F}",
        r"\x{FE00}-\x{FE0F}",
        r"\x{200D}",
        r"\x{20E3}",
        "]",
    ))
});

/// Opening, closing or self-closing HTML tags. A `<` not followed by a tag
/// name ("score < 3", "<3") is plain text.
static HTML_TAG: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^<>]*>"));

/// `_italic_` markers. Underscores inside words (`snake_case`) are kept.
static UNDERSCORE_EMPHASIS: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(^|[^\w])_([^_\s](?:[^_]*[^_\s])?)_([^\w]|$)"));

/// One bounded-length unit of normalized text queued for synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Position in the session, starting at 1.
    pub index: usize,

    /// Plain text, markup-free.
    pub text: String,
}

impl Segment {
    /// Length in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Splits raw generated text into speakable [`Segment`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl Chunker {
    /// Create a chunker with the given per-segment limit (at least one char).
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    #[must_use]
    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Normalize and split `raw` into ordered, non-empty segments.
    ///
    /// Absent, empty or markup-only input yields an empty list. Splits fall
    /// on sentence and then word boundaries; the one exception is a single
    /// word longer than the limit, which is cut at `char` boundaries so no
    /// segment ever exceeds it. This never fails: if normalization itself
    /// breaks, the raw text truncated to the limit is returned as a single
    /// segment.
    pub fn chunk<'a>(&self, raw: impl Into<Option<&'a str>>) -> Vec<Segment> {
        let Some(raw) = raw.into() else {
            return Vec::new();
        };

        let clean = match normalize(raw) {
            Ok(clean) => clean,
            Err(e) => {
                tracing::warn!(error = %e, "Text normalization failed, speaking truncated raw text");
                let truncated: String = raw.trim().chars().take(self.max_chars).collect();
                return if truncated.is_empty() {
                    Vec::new()
                } else {
                    vec![Segment {
                        index: 1,
                        text: truncated,
                    }]
                };
            }
        };

        if clean.is_empty() {
            return Vec::new();
        }

        let merged = merge_units(&split_sentences(&clean), self.max_chars);

        merged
            .into_iter()
            .flat_map(|segment| {
                if char_len(&segment) > self.max_chars {
                    split_words(&segment, self.max_chars)
                } else {
                    vec![segment]
                }
            })
            .filter(|text| !text.is_empty())
            .enumerate()
            .map(|(i, text)| Segment { index: i + 1, text })
            .collect()
    }
}

/// Chunk with the default 800-character limit.
pub fn chunk<'a>(raw: impl Into<Option<&'a str>>) -> Vec<Segment> {
    Chunker::default().chunk(raw)
}

/// Strip markup, emoji and reasoning blocks and collapse whitespace.
///
/// Handles:
/// - reasoning blocks (`<think>`, `<reasoning>`, …) → removed entirely
/// - fenced code blocks → "Code omitted."
/// - headings, blockquotes, bullet and numbered list markers → text only
/// - bold / italic / strikethrough markers and inline code → text only
/// - links → link text, images → "image: alt"
/// - HTML tags → removed
/// - emoji → removed
pub fn normalize(text: &str) -> Result<String, regex::Error> {
    let emoji = EMOJI.as_ref().map_err(Clone::clone)?;
    let underscore = UNDERSCORE_EMPHASIS.as_ref().map_err(Clone::clone)?;
    let html = HTML_TAG.as_ref().map_err(Clone::clone)?;

    let text = strip_reasoning_blocks(text);

    let mut result = String::with_capacity(text.len());
    let mut in_code_block = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            if !in_code_block {
                push_words(&mut result, "Code omitted.");
            }
            in_code_block = !in_code_block;
            continue;
        }

        if in_code_block || is_horizontal_rule(trimmed) {
            continue;
        }

        let stripped = strip_line_markup(line);
        let stripped = html.replace_all(&stripped, "");
        let stripped = underscore.replace_all(&stripped, "${1}${2}${3}");
        push_words(&mut result, &stripped);
    }

    let result = emoji.replace_all(&result, "");
    Ok(collapse_whitespace(&result))
}

// ── Internal helpers ───────────────────────────────────────────────

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_words(out: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(text);
}

/// Remove `<think>…</think>`, `<reasoning>…</reasoning>`,
/// `<seed:think>…</seed:think>` and `<|START_THINKING|>…<|END_THINKING|>`.
fn strip_reasoning_blocks(text: &str) -> String {
    [
        ("<think", "</think>"),
        ("<reasoning>", "</reasoning>"),
        ("<seed:think>", "</seed:think>"),
        ("<|START_THINKING|>", "<|END_THINKING|>"),
    ]
    .iter()
    .fold(text.to_string(), |acc, (open, close)| {
        strip_tag_block(&acc, open, close)
    })
}

/// Remove every `<open…>…close` block, matching tags case-insensitively.
/// An opening tag without a matching close is left in place.
fn strip_tag_block(text: &str, open_prefix: &str, close_tag: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let haystack = text.to_ascii_lowercase();
    let open = open_prefix.to_ascii_lowercase();
    let close = close_tag.to_ascii_lowercase();

    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(offset) = haystack[cursor..].find(&open) {
        let open_at = cursor + offset;
        let block_end = haystack[open_at..]
            .find('>')
            .map(|gt| open_at + gt + 1)
            .and_then(|body| {
                haystack[body..]
                    .find(&close)
                    .map(|c| body + c + close.len())
            });

        match block_end {
            Some(end) => {
                result.push_str(&text[cursor..open_at]);
                result.push(' ');
                cursor = end;
            }
            None => {
                let keep_to = open_at + open.len();
                result.push_str(&text[cursor..keep_to]);
                cursor = keep_to;
            }
        }
    }

    result.push_str(&text[cursor..]);
    result
}

fn is_horizontal_rule(line: &str) -> bool {
    let chars: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    chars.len() >= 3
        && matches!(chars[0], '-' | '*' | '_')
        && chars.iter().all(|&c| c == chars[0])
}

fn strip_line_markup(line: &str) -> String {
    let mut s = line.trim_start();

    while let Some(rest) = s.strip_prefix('>') {
        s = rest.trim_start();
    }

    if s.starts_with('#') {
        s = s.trim_start_matches('#').trim_start();
    }

    let s = strip_list_marker(s);
    let s = strip_images(s);
    let s = strip_links(&s);
    let s = strip_inline_code(&s);
    s.replace("**", "").replace("__", "").replace("~~", "").replace('*', "")
}

fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
    {
        return rest;
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let after = &line[digits..];
        if let Some(rest) = after.strip_prefix(". ").or_else(|| after.strip_prefix(") ")) {
            return rest;
        }
    }

    line
}

fn strip_images(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("![") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let parsed = after.find("](").and_then(|mid| {
            after[mid + 2..]
                .find(')')
                .map(|end| (&after[..mid], mid + 2 + end + 1))
        });
        match parsed {
            Some((alt, consumed)) => {
                if !alt.is_empty() {
                    result.push_str("image: ");
                    result.push_str(alt);
                }
                rest = &after[consumed..];
            }
            None => {
                result.push_str("![");
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn strip_links(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('[') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let parsed = after.find(']').and_then(|close| {
            after[close + 1..]
                .strip_prefix('(')
                .and_then(|url| url.find(')'))
                .map(|end| (&after[..close], close + 2 + end + 1))
        });
        match parsed {
            Some((label, consumed)) => {
                result.push_str(label);
                rest = &after[consumed..];
            }
            None => {
                result.push('[');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn strip_inline_code(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('`') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('`') {
            Some(end) => {
                result.push_str(&after[..end]);
                rest = &after[end + 1..];
            }
            None => rest = after,
        }
    }

    result.push_str(rest);
    result
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split at `.`, `!`, `?` followed by whitespace or end of text.
///
/// Text without any terminal punctuation comes back as a single unit.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            let unit = text[start..end].trim();
            if !unit.is_empty() {
                units.push(unit);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        units.push(tail);
    }

    units
}

/// Greedily join sentence units into segments of at most `max_chars`.
/// A unit that would overflow starts the next segment; a unit that is too
/// long on its own becomes its own (oversized) segment.
fn merge_units(units: &[&str], max_chars: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for unit in units {
        let unit_len = char_len(unit);
        if !current.is_empty() && current_len + 1 + unit_len > max_chars {
            segments.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(unit);
        current_len += unit_len;
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

/// Split an oversized segment on word boundaries. A single word longer than
/// the limit is the only thing ever cut mid-word.
fn split_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = char_len(word);

        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }

        if !current.is_empty() && current_len + 1 + word_len > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn splits_two_sentences_at_small_limit() {
        let segments = Chunker::new(15).chunk("Hello world. This is a test!");
        assert_eq!(texts(&segments), vec!["Hello world.", "This is a test!"]);
        assert_eq!(segments[0].index, 1);
        assert_eq!(segments[1].index, 2);
    }

    #[test]
    fn empty_absent_and_markup_only_yield_nothing() {
        assert!(chunk("").is_empty());
        assert!(chunk(None).is_empty());
        assert!(chunk("   \n\t ").is_empty());
        assert!(chunk("## **  ** \n---\n✨🌙🔮").is_empty());
        assert!(chunk("<think>private</think>").is_empty());
    }

    #[test]
    fn short_sentences_are_merged() {
        let segments = chunk("Mars enters Aries. Expect energy! Are you ready?");
        assert_eq!(texts(&segments), vec!["Mars enters Aries. Expect energy! Are you ready?"]);
    }

    #[test]
    fn text_without_punctuation_is_one_unit() {
        let segments = chunk("the moon is waxing in your sign");
        assert_eq!(texts(&segments), vec!["the moon is waxing in your sign"]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let segments = Chunker::new(10).chunk("Pi is 3.14 roughly.");
        assert_eq!(texts(&segments).join(" "), "Pi is 3.14 roughly.");
        assert!(segments.iter().all(|s| !s.text.ends_with("3.")));
    }

    #[test]
    fn unbroken_run_is_split_on_word_boundaries() {
        let words: Vec<String> = (0..400).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let segments = chunk(text.as_str());

        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(segment.char_len() <= 800, "segment too long: {}", segment.char_len());
            assert!(!segment.text.starts_with(' ') && !segment.text.ends_with(' '));
        }
        let rejoined: Vec<&str> = segments.iter().flat_map(|s| s.text.split(' ')).collect();
        assert_eq!(rejoined, words.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn bare_angle_brackets_are_kept() {
        let segments = chunk("Your love score is < 3 today, so rest. Tomorrow is better.");
        assert_eq!(
            texts(&segments),
            vec!["Your love score is < 3 today, so rest. Tomorrow is better."]
        );

        let segments = chunk("I <3 this week. See you soon!");
        assert_eq!(texts(&segments), vec!["I <3 this week. See you soon!"]);
    }

    #[test]
    fn html_tags_are_removed() {
        let segments = chunk("<p>A <b>bold</b> move<br/> today.</p>");
        assert_eq!(texts(&segments), vec!["A bold move today."]);
    }

    #[test]
    fn word_longer_than_limit_is_cut() {
        let segments = Chunker::new(4).chunk("abcdefghij");
        assert_eq!(texts(&segments), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn overflowing_sentence_starts_new_segment() {
        let segments = Chunker::new(20).chunk("One two three. Four five six seven. Eight.");
        assert_eq!(
            texts(&segments),
            vec!["One two three.", "Four five six seven.", "Eight."]
        );
    }

    #[test]
    fn coverage_holds_across_limits() {
        let sentences = [
            "Your sun sign favours patience today.",
            "Venus trines Jupiter!",
            "Is this the week to start over?",
            "Money matters improve slowly but steadily through the month",
            "Rest.",
        ];
        let mut seed: u64 = 0x5eed;
        for round in 0..40 {
            let mut parts = Vec::new();
            for _ in 0..(3 + round % 7) {
                seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                parts.push(sentences[(seed >> 33) as usize % sentences.len()]);
            }
            let text = parts.join("  \n ");
            let max = 12 + round * 7;

            let segments = Chunker::new(max).chunk(text.as_str());
            let expected = normalize(&text).unwrap();
            assert_eq!(texts(&segments).join(" "), expected, "round {round}");
            for (i, segment) in segments.iter().enumerate() {
                assert!(segment.char_len() <= max);
                assert!(!segment.text.is_empty());
                assert_eq!(segment.index, i + 1);
            }
        }
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        let text = "Écoute les étoiles. Élan vital.";
        let segments = Chunker::new(19).chunk(text);
        assert_eq!(texts(&segments), vec!["Écoute les étoiles.", "Élan vital."]);
    }

    #[test]
    fn strip_simple_markdown() {
        let result = normalize("**Hello** world! This is *italic* and `code`.").unwrap();
        assert_eq!(result, "Hello world! This is italic and code.");
    }

    #[test]
    fn strip_underscore_emphasis_keeps_snake_case() {
        let result = normalize("An _important_ day for snake_case fans.").unwrap();
        assert_eq!(result, "An important day for snake_case fans.");
    }

    #[test]
    fn strip_code_block() {
        let result = normalize("Here is code:\n```rust\nfn main() {}\n```\nDone.").unwrap();
        assert_eq!(result, "Here is code: Code omitted. Done.");
    }

    #[test]
    fn strip_link_and_image() {
        let result = normalize("See [your chart](https://example.com) ![wheel](w.png).").unwrap();
        assert_eq!(result, "See your chart image: wheel.");
    }

    #[test]
    fn strip_headers_lists_and_quotes() {
        let result = normalize("## Love\n- First\n2) Second\n> Quoted line.").unwrap();
        assert_eq!(result, "Love First Second Quoted line.");
    }

    #[test]
    fn horizontal_rule_removed() {
        assert_eq!(normalize("Above.\n---\nBelow.").unwrap(), "Above. Below.");
    }

    #[test]
    fn strip_emphasis_tags_and_emoji() {
        let result = normalize("Great <em>news</em> 🌟 for <strong>Leo</strong> ✨!").unwrap();
        assert_eq!(result, "Great news for Leo !");
    }

    #[test]
    fn strip_reasoning_blocks_case_insensitive() {
        let input = "Before. <THINK duration=\"5\">Hidden.</THINK> After.\n<reasoning>x</reasoning>End.";
        assert_eq!(normalize(input).unwrap(), "Before. After. End.");
    }

    #[test]
    fn unterminated_reasoning_tag_is_left_alone() {
        let result = normalize("<think>never closed").unwrap();
        assert_eq!(result, "never closed");
    }
}
