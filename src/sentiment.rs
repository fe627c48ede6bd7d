//! Inline sentiment tags in streamed model text
//!
//! The model is asked to prefix replies with `[SENTIMENT: POSITIVE]` (or
//! NEUTRAL, NEGATIVE). The extractor strips those tags from the text stream and
//! reports each one as a tone event. Text arrives in fragments, so a trailing
//! piece that could still grow into a tag is held back until the next fragment
//! or the end of the turn.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest trailing fragment held back while waiting for a tag to complete
const MAX_PENDING_TAG: usize = 32;

const TAG_OPEN: &str = "[sentiment";

/// Matches a complete tag plus the one space separating it from the body,
/// capturing the label
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[SENTIMENT:\s*([A-Za-z_]+)\s*\] ?").expect("valid regex")
});

/// Tone label carried by a sentiment tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    /// Any other label, uppercased
    #[serde(untagged)]
    Other(String),
}

impl Sentiment {
    /// Parse a tag label, case-insensitively
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let upper = label.trim().to_ascii_uppercase();
        match upper.as_str() {
            "POSITIVE" => Self::Positive,
            "NEUTRAL" => Self::Neutral,
            "NEGATIVE" => Self::Negative,
            _ => Self::Other(upper),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => f.write_str("POSITIVE"),
            Self::Neutral => f.write_str("NEUTRAL"),
            Self::Negative => f.write_str("NEGATIVE"),
            Self::Other(label) => f.write_str(label),
        }
    }
}

/// A recognized tag and the text it annotated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneEvent {
    pub sentiment: Sentiment,
    /// Fragment text with the tag removed, trimmed
    pub text: String,
}

/// Output of one `push` or `flush`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Text safe to display, tags removed
    pub text: String,
    /// One event per tag found
    pub tones: Vec<ToneEvent>,
}

impl Extracted {
    /// Check if nothing was produced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tones.is_empty()
    }
}

/// Strips sentiment tags from a stream of text fragments
#[derive(Debug, Default)]
pub struct SentimentExtractor {
    pending: String,
}

impl SentimentExtractor {
    /// Create an extractor with nothing buffered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment
    pub fn push(&mut self, fragment: &str) -> Extracted {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.push_str(fragment);

        let split = partial_tag_start(&buffer);
        self.pending = buffer.split_off(split);
        extract(&buffer)
    }

    /// End of turn: release whatever is held back
    pub fn flush(&mut self) -> Extracted {
        let buffer = std::mem::take(&mut self.pending);
        extract(&buffer)
    }

    /// Bytes currently held back
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Strip every complete tag from `text`
fn extract(text: &str) -> Extracted {
    if text.is_empty() {
        return Extracted::default();
    }

    let sentiments: Vec<Sentiment> = TAG_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| Sentiment::from_label(m.as_str()))
        .collect();

    if sentiments.is_empty() {
        return Extracted {
            text: text.to_string(),
            tones: Vec::new(),
        };
    }

    let stripped = TAG_PATTERN.replace_all(text, "").into_owned();
    let trimmed = stripped.trim().to_string();

    let tones = sentiments
        .into_iter()
        .map(|sentiment| {
            tracing::debug!(%sentiment, "sentiment tag detected");
            ToneEvent {
                sentiment,
                text: trimmed.clone(),
            }
        })
        .collect();

    Extracted {
        text: stripped,
        tones,
    }
}

/// Byte offset where a possibly incomplete trailing tag begins, else `text.len()`
fn partial_tag_start(text: &str) -> usize {
    let Some(open) = text.rfind('[') else {
        return text.len();
    };

    let tail = &text[open..];
    if tail.contains(']') || tail.len() > MAX_PENDING_TAG {
        return text.len();
    }

    if could_become_tag(tail) {
        open
    } else {
        text.len()
    }
}

/// Check if `tail` (starting at `[`, no `]`) is a prefix of some tag
fn could_become_tag(tail: &str) -> bool {
    let lower = tail.to_ascii_lowercase();

    if lower.len() <= TAG_OPEN.len() {
        return TAG_OPEN.starts_with(&lower);
    }

    let Some(rest) = lower.strip_prefix(TAG_OPEN) else {
        return false;
    };
    let Some(label) = rest.strip_prefix(':') else {
        return false;
    };

    let label = label.trim_start();
    let word_len = label
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .unwrap_or(label.len());
    label[word_len..].chars().all(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_tag() {
        let mut extractor = SentimentExtractor::new();
        let out = extractor.push("[SENTIMENT: POSITIVE] Great news!");

        assert_eq!(out.tones.len(), 1);
        assert_eq!(out.tones[0].sentiment, Sentiment::Positive);
        assert_eq!(out.tones[0].text, "Great news!");
        assert_eq!(out.text, "Great news!");
    }

    #[test]
    fn mid_text_tag_leaves_single_space() {
        let mut extractor = SentimentExtractor::new();
        let out = extractor.push("Revenue is up! [SENTIMENT: POSITIVE] Nice quarter.");
        assert_eq!(out.text, "Revenue is up! Nice quarter.");
    }

    #[test]
    fn label_is_case_insensitive() {
        let mut extractor = SentimentExtractor::new();
        let out = extractor.push("[sentiment:negative]Oh no");
        assert_eq!(out.tones[0].sentiment, Sentiment::Negative);
        assert_eq!(out.tones[0].text, "Oh no");
    }

    #[test]
    fn unknown_label_is_kept() {
        assert_eq!(
            Sentiment::from_label("curious"),
            Sentiment::Other("CURIOUS".to_string())
        );
    }

    #[test]
    fn plain_text_passes_through() {
        let mut extractor = SentimentExtractor::new();
        let out = extractor.push("Revenue is up [3%] today");
        assert!(out.tones.is_empty());
        assert_eq!(out.text, "Revenue is up [3%] today");
        assert!(extractor.pending().is_empty());
    }

    #[test]
    fn tag_split_across_fragments() {
        let mut extractor = SentimentExtractor::new();

        let first = extractor.push("Hello [SENTI");
        assert_eq!(first.text, "Hello ");
        assert!(first.tones.is_empty());
        assert_eq!(extractor.pending(), "[SENTI");

        let second = extractor.push("MENT: NEUTRAL] there");
        assert_eq!(second.tones.len(), 1);
        assert_eq!(second.tones[0].sentiment, Sentiment::Neutral);
        assert_eq!(second.tones[0].text, "there");
        assert_eq!(format!("{}{}", first.text, second.text), "Hello there");
    }

    #[test]
    fn flush_releases_held_text() {
        let mut extractor = SentimentExtractor::new();
        let out = extractor.push("see [sent");
        assert_eq!(out.text, "see ");

        let rest = extractor.flush();
        assert_eq!(rest.text, "[sent");
        assert!(rest.tones.is_empty());
        assert!(extractor.flush().is_empty());
    }

    #[test]
    fn bracket_that_cannot_become_tag_is_not_held() {
        let mut extractor = SentimentExtractor::new();
        let out = extractor.push("array[idx");
        assert_eq!(out.text, "array[idx");
        assert!(extractor.pending().is_empty());
    }

    #[test]
    fn partial_label_is_held() {
        assert!(could_become_tag("[SENTIMENT: POS"));
        assert!(could_become_tag("[sentiment:"));
        assert!(!could_become_tag("[SENTIMENT: POS ITIVE"));
        assert!(!could_become_tag("[SENTIMENTS"));
    }
}
