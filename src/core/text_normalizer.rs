//! Text Normalization
//!
//! Strips markup from selected text before it is explained, and produces the
//! canonical form used for cache keys.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)\s*>").expect("valid regex");
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").expect("valid regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Common HTML entities seen in copied page text
const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&amp;", "&"),
];

/// Cleans selected text for sending to a provider
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer;

impl TextNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Remove tags, decode entities and collapse whitespace.
    ///
    /// Case is preserved; the result is what a provider sees.
    pub fn sanitize(&self, text: &str) -> String {
        let without_scripts = SCRIPT_BLOCK.replace_all(text, " ");
        let without_tags = TAG.replace_all(&without_scripts, " ");

        // &amp; is last in the table so "&amp;lt;" decodes to "&lt;", not "<"
        let mut decoded = without_tags.into_owned();
        for (entity, replacement) in ENTITIES {
            decoded = decoded.replace(entity, replacement);
        }

        // Control characters other than whitespace never belong in a prompt
        let printable: String = decoded
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .collect();

        WHITESPACE.replace_all(&printable, " ").trim().to_string()
    }

    /// Canonical form for cache lookups: sanitized and lowercased
    pub fn canonical(&self, text: &str) -> String {
        self.sanitize(text).to_lowercase()
    }

    /// Number of whitespace-separated words
    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }
}
