//! Local fallback explanation
//!
//! Used when consent is missing or every provider failed. Derived from the
//! word count alone, so it needs no network and cannot fail.

use super::request::{ExplanationRequest, ExplanationResult, LOCAL_PROVIDER};

/// Selections up to this many words are a "short phrase"
const SHORT_PHRASE_MAX_WORDS: usize = 12;
/// Selections up to this many words are a "paragraph"
const PARAGRAPH_MAX_WORDS: usize = 120;

/// Size bucket of a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSize {
    ShortPhrase,
    Paragraph,
    LongPassage,
}

impl SelectionSize {
    pub fn from_word_count(words: usize) -> Self {
        if words <= SHORT_PHRASE_MAX_WORDS {
            SelectionSize::ShortPhrase
        } else if words <= PARAGRAPH_MAX_WORDS {
            SelectionSize::Paragraph
        } else {
            SelectionSize::LongPassage
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SelectionSize::ShortPhrase => "short phrase",
            SelectionSize::Paragraph => "paragraph",
            SelectionSize::LongPassage => "long passage",
        }
    }
}

/// Build the deterministic local explanation for a request
pub fn local_explanation(request: &ExplanationRequest) -> ExplanationResult {
    let words = request.word_count();
    let size = SelectionSize::from_word_count(words);
    let noun = if words == 1 { "word" } else { "words" };

    let hint = match size {
        SelectionSize::ShortPhrase => {
            "Reading it aloud slowly, or looking it up in a dictionary, usually makes the meaning clear."
        }
        SelectionSize::Paragraph => {
            "Try listening to it one sentence at a time and picking out the main idea of each."
        }
        SelectionSize::LongPassage => {
            "Consider listening in smaller sections; the first and last sentences often summarise the point."
        }
    };

    let explanation = format!(
        "This is a {} of {} {}. {} An AI explanation is not available right now.",
        size.label(),
        words,
        noun,
        hint
    );

    ExplanationResult::new(explanation, LOCAL_PROVIDER, Vec::new())
}
