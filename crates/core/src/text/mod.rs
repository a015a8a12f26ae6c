//! Text ports consumed by the correction engine and the card catalog.
//!
//! Tokens carry byte spans into the text they were cut from, so highlights can
//! be rendered without re-segmenting.

mod lao;
mod phonology;

pub use lao::{ConsonantClass, LaoTextProcessor, contains_lao_characters};
pub use phonology::TokenShape;

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` into a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The covered slice of `text`, if the span lies on char boundaries.
    #[must_use]
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.start..self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub span: Span,
}

impl Token {
    #[must_use]
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        Self {
            text: text.into(),
            span,
        }
    }
}

/// Splits normalized text into comparable units.
pub trait Segmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<Token>;
}

/// Produces a Latin transliteration of target-language text.
pub trait Romanizer: Send + Sync {
    fn romanize(&self, text: &str) -> String;
}
