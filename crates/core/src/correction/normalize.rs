use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::{canonical_combining_class, is_combining_mark};

use crate::text::Span;

/// Canonical form both sides are compared in.
///
/// NFC, lower case, punctuation and symbols replaced by a space, whitespace
/// runs collapsed to a single space and trimmed.
#[must_use]
pub fn normalize(text: &str) -> String {
    Normalized::new(text).text
}

/// Normalized text that remembers where each of its bytes came from.
///
/// The raw input is composed one combining sequence at a time (a starter and
/// the marks after it), so every normalized byte maps back to the raw range of
/// the sequence that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    /// Raw byte range for every byte of `text`.
    origins: Vec<Span>,
}

impl Normalized {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let mut text = String::with_capacity(raw.len());
        let mut origins = Vec::with_capacity(raw.len());
        let mut pending_space: Option<Span> = None;

        for (start, sequence) in combining_sequences(raw) {
            let origin = Span::new(start, start + sequence.len());
            for c in sequence.nfc().flat_map(char::to_lowercase) {
                if c.is_alphanumeric() || is_combining_mark(c) {
                    if let Some(gap) = pending_space.take()
                        && !text.is_empty()
                    {
                        text.push(' ');
                        origins.push(gap);
                    }
                    let before = text.len();
                    text.push(c);
                    origins.resize(origins.len() + (text.len() - before), origin);
                } else {
                    pending_space.get_or_insert(origin);
                }
            }
        }

        Self { text, origins }
    }

    /// Map a span of the normalized text back onto the raw input.
    ///
    /// Returns `None` if the span lies outside the normalized text.
    #[must_use]
    pub fn raw_span(&self, span: Span) -> Option<Span> {
        if span.is_empty() {
            return match self.origins.get(span.start) {
                Some(origin) => Some(Span::new(origin.start, origin.start)),
                None if span.start == self.text.len() => {
                    let end = self.origins.last().map_or(0, |o| o.end);
                    Some(Span::new(end, end))
                }
                None => None,
            };
        }
        let first = self.origins.get(span.start)?;
        let last = self.origins.get(span.end.checked_sub(1)?)?;
        Some(Span::new(first.start, last.end))
    }
}

/// Cut `raw` before every char with canonical combining class 0.
fn combining_sequences(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut starts: Vec<usize> = raw
        .char_indices()
        .filter(|&(i, c)| i == 0 || canonical_combining_class(c) == 0)
        .map(|(i, _)| i)
        .collect();
    starts.push(raw.len());
    let bounds: Vec<(usize, usize)> = starts.windows(2).map(|w| (w[0], w[1])).collect();
    bounds.into_iter().map(move |(s, e)| (s, &raw[s..e]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        assert_eq!(normalize("  Hello,   World!! "), "hello world");
        assert_eq!(normalize("ທ່ານສະບາຍດີບໍ?"), "ທ່ານສະບາຍດີບໍ");
    }

    #[test]
    fn composes_decomposed_input() {
        assert_eq!(normalize("ma\u{0301}"), "m\u{00e1}");
    }

    #[test]
    fn keeps_lao_marks() {
        assert_eq!(normalize("ໄມ້"), "ໄມ້");
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(normalize(" ...  "), "");
    }

    #[test]
    fn spans_map_back_past_leading_punctuation() {
        let raw = "Well... sa BAI dii";
        let n = Normalized::new(raw);
        assert_eq!(n.text, "well sa bai dii");

        let bai = Span::new(8, 11);
        assert_eq!(bai.slice(&n.text), Some("bai"));
        let mapped = n.raw_span(bai).unwrap();
        assert_eq!(mapped.slice(raw), Some("BAI"));
    }

    #[test]
    fn composed_chars_cover_their_whole_raw_sequence() {
        let raw = "  MA\u{0301}!";
        let n = Normalized::new(raw);
        assert_eq!(n.text, "m\u{00e1}");
        let mapped = n.raw_span(Span::new(0, n.text.len())).unwrap();
        assert_eq!(mapped.slice(raw), Some("MA\u{0301}"));
    }

    #[test]
    fn lao_spans_map_to_the_same_bytes() {
        let raw = "«ສະບາຍດີ»";
        let n = Normalized::new(raw);
        assert_eq!(n.text, "ສະບາຍດີ");
        let mapped = n.raw_span(Span::new(0, n.text.len())).unwrap();
        assert_eq!(mapped.slice(raw), Some("ສະບາຍດີ"));
    }

    #[test]
    fn out_of_range_spans_are_rejected() {
        let n = Normalized::new("dii");
        assert_eq!(n.raw_span(Span::new(2, 9)), None);
        assert_eq!(n.raw_span(Span::new(3, 3)), Some(Span::new(3, 3)));
    }
}
