use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use super::lao::{is_lao, is_lao_consonant, is_lao_tone_mark};

/// Combining diacritics that carry tone in romanised input (after NFD).
const LATIN_TONE_DIACRITICS: [char; 9] = [
    '\u{0300}', // grave
    '\u{0301}', // acute
    '\u{0302}', // circumflex
    '\u{0303}', // tilde
    '\u{0304}', // macron
    '\u{0306}', // breve
    '\u{0309}', // hook above
    '\u{030C}', // caron
    '\u{0323}', // dot below
];

fn is_tone_marker(c: char) -> bool {
    is_lao_tone_mark(c) || LATIN_TONE_DIACRITICS.contains(&c)
}

fn is_tone_digit(c: char) -> bool {
    ('1'..='6').contains(&c)
}

fn is_consonant(c: char) -> bool {
    if is_lao(c) {
        return is_lao_consonant(c);
    }
    c.is_alphabetic() && !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// A token split into the parts the mismatch rules compare.
///
/// - `base` is the token with every tone marker removed (NFC).
/// - `tones` are the removed markers in order: Lao tone marks, Latin tone
///   diacritics, or a trailing tone digit `1`–`6` after a letter.
/// - `consonants` and `vowels` partition `base`; everything that is not a
///   consonant counts towards the vowel skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenShape {
    base: String,
    tones: Vec<char>,
    consonants: Vec<char>,
    vowels: Vec<char>,
}

impl TokenShape {
    #[must_use]
    pub fn of(token: &str) -> Self {
        let decomposed: Vec<char> = token.nfd().collect();
        let mut tones = Vec::new();

        let body = match decomposed.split_last() {
            Some((last, rest))
                if is_tone_digit(*last)
                    && rest
                        .last()
                        .is_some_and(|c| c.is_alphabetic() || is_combining_mark(*c)) =>
            {
                tones.push(*last);
                rest
            }
            _ => &decomposed[..],
        };

        let mut stripped = String::with_capacity(token.len());
        for &c in body {
            if is_tone_marker(c) {
                tones.push(c);
            } else {
                stripped.push(c);
            }
        }
        let base: String = stripped.nfc().collect();

        let (consonants, vowels): (Vec<char>, Vec<char>) =
            base.chars().partition(|c| is_consonant(*c));

        Self {
            base,
            tones,
            consonants,
            vowels,
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn tones(&self) -> &[char] {
        &self.tones
    }

    #[must_use]
    pub fn consonants(&self) -> &[char] {
        &self.consonants
    }

    #[must_use]
    pub fn vowels(&self) -> &[char] {
        &self.vowels
    }

    /// First position where the consonant skeletons disagree, as
    /// `(heard, expected)`. A missing consonant is reported as `None`.
    #[must_use]
    pub fn consonant_difference(&self, expected: &Self) -> Option<(Option<char>, Option<char>)> {
        let len = self.consonants.len().max(expected.consonants.len());
        (0..len)
            .map(|i| {
                (
                    self.consonants.get(i).copied(),
                    expected.consonants.get(i).copied(),
                )
            })
            .find(|(a, b)| a != b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lao_tone_mark_is_split_from_the_base() {
        let heard = TokenShape::of("ໄມ່");
        let expected = TokenShape::of("ໄມ້");
        assert_eq!(heard.base(), expected.base());
        assert_ne!(heard.tones(), expected.tones());
        assert_eq!(heard.consonants(), &['ມ']);
        assert_eq!(heard.vowels(), &['ໄ']);
    }

    #[test]
    fn latin_diacritics_are_tones() {
        let shape = TokenShape::of("má");
        assert_eq!(shape.base(), "ma");
        assert_eq!(shape.tones(), &['\u{0301}']);
    }

    #[test]
    fn trailing_digit_is_a_tone() {
        let shape = TokenShape::of("mai2");
        assert_eq!(shape.base(), "mai");
        assert_eq!(shape.tones(), &['2']);

        let plain = TokenShape::of("10");
        assert_eq!(plain.base(), "10");
        assert!(plain.tones().is_empty());
    }

    #[test]
    fn consonant_and_vowel_skeletons() {
        let shape = TokenShape::of("baai");
        assert_eq!(shape.consonants(), &['b']);
        assert_eq!(shape.vowels(), &['a', 'a', 'i']);
    }

    #[test]
    fn reports_first_consonant_difference() {
        let heard = TokenShape::of("ຊາ");
        let expected = TokenShape::of("ສາ");
        assert_eq!(
            heard.consonant_difference(&expected),
            Some((Some('ຊ'), Some('ສ')))
        );
        assert_eq!(expected.consonant_difference(&expected), None);
    }
}
