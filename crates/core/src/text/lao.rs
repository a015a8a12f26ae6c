use std::fmt;

use super::{Romanizer, Segmenter, Span, Token};

const LAO_BLOCK: std::ops::RangeInclusive<char> = '\u{0E80}'..='\u{0EFF}';
const LEADING_VOWELS: std::ops::RangeInclusive<char> = '\u{0EC0}'..='\u{0EC4}';
const TONE_MARKS: std::ops::RangeInclusive<char> = '\u{0EC8}'..='\u{0ECB}';
const DIGITS: std::ops::RangeInclusive<char> = '\u{0ED0}'..='\u{0ED9}';

const HO_SUNG: char = 'ຫ';
const CANCELLATION_MARK: char = '\u{0ECC}';

/// True if the string includes Lao script characters.
#[must_use]
pub fn contains_lao_characters(text: &str) -> bool {
    text.chars().any(|c| LAO_BLOCK.contains(&c))
}

pub(crate) fn is_lao(c: char) -> bool {
    LAO_BLOCK.contains(&c)
}

pub(crate) fn is_lao_consonant(c: char) -> bool {
    ('\u{0E81}'..='\u{0EAE}').contains(&c) || ('\u{0EDC}'..='\u{0EDF}').contains(&c)
}

pub(crate) fn is_lao_tone_mark(c: char) -> bool {
    TONE_MARKS.contains(&c)
}

fn is_leading_vowel(c: char) -> bool {
    LEADING_VOWELS.contains(&c)
}

fn is_lao_digit(c: char) -> bool {
    DIGITS.contains(&c)
}

/// Vowel signs and tone marks written above, below or after a consonant.
fn is_dependent_sign(c: char) -> bool {
    ('\u{0EB0}'..='\u{0EBD}').contains(&c) || ('\u{0EC8}'..='\u{0ECD}').contains(&c)
}

/// Short vowels that end the syllable they are written in.
fn is_closing_vowel(c: char) -> bool {
    matches!(c, 'ະ' | 'ຳ')
}

fn is_final_consonant(c: char) -> bool {
    matches!(c, 'ກ' | 'ງ' | 'ດ' | 'ນ' | 'ບ' | 'ມ' | 'ຍ' | 'ວ')
}

/// Sonorants that combine with a silent ຫ into a single initial.
fn is_sonorant(c: char) -> bool {
    matches!(c, 'ງ' | 'ຍ' | 'ນ' | 'ມ' | 'ລ' | 'ວ' | 'ຣ')
}

//
// ─── CONSONANT CLASSES ─────────────────────────────────────────────────────────
//

/// Lao consonant class; together with the tone mark it decides the tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsonantClass {
    High,
    Mid,
    Low,
}

impl ConsonantClass {
    #[must_use]
    pub fn of(c: char) -> Option<Self> {
        match c {
            'ກ' | 'ຈ' | 'ດ' | 'ຕ' | 'ບ' | 'ປ' | 'ຢ' | 'ອ' => Some(Self::Mid),
            'ຂ' | 'ສ' | 'ຖ' | 'ຜ' | 'ຝ' | 'ຫ' | 'ໜ' | 'ໝ' => Some(Self::High),
            'ຄ' | 'ງ' | 'ຊ' | 'ຍ' | 'ທ' | 'ນ' | 'ພ' | 'ຟ' | 'ມ' | 'ຣ' | 'ລ' | 'ວ' | 'ຮ' => {
                Some(Self::Low)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Mid => "mid",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ConsonantClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-class", self.as_str())
    }
}

//
// ─── PROCESSOR ─────────────────────────────────────────────────────────────────
//

/// Default Lao segmenter and romanizer.
///
/// Words are split on whitespace. Runs of Lao script are further cut into
/// written syllables: an initial consonant with the vowel signs and tone mark
/// around it, any vowel carrier (ອ ວ ຍ) and at most one final consonant
/// (ກ ງ ດ ນ ບ ມ ຍ ວ). Leading vowels (ເ ແ ໂ ໃ ໄ) open a syllable that the
/// next consonant joins, a silent ຫ joins the sonorant after it, and ວ ລ ຣ
/// before the first vowel sign form a consonant cluster with the initial.
/// A consonant followed by its own vowel sign always starts a new syllable.
/// Non-Lao runs stay whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaoTextProcessor;

impl LaoTextProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn clusters(word: &str) -> Vec<(usize, &str)> {
        let mut out = Vec::new();
        let mut current: Option<Cluster> = None;
        let mut chars = word.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            let next = chars.peek().map(|&(_, n)| n);
            let kind = if !is_lao(c) {
                ClusterKind::Foreign
            } else if is_lao_digit(c) {
                ClusterKind::Number
            } else {
                ClusterKind::Syllable
            };

            let extend = match current.as_mut() {
                Some(cl) if cl.kind == kind && kind != ClusterKind::Syllable => true,
                Some(cl) if cl.kind == ClusterKind::Syllable && kind == ClusterKind::Syllable => {
                    cl.accept(c, next)
                }
                _ => false,
            };

            if !extend {
                if let Some(cl) = current.take() {
                    out.push((cl.start, &word[cl.start..i]));
                }
                current = Some(Cluster::open(i, kind, c));
            }
        }

        if let Some(cl) = current {
            out.push((cl.start, &word[cl.start..]));
        }
        out
    }

    fn romanize_cluster(cluster: &str, out: &mut String) {
        let chars: Vec<char> = cluster.chars().collect();
        let Some(&first) = chars.first() else {
            return;
        };
        if !is_lao(first) {
            out.push_str(cluster);
            return;
        }

        // Leading vowels are written before the initial but spoken after it.
        let spoken: Vec<char> = if is_leading_vowel(first) {
            let n = match chars.get(1..3) {
                Some(&[HO_SUNG, s]) if is_sonorant(s) => 2,
                _ => usize::from(chars.get(1).is_some_and(|c| is_lao_consonant(*c))),
            };
            chars[1..=n]
                .iter()
                .chain(std::iter::once(&first))
                .chain(&chars[n + 1..])
                .copied()
                .collect()
        } else {
            chars
        };

        for (idx, c) in spoken.iter().copied().enumerate() {
            if c == HO_SUNG && spoken.get(idx + 1).is_some_and(|n| is_sonorant(*n)) {
                continue;
            }
            if let Some(r) = roman(c) {
                out.push_str(r);
            } else if is_lao_digit(c) {
                let value = u32::from(c) - u32::from('\u{0ED0}');
                if let Some(d) = char::from_digit(value, 10) {
                    out.push(d);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClusterKind {
    Syllable,
    Number,
    Foreign,
}

#[derive(Debug)]
struct Cluster {
    start: usize,
    kind: ClusterKind,
    /// Opened by a leading vowel and still waiting for its consonant.
    awaiting_consonant: bool,
    /// Last char was a bare ຫ that a sonorant may still join.
    bare_ho: bool,
    /// A vowel sign or vowel carrier has been written.
    has_nucleus: bool,
    /// A final consonant or a closing vowel (ະ ຳ) ended the syllable.
    closed: bool,
}

impl Cluster {
    fn open(start: usize, kind: ClusterKind, c: char) -> Self {
        let syllable = kind == ClusterKind::Syllable;
        Self {
            start,
            kind,
            awaiting_consonant: syllable && is_leading_vowel(c),
            bare_ho: c == HO_SUNG,
            has_nucleus: syllable && (is_leading_vowel(c) || is_dependent_sign(c)),
            closed: syllable && is_closing_vowel(c),
        }
    }

    /// Whether `c` still belongs to this syllable; `next` is the char after it.
    fn accept(&mut self, c: char, next: Option<char>) -> bool {
        if is_leading_vowel(c) {
            return false;
        }
        if is_lao_tone_mark(c) || c == CANCELLATION_MARK {
            self.bare_ho = false;
            return true;
        }
        if self.closed {
            return false;
        }
        if is_lao_consonant(c) {
            return self.accept_consonant(c, next);
        }

        self.bare_ho = false;
        self.has_nucleus = true;
        self.closed = is_closing_vowel(c);
        true
    }

    fn accept_consonant(&mut self, c: char, next: Option<char>) -> bool {
        if self.awaiting_consonant {
            self.awaiting_consonant = false;
            self.bare_ho = c == HO_SUNG;
            return true;
        }
        if self.bare_ho && is_sonorant(c) {
            self.bare_ho = false;
            return true;
        }
        self.bare_ho = false;

        // A consonant carrying its own vowel sign starts the next syllable,
        // unless it is a medial glide or liquid before the first vowel.
        if next.is_some_and(is_dependent_sign) {
            return !self.has_nucleus && matches!(c, 'ວ' | 'ລ' | 'ຣ');
        }

        match c {
            'ອ' => {
                self.has_nucleus = true;
                true
            }
            'ວ' | 'ຍ' if !self.has_nucleus => {
                self.has_nucleus = true;
                true
            }
            _ if is_final_consonant(c) => {
                self.closed = true;
                true
            }
            _ => false,
        }
    }
}

fn roman(c: char) -> Option<&'static str> {
    let r = match c {
        'ກ' => "k",
        'ຂ' | 'ຄ' => "kh",
        'ງ' => "ng",
        'ຈ' => "ch",
        'ສ' | 'ຊ' => "s",
        'ຍ' | 'ຢ' => "y",
        'ດ' => "d",
        'ຕ' => "t",
        'ຖ' | 'ທ' => "th",
        'ນ' | 'ໜ' => "n",
        'ບ' => "b",
        'ປ' => "p",
        'ຜ' | 'ພ' => "ph",
        'ຝ' | 'ຟ' => "f",
        'ມ' | 'ໝ' => "m",
        'ຣ' => "r",
        'ລ' | 'ຼ' => "l",
        'ວ' => "w",
        'ຫ' | 'ຮ' => "h",
        'ອ' | 'ໂ' | 'ົ' | 'ໍ' => "o",
        'ະ' | 'ັ' => "a",
        'າ' => "aa",
        'ຳ' => "am",
        'ິ' => "i",
        'ີ' => "ii",
        'ຶ' => "ue",
        'ື' => "uee",
        'ຸ' => "u",
        'ູ' => "uu",
        'ຽ' => "ia",
        'ເ' => "e",
        'ແ' => "ae",
        'ໄ' | 'ໃ' => "ai",
        _ => return None,
    };
    Some(r)
}

impl Segmenter for LaoTextProcessor {
    fn segment(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut word_start: Option<usize> = None;

        let flush = |start: usize, end: usize, tokens: &mut Vec<Token>| {
            let word = &text[start..end];
            for (offset, cluster) in Self::clusters(word) {
                let s = start + offset;
                tokens.push(Token::new(cluster, Span::new(s, s + cluster.len())));
            }
        };

        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), word_start) {
                (true, Some(start)) => {
                    flush(start, i, &mut tokens);
                    word_start = None;
                }
                (false, None) => word_start = Some(i),
                _ => {}
            }
        }
        if let Some(start) = word_start {
            flush(start, text.len(), &mut tokens);
        }
        tokens
    }
}

impl Romanizer for LaoTextProcessor {
    fn romanize(&self, text: &str) -> String {
        let mut words = Vec::new();
        for word in text.split_whitespace() {
            let mut out = String::new();
            for (_, cluster) in Self::clusters(word) {
                Self::romanize_cluster(cluster, &mut out);
            }
            if !out.is_empty() {
                words.push(out);
            }
        }
        words.join(" ")
    }
}
