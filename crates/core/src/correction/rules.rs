use std::fmt;

use serde::{Deserialize, Serialize};

use crate::text::{ConsonantClass, TokenShape};

/// What went wrong with a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    ToneError,
    ConsonantError,
    LexicalError,
    EmptyInput,
}

impl MismatchKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MismatchKind::ToneError => "tone_error",
            MismatchKind::ConsonantError => "consonant_error",
            MismatchKind::LexicalError => "lexical_error",
            MismatchKind::EmptyInput => "empty_input",
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rule that produced a mismatch; keys the explanation catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    ToneMarker,
    ConsonantClass,
    Lexical,
    MissingToken,
    ExtraToken,
    EmptyInput,
}

impl RuleId {
    pub const ALL: [RuleId; 6] = [
        RuleId::ToneMarker,
        RuleId::ConsonantClass,
        RuleId::Lexical,
        RuleId::MissingToken,
        RuleId::ExtraToken,
        RuleId::EmptyInput,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::ToneMarker => "tone_marker",
            RuleId::ConsonantClass => "consonant_class",
            RuleId::Lexical => "lexical",
            RuleId::MissingToken => "missing_token",
            RuleId::ExtraToken => "extra_token",
            RuleId::EmptyInput => "empty_input",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── RULE TABLE ────────────────────────────────────────────────────────────────
//

/// A substituted heard/expected token pair with its decompositions.
#[derive(Debug, Clone)]
pub struct TokenPair<'a> {
    pub heard: &'a str,
    pub expected: &'a str,
    heard_shape: TokenShape,
    expected_shape: TokenShape,
}

impl<'a> TokenPair<'a> {
    #[must_use]
    pub fn new(heard: &'a str, expected: &'a str) -> Self {
        Self {
            heard,
            expected,
            heard_shape: TokenShape::of(heard),
            expected_shape: TokenShape::of(expected),
        }
    }

    /// Consonant-class note for the first differing consonant, when both
    /// sides have a known class.
    #[must_use]
    pub fn consonant_detail(&self) -> Option<String> {
        let (Some(h), Some(e)) = self.heard_shape.consonant_difference(&self.expected_shape)? else {
            return None;
        };
        let (hc, ec) = (ConsonantClass::of(h)?, ConsonantClass::of(e)?);
        Some(format!("{h} is a {hc} consonant, {e} is a {ec} consonant."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Exact,
    Mismatch { kind: MismatchKind, rule: RuleId },
}

pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&TokenPair<'_>) -> bool,
    pub verdict: Verdict,
}

/// Evaluated top to bottom; the first rule that applies decides. New rules
/// are inserted without reordering the existing ones.
pub const RULES: &[Rule] = &[
    Rule {
        name: "exact",
        applies: is_exact,
        verdict: Verdict::Exact,
    },
    Rule {
        name: "tone_only",
        applies: differs_in_tone_only,
        verdict: Verdict::Mismatch {
            kind: MismatchKind::ToneError,
            rule: RuleId::ToneMarker,
        },
    },
    Rule {
        name: "consonant_only",
        applies: differs_in_consonants_only,
        verdict: Verdict::Mismatch {
            kind: MismatchKind::ConsonantError,
            rule: RuleId::ConsonantClass,
        },
    },
    Rule {
        name: "lexical",
        applies: always,
        verdict: Verdict::Mismatch {
            kind: MismatchKind::LexicalError,
            rule: RuleId::Lexical,
        },
    },
];

fn is_exact(pair: &TokenPair<'_>) -> bool {
    pair.heard == pair.expected
}

fn differs_in_tone_only(pair: &TokenPair<'_>) -> bool {
    pair.heard_shape.base() == pair.expected_shape.base()
        && pair.heard_shape.tones() != pair.expected_shape.tones()
}

fn differs_in_consonants_only(pair: &TokenPair<'_>) -> bool {
    pair.heard_shape.tones() == pair.expected_shape.tones()
        && pair.heard_shape.vowels() == pair.expected_shape.vowels()
        && pair.heard_shape.consonants() != pair.expected_shape.consonants()
}

fn always(_: &TokenPair<'_>) -> bool {
    true
}

#[must_use]
pub fn classify(pair: &TokenPair<'_>) -> Verdict {
    RULES
        .iter()
        .find(|rule| (rule.applies)(pair))
        .map_or(
            Verdict::Mismatch {
                kind: MismatchKind::LexicalError,
                rule: RuleId::Lexical,
            },
            |rule| rule.verdict,
        )
}
