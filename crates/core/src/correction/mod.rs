//! Diagnoses a transcript against a target phrase.
//!
//! The pipeline is normalize → segment → align → classify → score → explain.
//! Empty input on either side is a degraded diagnosis, never an error.

mod align;
mod explain;
mod normalize;
mod rules;

pub use align::{Alignment, EditOp, align};
pub use explain::{ExplanationCatalog, TemplateCatalog};
pub use normalize::{Normalized, normalize};
pub use rules::{MismatchKind, RULES, Rule, RuleId, TokenPair, Verdict, classify};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::SkillTally;
use crate::text::{LaoTextProcessor, Segmenter, Span, Token};

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid correction configuration: {0}")]
pub struct CorrectionConfigError(pub &'static str);

/// Scoring weights and the pass threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub pass_threshold: f64,
    pub tone_penalty: f64,
    pub consonant_penalty: f64,
    pub lexical_penalty: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.6,
            tone_penalty: 0.5,
            consonant_penalty: 0.5,
            lexical_penalty: 1.0,
        }
    }
}

impl CorrectionConfig {
    /// # Errors
    ///
    /// Returns `CorrectionConfigError` if the threshold is outside `[0, 1]` or
    /// a penalty is negative or not finite.
    pub fn validate(&self) -> Result<(), CorrectionConfigError> {
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(CorrectionConfigError("pass_threshold must be in [0, 1]"));
        }
        for p in [
            self.tone_penalty,
            self.consonant_penalty,
            self.lexical_penalty,
        ] {
            if !p.is_finite() || p < 0.0 {
                return Err(CorrectionConfigError("penalties must be finite and >= 0"));
            }
        }
        Ok(())
    }

    fn penalty(&self, kind: MismatchKind) -> f64 {
        match kind {
            MismatchKind::ToneError => self.tone_penalty,
            MismatchKind::ConsonantError => self.consonant_penalty,
            MismatchKind::LexicalError | MismatchKind::EmptyInput => self.lexical_penalty,
        }
    }
}

//
// ─── DIAGNOSIS ─────────────────────────────────────────────────────────────────
//

/// One token-level problem.
///
/// `source_span` points into the raw transcript the learner produced,
/// `expected_span` into the raw target text. `heard` and `expected` are the
/// normalized tokens that were compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub rule: RuleId,
    pub source_span: Option<Span>,
    pub expected_span: Option<Span>,
    pub heard: String,
    pub expected: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// The transcript as received; `source_span`s index into it.
    pub transcript: String,
    pub normalized_transcript: String,
    pub normalized_target: String,
    /// In transcript order.
    pub mismatches: Vec<Mismatch>,
    pub passed: bool,
    /// In `[0, 1]`.
    pub score: f64,
    /// In `[0, 1]`.
    pub severity: f64,
    pub edit_distance: usize,
    pub target_token_count: usize,
}

impl Diagnosis {
    /// True for an empty-input diagnosis (silence, timeout, blank target).
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.mismatches
            .iter()
            .any(|m| m.kind == MismatchKind::EmptyInput)
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.mismatches.is_empty()
    }

    #[must_use]
    pub fn has_kind(&self, kind: MismatchKind) -> bool {
        self.mismatches.iter().any(|m| m.kind == kind)
    }

    /// Spans of the raw transcript to highlight.
    #[must_use]
    pub fn highlights(&self) -> Vec<Span> {
        self.mismatches.iter().filter_map(|m| m.source_span).collect()
    }

    /// Error counts to fold into the learner's proficiency.
    #[must_use]
    pub fn skill_tally(&self) -> SkillTally {
        let count = |kind| self.mismatches.iter().filter(|m| m.kind == kind).count() as u64;
        SkillTally {
            tokens: self.target_token_count as u64,
            tone_errors: count(MismatchKind::ToneError),
            consonant_errors: count(MismatchKind::ConsonantError),
            lexical_errors: count(MismatchKind::LexicalError),
        }
    }
}

/// Both normalized sides of one comparison.
struct Sides<'a> {
    heard: &'a Normalized,
    expected: &'a Normalized,
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Pure, synchronous correction engine.
#[derive(Clone)]
pub struct CorrectionEngine {
    segmenter: Arc<dyn Segmenter>,
    catalog: Arc<dyn ExplanationCatalog>,
    config: CorrectionConfig,
}

impl std::fmt::Debug for CorrectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for CorrectionEngine {
    fn default() -> Self {
        Self {
            segmenter: Arc::new(LaoTextProcessor::new()),
            catalog: Arc::new(TemplateCatalog::default()),
            config: CorrectionConfig::default(),
        }
    }
}

impl CorrectionEngine {
    /// # Errors
    ///
    /// Returns `CorrectionConfigError` if `config` does not validate.
    pub fn new(
        segmenter: Arc<dyn Segmenter>,
        catalog: Arc<dyn ExplanationCatalog>,
        config: CorrectionConfig,
    ) -> Result<Self, CorrectionConfigError> {
        config.validate()?;
        Ok(Self {
            segmenter,
            catalog,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Compare `transcript` with `target`.
    #[must_use]
    pub fn diagnose(&self, transcript: &str, target: &str) -> Diagnosis {
        let heard_text = Normalized::new(transcript);
        let expected_text = Normalized::new(target);
        let heard = self.segmenter.segment(&heard_text.text);
        let expected = self.segmenter.segment(&expected_text.text);

        if heard.is_empty() || expected.is_empty() {
            return self.empty_input(
                transcript,
                heard_text.text,
                expected_text.text,
                &heard,
                &expected,
            );
        }

        let sides = Sides {
            heard: &heard_text,
            expected: &expected_text,
        };

        let alignment = align(&heard, &expected);
        let mut mismatches = Vec::new();

        for op in alignment.ops {
            let mismatch = match op {
                EditOp::Match { .. } => continue,
                EditOp::Substitute { heard: h, expected: e } => {
                    let pair = TokenPair::new(&heard[h].text, &expected[e].text);
                    let Verdict::Mismatch { kind, rule } = classify(&pair) else {
                        continue;
                    };
                    let detail = match kind {
                        MismatchKind::ConsonantError => pair.consonant_detail(),
                        _ => None,
                    };
                    self.mismatch(
                        &sides,
                        kind,
                        rule,
                        Some(&heard[h]),
                        Some(&expected[e]),
                        detail,
                    )
                }
                EditOp::Insert { heard: h } => self.mismatch(
                    &sides,
                    MismatchKind::LexicalError,
                    RuleId::ExtraToken,
                    Some(&heard[h]),
                    None,
                    None,
                ),
                EditOp::Delete { expected: e } => self.mismatch(
                    &sides,
                    MismatchKind::LexicalError,
                    RuleId::MissingToken,
                    None,
                    Some(&expected[e]),
                    None,
                ),
            };
            mismatches.push(mismatch);
        }

        let penalty: f64 = mismatches.iter().map(|m| self.config.penalty(m.kind)).sum();
        #[allow(clippy::cast_precision_loss)]
        let n = expected.len() as f64;
        let score = ((n - penalty) / n.max(1.0)).clamp(0.0, 1.0);
        let severity = (penalty / n.max(1.0)).min(1.0);

        Diagnosis {
            transcript: transcript.to_owned(),
            normalized_transcript: heard_text.text,
            normalized_target: expected_text.text,
            mismatches,
            passed: score >= self.config.pass_threshold,
            score,
            severity,
            edit_distance: alignment.distance,
            target_token_count: expected.len(),
        }
    }

    /// Diagnosis for an attempt that produced no usable transcript.
    #[must_use]
    pub fn degraded(&self, target: &str) -> Diagnosis {
        self.diagnose("", target)
    }

    fn empty_input(
        &self,
        transcript: &str,
        normalized_transcript: String,
        normalized_target: String,
        heard: &[Token],
        expected: &[Token],
    ) -> Diagnosis {
        let explanation = self.catalog.explain(
            RuleId::EmptyInput,
            &normalized_transcript,
            &normalized_target,
            None,
        );
        Diagnosis {
            mismatches: vec![Mismatch {
                kind: MismatchKind::EmptyInput,
                rule: RuleId::EmptyInput,
                source_span: None,
                expected_span: None,
                heard: normalized_transcript.clone(),
                expected: normalized_target.clone(),
                explanation,
            }],
            transcript: transcript.to_owned(),
            normalized_transcript,
            normalized_target,
            passed: false,
            score: 0.0,
            severity: 1.0,
            edit_distance: heard.len().max(expected.len()),
            target_token_count: expected.len(),
        }
    }

    fn mismatch(
        &self,
        sides: &Sides<'_>,
        kind: MismatchKind,
        rule: RuleId,
        heard: Option<&Token>,
        expected: Option<&Token>,
        detail: Option<String>,
    ) -> Mismatch {
        let heard_text = heard.map_or("", |t| t.text.as_str());
        let expected_text = expected.map_or("", |t| t.text.as_str());
        Mismatch {
            kind,
            rule,
            source_span: heard.and_then(|t| sides.heard.raw_span(t.span)),
            expected_span: expected.and_then(|t| sides.expected.raw_span(t.span)),
            heard: heard_text.to_owned(),
            expected: expected_text.to_owned(),
            explanation: self
                .catalog
                .explain(rule, heard_text, expected_text, detail.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CorrectionEngine {
        CorrectionEngine::default()
    }

    #[test]
    fn exact_transcript_scores_one() {
        let d = engine().diagnose("ສະບາຍດີ", "ສະບາຍດີ");
        assert!(d.is_exact());
        assert!(d.passed);
        assert!((d.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(d.edit_distance, 0);
        assert!(d.severity.abs() < f64::EPSILON);
    }

    #[test]
    fn punctuation_and_case_are_ignored() {
        let d = engine().diagnose("ທ່ານສະບາຍດີບໍ", "ທ່ານສະບາຍດີບໍ?");
        assert!(d.is_exact());
        let d = engine().diagnose("Sa Baai Dii!", "sa baai dii");
        assert!(d.is_exact());
    }

    #[test]
    fn single_token_tone_error_scores_half() {
        let d = engine().diagnose("ໄມ່", "ໄມ້");
        assert_eq!(d.mismatches.len(), 1);
        let m = &d.mismatches[0];
        assert_eq!(m.kind, MismatchKind::ToneError);
        assert_eq!(m.rule, RuleId::ToneMarker);
        assert!((d.score - 0.5).abs() < f64::EPSILON);
        assert!(!d.passed);
    }

    #[test]
    fn tone_error_on_longer_card_is_proportional() {
        let d = engine().diagnose("sa baai dii2", "sa baai dii");
        assert_eq!(d.mismatches.len(), 1);
        assert_eq!(d.mismatches[0].kind, MismatchKind::ToneError);
        assert!((d.score - (1.0 - 0.5 / 3.0)).abs() < 1e-9);
        assert!(d.passed);
    }

    #[test]
    fn consonant_error_explains_classes() {
        let d = engine().diagnose("ຊາ", "ສາ");
        assert_eq!(d.mismatches.len(), 1);
        let m = &d.mismatches[0];
        assert_eq!(m.kind, MismatchKind::ConsonantError);
        assert!(m.explanation.contains("high-class"));
    }

    #[test]
    fn missing_and_extra_tokens_are_lexical() {
        let d = engine().diagnose("sa dii", "sa baai dii");
        assert_eq!(d.mismatches.len(), 1);
        assert_eq!(d.mismatches[0].rule, RuleId::MissingToken);
        assert_eq!(d.mismatches[0].source_span, None);

        let d = engine().diagnose("sa baai dii lai", "sa baai dii");
        assert_eq!(d.mismatches[0].rule, RuleId::ExtraToken);
        assert_eq!(d.mismatches[0].expected_span, None);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let d = engine().diagnose("one two three four five", "dii");
        assert!(d.score.abs() < f64::EPSILON);
        assert!((d.severity - 1.0).abs() < f64::EPSILON);
        assert_eq!(d.edit_distance, 5);
    }

    #[test]
    fn edit_distance_counts_non_matching_ops() {
        let d = engine().diagnose("sa bai dii lai", "sa baai dii");
        assert_eq!(d.edit_distance, d.mismatches.len());
    }

    #[test]
    fn highlights_point_into_the_raw_transcript() {
        let d = engine().diagnose("Sa, BAI dii", "sa baai dii");
        let spans = d.highlights();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].slice(&d.transcript), Some("BAI"));
        assert_eq!(d.mismatches[0].heard, "bai");
    }

    #[test]
    fn highlights_skip_leading_punctuation() {
        let raw = "Well... sa BAI dii";
        let d = engine().diagnose(raw, "well sa baai dii");
        assert_eq!(d.transcript, raw);
        let spans = d.highlights();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].slice(raw), Some("BAI"));
        let expected = d.mismatches[0].expected_span.unwrap();
        assert_eq!(expected.slice("well sa baai dii"), Some("baai"));
    }

    #[test]
    fn tone_slip_on_a_one_syllable_card_scores_half() {
        let d = engine().diagnose("ສ້ອງ", "ສອງ");
        assert_eq!(d.target_token_count, 1);
        assert_eq!(d.mismatches.len(), 1);
        assert_eq!(d.mismatches[0].kind, MismatchKind::ToneError);
        assert!((d.score - 0.5).abs() < f64::EPSILON);
        assert!(!d.passed);
    }

    #[test]
    fn a_different_final_consonant_fails_the_card() {
        let d = engine().diagnose("ສອນ", "ສອງ");
        assert_eq!(d.mismatches.len(), 1);
        assert!(!d.passed);
        assert!(d.score < 0.6);
    }

    #[test]
    fn seeded_number_cards_are_single_tokens() {
        for word in ["ສອງ", "ສາມ", "ສູນ", "ສິບ", "ຫົກ"] {
            let d = engine().diagnose(word, word);
            assert_eq!(d.target_token_count, 1, "{word}");
            assert!(d.is_exact());
        }
    }

    #[test]
    fn empty_transcript_is_degraded_not_an_error() {
        for transcript in ["", "   ", "?!"] {
            let d = engine().diagnose(transcript, "ສະບາຍດີ");
            assert!(d.is_degraded());
            assert_eq!(d.mismatches.len(), 1);
            assert!(d.score.abs() < f64::EPSILON);
            assert!(!d.passed);
        }
        assert!(engine().diagnose("ສະບາຍດີ", "").is_degraded());
        assert!(engine().degraded("ສະບາຍດີ").is_degraded());
    }

    #[test]
    fn skill_tally_counts_kinds() {
        let d = engine().diagnose("sa2 paai", "sa baai dii");
        let tally = d.skill_tally();
        assert_eq!(tally.tokens, 3);
        assert_eq!(tally.tone_errors, 1);
        assert_eq!(tally.consonant_errors, 1);
        assert_eq!(tally.lexical_errors, 1);
    }

    #[test]
    fn custom_weights() {
        let config = CorrectionConfig {
            tone_penalty: 1.0,
            ..CorrectionConfig::default()
        };
        let engine = CorrectionEngine::new(
            Arc::new(LaoTextProcessor::new()),
            Arc::new(TemplateCatalog::default()),
            config,
        )
        .unwrap();
        assert!(engine.diagnose("ໄມ່", "ໄມ້").score.abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = CorrectionConfig {
            pass_threshold: 1.5,
            ..CorrectionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
