//! Render-agnostic feedback for one turn.

use serde::{Deserialize, Serialize};

use tutor_core::correction::{Diagnosis, MismatchKind, RuleId};
use tutor_core::model::{Card, CardId, LessonStage};
use tutor_core::progression::SessionState;
use tutor_core::text::Span;

pub const PRAISE: &str = "ດີຫຼາຍ! Great job!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingRate {
    Normal,
    Slow,
}

/// What the learner should say next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub card_id: CardId,
    pub text: String,
    pub romanized: String,
    pub translation: Option<String>,
    pub stage: LessonStage,
}

impl Prompt {
    #[must_use]
    pub fn for_card(card: &Card, stage: LessonStage) -> Self {
        Self {
            card_id: card.id(),
            text: card.text().to_owned(),
            romanized: card.romanized().to_owned(),
            translation: card.translation().map(str::to_owned),
            stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub kind: MismatchKind,
    pub rule: RuleId,
    pub text: String,
}

/// Instruction set handed to whatever renders the turn (screen, speech).
///
/// `highlights` index into `display_text`, the transcript as the learner said it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderInstruction {
    pub display_text: String,
    pub highlights: Vec<Span>,
    pub explanations: Vec<Explanation>,
    pub spoken_phrase: String,
    pub speaking_rate: SpeakingRate,
    pub praise: Option<String>,
    pub score: f64,
    pub passed: bool,
    pub next_prompt: Option<Prompt>,
    pub stage: LessonStage,
}

/// Build the instruction set for a diagnosed attempt at `target`.
#[must_use]
pub fn render(
    diagnosis: &Diagnosis,
    target: &Card,
    next_card: Option<&Card>,
    session: &SessionState,
) -> RenderInstruction {
    let speaking_rate = if diagnosis.has_kind(MismatchKind::ToneError) {
        SpeakingRate::Slow
    } else {
        SpeakingRate::Normal
    };
    let praise = (diagnosis.passed && diagnosis.mismatches.is_empty()).then(|| PRAISE.to_owned());

    RenderInstruction {
        display_text: diagnosis.transcript.clone(),
        highlights: diagnosis.highlights(),
        explanations: diagnosis
            .mismatches
            .iter()
            .map(|m| Explanation {
                kind: m.kind,
                rule: m.rule,
                text: m.explanation.clone(),
            })
            .collect(),
        spoken_phrase: target.text().to_owned(),
        speaking_rate,
        praise,
        score: diagnosis.score,
        passed: diagnosis.passed,
        next_prompt: next_card.map(|c| Prompt::for_card(c, session.stage())),
        stage: session.stage(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::correction::CorrectionEngine;
    use tutor_core::model::{CardDraft, LearnerId, SessionId};
    use tutor_core::progression::ProgressionConfig;
    use tutor_core::text::LaoTextProcessor;
    use tutor_core::time::fixed_now;

    fn card(id: u64, text: &str) -> Card {
        CardDraft::new(text, LessonStage::Tones)
            .with_translation("gloss")
            .validate(CardId::new(id), &LaoTextProcessor::new(), fixed_now())
            .unwrap()
    }

    fn session() -> SessionState {
        SessionState::new(
            SessionId::generate(),
            LearnerId::new(1),
            LessonStage::Tones,
            ProgressionConfig::default(),
            fixed_now(),
        )
    }

    #[test]
    fn clean_pass_is_praised_at_normal_rate() {
        let target = card(1, "ສະບາຍດີ");
        let next = card(2, "ຂອບໃຈ");
        let diagnosis = CorrectionEngine::default().diagnose("ສະບາຍດີ", target.text());

        let out = render(&diagnosis, &target, Some(&next), &session());
        assert_eq!(out.praise.as_deref(), Some(PRAISE));
        assert_eq!(out.speaking_rate, SpeakingRate::Normal);
        assert!(out.highlights.is_empty());
        assert_eq!(out.spoken_phrase, "ສະບາຍດີ");
        assert_eq!(out.next_prompt.map(|p| p.card_id), Some(CardId::new(2)));
        assert_eq!(out.stage, LessonStage::Tones);
    }

    #[test]
    fn tone_errors_slow_the_spoken_phrase() {
        let target = card(1, "ma2");
        let diagnosis = CorrectionEngine::default().diagnose("ma3", target.text());
        assert!(diagnosis.has_kind(MismatchKind::ToneError));

        let out = render(&diagnosis, &target, None, &session());
        assert_eq!(out.speaking_rate, SpeakingRate::Slow);
        assert_eq!(out.praise, None);
        assert_eq!(out.explanations.len(), 1);
        assert_eq!(out.explanations[0].kind, MismatchKind::ToneError);
        assert_eq!(out.highlights.len(), 1);
        assert_eq!(out.highlights[0].slice(&out.display_text), Some("ma3"));
        assert!(out.next_prompt.is_none());
    }

    #[test]
    fn lexical_errors_keep_normal_rate() {
        let target = card(1, "sabaai dii");
        let diagnosis = CorrectionEngine::default().diagnose("sabaai", target.text());
        let out = render(&diagnosis, &target, None, &session());
        assert_eq!(out.speaking_rate, SpeakingRate::Normal);
        assert_eq!(out.explanations[0].rule, RuleId::MissingToken);
    }

    #[test]
    fn highlights_slice_what_the_learner_said() {
        let target = card(1, "ສະບາຍດີ");
        let raw = "... ສະບາຍ ດີ່!";
        let diagnosis = CorrectionEngine::default().diagnose(raw, target.text());

        let out = render(&diagnosis, &target, None, &session());
        assert_eq!(out.display_text, raw);
        assert_eq!(out.highlights.len(), 1);
        assert_eq!(out.highlights[0].slice(&out.display_text), Some("ດີ່"));
    }
}
