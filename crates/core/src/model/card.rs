use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CardId, LessonStage};
use crate::text::Romanizer;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CardError {
    #[error("card text cannot be empty")]
    EmptyText,

    #[error("difficulty must be between 1 and 5, got {provided}")]
    DifficultyOutOfRange { provided: u8 },

    #[error("cards cannot belong to the {0} stage")]
    InvalidStage(LessonStage),
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Unvalidated card as it arrives from a content import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDraft {
    pub text: String,
    pub romanized: Option<String>,
    pub annotation: Option<String>,
    pub translation: Option<String>,
    pub tags: Vec<String>,
    pub stage: LessonStage,
    pub difficulty: u8,
}

impl CardDraft {
    #[must_use]
    pub fn new(text: impl Into<String>, stage: LessonStage) -> Self {
        Self {
            text: text.into(),
            romanized: None,
            annotation: None,
            translation: None,
            tags: Vec::new(),
            stage,
            difficulty: 1,
        }
    }

    #[must_use]
    pub fn with_translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = Some(translation.into());
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Validate the draft and assign it an id.
    ///
    /// A missing romanisation is filled in with `romanizer`.
    ///
    /// # Errors
    ///
    /// Returns `CardError` if the text is blank, the difficulty is outside
    /// 1–5, or the stage has no curriculum of its own.
    pub fn validate(
        self,
        id: CardId,
        romanizer: &dyn Romanizer,
        now: DateTime<Utc>,
    ) -> Result<Card, CardError> {
        let text = self.text.trim().to_owned();
        if text.is_empty() {
            return Err(CardError::EmptyText);
        }
        if !(1..=5).contains(&self.difficulty) {
            return Err(CardError::DifficultyOutOfRange {
                provided: self.difficulty,
            });
        }
        if !self.stage.has_curriculum() {
            return Err(CardError::InvalidStage(self.stage));
        }

        let romanized = match self.romanized {
            Some(r) if !r.trim().is_empty() => r.trim().to_owned(),
            _ => romanizer.romanize(&text),
        };

        Ok(Card {
            id,
            text,
            romanized,
            annotation: self.annotation.filter(|a| !a.trim().is_empty()),
            translation: self.translation.filter(|t| !t.trim().is_empty()),
            tags: self.tags,
            stage: self.stage,
            difficulty: self.difficulty,
            created_at: now,
        })
    }
}

//
// ─── CARD ──────────────────────────────────────────────────────────────────────
//

/// An atomic practice item owned by the content catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    id: CardId,
    text: String,
    romanized: String,
    annotation: Option<String>,
    translation: Option<String>,
    tags: Vec<String>,
    stage: LessonStage,
    difficulty: u8,
    created_at: DateTime<Utc>,
}

impl Card {
    /// Rehydrate a card from storage.
    ///
    /// # Errors
    ///
    /// Returns `CardError` if the persisted row violates card invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: CardId,
        text: String,
        romanized: String,
        annotation: Option<String>,
        translation: Option<String>,
        tags: Vec<String>,
        stage: LessonStage,
        difficulty: u8,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CardError> {
        if text.trim().is_empty() {
            return Err(CardError::EmptyText);
        }
        if !(1..=5).contains(&difficulty) {
            return Err(CardError::DifficultyOutOfRange {
                provided: difficulty,
            });
        }
        if !stage.has_curriculum() {
            return Err(CardError::InvalidStage(stage));
        }
        Ok(Self {
            id,
            text,
            romanized,
            annotation,
            translation,
            tags,
            stage,
            difficulty,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> CardId {
        self.id
    }

    /// Target text the learner should produce.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn romanized(&self) -> &str {
        &self.romanized
    }

    #[must_use]
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    #[must_use]
    pub fn translation(&self) -> Option<&str> {
        self.translation.as_deref()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[must_use]
    pub fn stage(&self) -> LessonStage {
        self.stage
    }

    #[must_use]
    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::LaoTextProcessor;
    use crate::time::fixed_now;

    #[test]
    fn blank_text_is_rejected() {
        let err = CardDraft::new("   ", LessonStage::Alphabet)
            .validate(CardId::new(1), &LaoTextProcessor::new(), fixed_now())
            .unwrap_err();
        assert_eq!(err, CardError::EmptyText);
    }

    #[test]
    fn review_stage_cards_are_rejected() {
        let err = CardDraft::new("ສະບາຍດີ", LessonStage::Review)
            .validate(CardId::new(1), &LaoTextProcessor::new(), fixed_now())
            .unwrap_err();
        assert_eq!(err, CardError::InvalidStage(LessonStage::Review));
    }

    #[test]
    fn difficulty_is_bounded() {
        let err = CardDraft::new("ກ", LessonStage::Alphabet)
            .with_difficulty(9)
            .validate(CardId::new(1), &LaoTextProcessor::new(), fixed_now())
            .unwrap_err();
        assert_eq!(err, CardError::DifficultyOutOfRange { provided: 9 });
    }

    #[test]
    fn missing_romanisation_is_filled_in() {
        let card = CardDraft::new(" ສະບາຍດີ ", LessonStage::Onboarding)
            .with_translation("Hello")
            .validate(CardId::new(7), &LaoTextProcessor::new(), fixed_now())
            .unwrap();
        assert_eq!(card.text(), "ສະບາຍດີ");
        assert!(!card.romanized().is_empty());
        assert_eq!(card.translation(), Some("Hello"));
        assert_eq!(card.stage(), LessonStage::Onboarding);
    }
}
