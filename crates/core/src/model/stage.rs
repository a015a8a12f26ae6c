use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pedagogical states of a practice session.
///
/// The linear order is `Onboarding → Alphabet → Tones → Numbers →
/// PhrasePractice → Review → FreeConversation`. `Review` is additionally
/// entered on top of any other stage when cards fall due, and `Ended` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStage {
    Onboarding,
    Alphabet,
    Tones,
    Numbers,
    PhrasePractice,
    Review,
    FreeConversation,
    Ended,
}

impl LessonStage {
    /// Stages in promotion order (terminal `Ended` excluded).
    pub const ORDER: [LessonStage; 7] = [
        LessonStage::Onboarding,
        LessonStage::Alphabet,
        LessonStage::Tones,
        LessonStage::Numbers,
        LessonStage::PhrasePractice,
        LessonStage::Review,
        LessonStage::FreeConversation,
    ];

    /// Stage reached on promotion, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Stage reached on demotion, if any.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        idx.checked_sub(1).and_then(|i| Self::ORDER.get(i).copied())
    }

    /// Whether cards for this stage come from the content catalog.
    ///
    /// `Review` draws from the learner's due queue instead.
    #[must_use]
    pub fn has_curriculum(self) -> bool {
        !matches!(self, LessonStage::Review | LessonStage::Ended)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonStage::Onboarding => "onboarding",
            LessonStage::Alphabet => "alphabet",
            LessonStage::Tones => "tones",
            LessonStage::Numbers => "numbers",
            LessonStage::PhrasePractice => "phrase_practice",
            LessonStage::Review => "review",
            LessonStage::FreeConversation => "free_conversation",
            LessonStage::Ended => "ended",
        }
    }
}

impl fmt::Display for LessonStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stage name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lesson stage: {0}")]
pub struct ParseStageError(pub String);

impl FromStr for LessonStage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(LessonStage::Onboarding),
            "alphabet" => Ok(LessonStage::Alphabet),
            "tones" => Ok(LessonStage::Tones),
            "numbers" => Ok(LessonStage::Numbers),
            "phrase_practice" => Ok(LessonStage::PhrasePractice),
            "review" => Ok(LessonStage::Review),
            "free_conversation" => Ok(LessonStage::FreeConversation),
            "ended" => Ok(LessonStage::Ended),
            other => Err(ParseStageError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_walks_forward_and_back() {
        assert_eq!(LessonStage::Onboarding.previous(), None);
        assert_eq!(LessonStage::Tones.next(), Some(LessonStage::Numbers));
        assert_eq!(LessonStage::PhrasePractice.next(), Some(LessonStage::Review));
        assert_eq!(LessonStage::Review.next(), Some(LessonStage::FreeConversation));
        assert_eq!(LessonStage::FreeConversation.next(), None);
        assert_eq!(LessonStage::Ended.next(), None);
        assert_eq!(LessonStage::Ended.previous(), None);
    }

    #[test]
    fn names_round_trip() {
        for stage in LessonStage::ORDER {
            assert_eq!(stage.as_str().parse::<LessonStage>().unwrap(), stage);
        }
        assert!("karaoke".parse::<LessonStage>().is_err());
    }
}
