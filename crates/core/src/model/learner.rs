use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{LearnerId, SessionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LearnerError {
    #[error("learner {0} is archived")]
    Archived(LearnerId),

    #[error("skill {skill} has more errors ({errors}) than attempts ({attempts})")]
    InvalidCounters {
        skill: Skill,
        attempts: u64,
        errors: u64,
    },
}

/// Skills tracked in a learner's proficiency snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Tone,
    Consonant,
    Vocabulary,
}

impl std::fmt::Display for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Skill::Tone => "tone",
            Skill::Consonant => "consonant",
            Skill::Vocabulary => "vocabulary",
        })
    }
}

/// Per-turn error counts, folded into a learner's proficiency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkillTally {
    pub tokens: u64,
    pub tone_errors: u64,
    pub consonant_errors: u64,
    pub lexical_errors: u64,
}

/// Attempt/error counters for one skill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCounter {
    pub attempts: u64,
    pub errors: u64,
}

impl SkillCounter {
    /// Share of attempts without an error of this kind; `None` before any attempt.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> Option<f64> {
        (self.attempts > 0).then(|| 1.0 - self.errors as f64 / self.attempts as f64)
    }

    fn add(&mut self, attempts: u64, errors: u64) {
        self.attempts = self.attempts.saturating_add(attempts);
        // Extra spoken tokens can produce more errors than target tokens.
        self.errors = self.errors.saturating_add(errors.min(attempts));
    }
}

/// Current proficiency snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proficiency {
    pub tone: SkillCounter,
    pub consonant: SkillCounter,
    pub vocabulary: SkillCounter,
}

impl Proficiency {
    #[must_use]
    pub fn counter(&self, skill: Skill) -> SkillCounter {
        match skill {
            Skill::Tone => self.tone,
            Skill::Consonant => self.consonant,
            Skill::Vocabulary => self.vocabulary,
        }
    }

    #[must_use]
    pub fn accuracy(&self, skill: Skill) -> Option<f64> {
        self.counter(skill).accuracy()
    }

    pub fn record(&mut self, tally: &SkillTally) {
        self.tone.add(tally.tokens, tally.tone_errors);
        self.consonant.add(tally.tokens, tally.consonant_errors);
        self.vocabulary.add(tally.tokens, tally.lexical_errors);
    }

    fn validate(&self) -> Result<(), LearnerError> {
        for skill in [Skill::Tone, Skill::Consonant, Skill::Vocabulary] {
            let c = self.counter(skill);
            if c.errors > c.attempts {
                return Err(LearnerError::InvalidCounters {
                    skill,
                    attempts: c.attempts,
                    errors: c.errors,
                });
            }
        }
        Ok(())
    }
}

/// A person practising with the tutor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learner {
    id: LearnerId,
    display_name: Option<String>,
    proficiency: Proficiency,
    current_session: Option<SessionId>,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl Learner {
    /// Create a learner on first contact.
    #[must_use]
    pub fn new(id: LearnerId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            display_name: None,
            proficiency: Proficiency::default(),
            current_session: None,
            created_at,
            archived_at: None,
        }
    }

    /// Rehydrate a learner from storage.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError::InvalidCounters` if a skill has more errors than attempts.
    pub fn from_persisted(
        id: LearnerId,
        display_name: Option<String>,
        proficiency: Proficiency,
        current_session: Option<SessionId>,
        created_at: DateTime<Utc>,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Self, LearnerError> {
        proficiency.validate()?;
        Ok(Self {
            id,
            display_name,
            proficiency,
            current_session,
            created_at,
            archived_at,
        })
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> LearnerId {
        self.id
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn proficiency(&self) -> &Proficiency {
        &self.proficiency
    }

    #[must_use]
    pub fn current_session(&self) -> Option<SessionId> {
        self.current_session
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Point the learner at a freshly started session.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError::Archived` for archived learners.
    pub fn begin_session(&mut self, session: SessionId) -> Result<(), LearnerError> {
        if self.is_archived() {
            return Err(LearnerError::Archived(self.id));
        }
        self.current_session = Some(session);
        Ok(())
    }

    /// Clear the session pointer if it still refers to `session`.
    pub fn end_session(&mut self, session: SessionId) {
        if self.current_session == Some(session) {
            self.current_session = None;
        }
    }

    pub fn record_turn(&mut self, tally: &SkillTally) {
        self.proficiency.record(tally);
    }

    pub fn archive(&mut self, at: DateTime<Utc>) {
        if self.archived_at.is_none() {
            self.archived_at = Some(at);
            self.current_session = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn accuracy_is_none_before_attempts() {
        let learner = Learner::new(LearnerId::new(1), fixed_now());
        assert_eq!(learner.proficiency().accuracy(Skill::Tone), None);
    }

    #[test]
    fn record_turn_updates_rates() {
        let mut learner = Learner::new(LearnerId::new(1), fixed_now());
        learner.record_turn(&SkillTally {
            tokens: 4,
            tone_errors: 1,
            consonant_errors: 0,
            lexical_errors: 6,
        });
        let p = learner.proficiency();
        assert_eq!(p.accuracy(Skill::Tone), Some(0.75));
        assert_eq!(p.accuracy(Skill::Consonant), Some(1.0));
        // errors are clamped to the number of target tokens
        assert_eq!(p.accuracy(Skill::Vocabulary), Some(0.0));
    }

    #[test]
    fn archived_learner_cannot_start_sessions() {
        let mut learner = Learner::new(LearnerId::new(1), fixed_now());
        let session = SessionId::generate();
        learner.begin_session(session).unwrap();
        learner.archive(fixed_now());
        assert_eq!(learner.current_session(), None);
        assert!(matches!(
            learner.begin_session(session),
            Err(LearnerError::Archived(_))
        ));
    }

    #[test]
    fn end_session_ignores_stale_ids() {
        let mut learner = Learner::new(LearnerId::new(1), fixed_now());
        let current = SessionId::generate();
        learner.begin_session(current).unwrap();
        learner.end_session(SessionId::generate());
        assert_eq!(learner.current_session(), Some(current));
        learner.end_session(current);
        assert_eq!(learner.current_session(), None);
    }

    #[test]
    fn persisted_counters_are_validated() {
        let mut proficiency = Proficiency::default();
        proficiency.tone = SkillCounter {
            attempts: 1,
            errors: 2,
        };
        let err = Learner::from_persisted(
            LearnerId::new(1),
            None,
            proficiency,
            None,
            fixed_now(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LearnerError::InvalidCounters { skill: Skill::Tone, .. }));
    }
}
