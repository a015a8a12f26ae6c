use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CardId, LearnerId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReviewStateError {
    #[error("due_at ({due_at}) is before last_reviewed_at ({last_reviewed_at})")]
    DueBeforeLastReview {
        due_at: DateTime<Utc>,
        last_reviewed_at: DateTime<Utc>,
    },

    #[error("interval must be at least 1 day")]
    ZeroInterval,

    #[error("ease must be finite and positive, got {0}")]
    InvalidEase(f64),
}

//
// ─── KEY ──────────────────────────────────────────────────────────────────────
//

/// Identifies the single review state of a learner/card pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewKey {
    pub learner_id: LearnerId,
    pub card_id: CardId,
}

impl ReviewKey {
    #[must_use]
    pub fn new(learner_id: LearnerId, card_id: CardId) -> Self {
        Self {
            learner_id,
            card_id,
        }
    }
}

//
// ─── GRADE ────────────────────────────────────────────────────────────────────
//

/// Coarse outcome of an attempt, derived from its quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewGrade {
    /// Perfect attempt.
    Correct,
    /// At or above the success threshold but not perfect.
    Partial,
    /// Below the success threshold; counts as a lapse.
    Incorrect,
}

impl ReviewGrade {
    #[must_use]
    pub fn from_quality(quality: f64, success_threshold: f64) -> Self {
        if quality >= 1.0 {
            ReviewGrade::Correct
        } else if quality >= success_threshold {
            ReviewGrade::Partial
        } else {
            ReviewGrade::Incorrect
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, ReviewGrade::Incorrect)
    }
}

//
// ─── STATE ────────────────────────────────────────────────────────────────────
//

/// Spaced-repetition state for one learner/card pair.
///
/// `version` is the optimistic-concurrency counter owned by storage: a state
/// that has never been written carries `0`, and every successful write stores
/// the carried version plus one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    key: ReviewKey,
    ease: f64,
    interval_days: u32,
    due_at: DateTime<Utc>,
    last_reviewed_at: DateTime<Utc>,
    repetitions: u32,
    lapses: u32,
    version: u64,
}

impl ReviewState {
    /// Build a state, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns `ReviewStateError` if `due_at < last_reviewed_at`, the interval
    /// is zero, or the ease is not a positive finite number.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        key: ReviewKey,
        ease: f64,
        interval_days: u32,
        due_at: DateTime<Utc>,
        last_reviewed_at: DateTime<Utc>,
        repetitions: u32,
        lapses: u32,
        version: u64,
    ) -> Result<Self, ReviewStateError> {
        if due_at < last_reviewed_at {
            return Err(ReviewStateError::DueBeforeLastReview {
                due_at,
                last_reviewed_at,
            });
        }
        if interval_days == 0 {
            return Err(ReviewStateError::ZeroInterval);
        }
        if !ease.is_finite() || ease <= 0.0 {
            return Err(ReviewStateError::InvalidEase(ease));
        }
        Ok(Self {
            key,
            ease,
            interval_days,
            due_at,
            last_reviewed_at,
            repetitions,
            lapses,
            version,
        })
    }

    #[must_use]
    pub fn key(&self) -> ReviewKey {
        self.key
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.key.learner_id
    }

    #[must_use]
    pub fn card_id(&self) -> CardId {
        self.key.card_id
    }

    #[must_use]
    pub fn ease(&self) -> f64 {
        self.ease
    }

    #[must_use]
    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }

    #[must_use]
    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    #[must_use]
    pub fn last_reviewed_at(&self) -> DateTime<Utc> {
        self.last_reviewed_at
    }

    #[must_use]
    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    #[must_use]
    pub fn lapses(&self) -> u32 {
        self.lapses
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.due_at <= as_of
    }

    /// Copy of this state carrying the version storage assigned on write.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn key() -> ReviewKey {
        ReviewKey::new(LearnerId::new(1), CardId::new(2))
    }

    #[test]
    fn grade_from_quality() {
        assert_eq!(ReviewGrade::from_quality(1.0, 0.6), ReviewGrade::Correct);
        assert_eq!(ReviewGrade::from_quality(0.6, 0.6), ReviewGrade::Partial);
        assert_eq!(ReviewGrade::from_quality(0.59, 0.6), ReviewGrade::Incorrect);
        assert!(!ReviewGrade::Incorrect.is_success());
    }

    #[test]
    fn due_before_last_review_is_rejected() {
        let now = fixed_now();
        let err = ReviewState::from_persisted(key(), 2.5, 1, now - Duration::days(1), now, 1, 0, 1)
            .unwrap_err();
        assert!(matches!(err, ReviewStateError::DueBeforeLastReview { .. }));
    }

    #[test]
    fn zero_interval_and_bad_ease_are_rejected() {
        let now = fixed_now();
        assert_eq!(
            ReviewState::from_persisted(key(), 2.5, 0, now, now, 1, 0, 1).unwrap_err(),
            ReviewStateError::ZeroInterval
        );
        assert!(matches!(
            ReviewState::from_persisted(key(), f64::NAN, 1, now, now, 1, 0, 1).unwrap_err(),
            ReviewStateError::InvalidEase(_)
        ));
    }

    #[test]
    fn due_check_is_inclusive() {
        let now = fixed_now();
        let state =
            ReviewState::from_persisted(key(), 2.5, 1, now + Duration::days(1), now, 1, 0, 1)
                .unwrap();
        assert!(!state.is_due(now));
        assert!(state.is_due(state.due_at()));
    }
}
