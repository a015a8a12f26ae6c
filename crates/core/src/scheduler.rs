use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ReviewGrade, ReviewKey, ReviewState};
use crate::time::add_days;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("quality must be a number in [0, 1], got {provided}")]
    InvalidQuality { provided: f64 },

    #[error("review at {reviewed_at} is earlier than the last review at {last_reviewed_at}")]
    ReviewBeforeLastReview {
        reviewed_at: DateTime<Utc>,
        last_reviewed_at: DateTime<Utc>,
    },

    #[error("previous state belongs to {found:?}, expected {expected:?}")]
    KeyMismatch {
        expected: ReviewKey,
        found: ReviewKey,
    },

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(&'static str),
}

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

/// Tunables of the SM-2 style scheduler.
///
/// The defaults are reasonable placeholders; deployments are expected to tune
/// them through configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum quality counted as a successful recall.
    pub success_threshold: f64,
    pub default_ease: f64,
    pub min_ease: f64,
    /// Ease subtracted on every lapse.
    pub lapse_ease_penalty: f64,
    /// Interval of a first exposure and after a lapse.
    pub initial_interval_days: u32,
    /// Fixed intervals for the first successes, before ease-based growth.
    pub success_ladder_days: Vec<u32>,
    pub max_interval_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            success_threshold: 0.6,
            default_ease: 2.5,
            min_ease: 1.3,
            lapse_ease_penalty: 0.2,
            initial_interval_days: 1,
            success_ladder_days: vec![1, 3],
            max_interval_days: 180,
        }
    }
}

impl SchedulerConfig {
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(SchedulerError::InvalidConfig(
                "success_threshold must be in [0, 1]",
            ));
        }
        if !self.min_ease.is_finite() || self.min_ease <= 0.0 {
            return Err(SchedulerError::InvalidConfig("min_ease must be positive"));
        }
        if !self.default_ease.is_finite() || self.default_ease < self.min_ease {
            return Err(SchedulerError::InvalidConfig(
                "default_ease must be >= min_ease",
            ));
        }
        if !self.lapse_ease_penalty.is_finite() || self.lapse_ease_penalty < 0.0 {
            return Err(SchedulerError::InvalidConfig(
                "lapse_ease_penalty must be >= 0",
            ));
        }
        if self.initial_interval_days == 0 {
            return Err(SchedulerError::InvalidConfig(
                "initial_interval_days must be >= 1",
            ));
        }
        if self.max_interval_days < self.initial_interval_days {
            return Err(SchedulerError::InvalidConfig(
                "max_interval_days must be >= initial_interval_days",
            ));
        }
        if self.success_ladder_days.iter().any(|d| *d == 0)
            || self.success_ladder_days.windows(2).any(|w| w[0] > w[1])
        {
            return Err(SchedulerError::InvalidConfig(
                "success_ladder_days must be positive and non-decreasing",
            ));
        }
        Ok(())
    }
}

//
// ─── DECISION ──────────────────────────────────────────────────────────────────
//

/// Outcome of scheduling one review.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDecision {
    pub state: ReviewState,
    pub grade: ReviewGrade,
    pub lapsed: bool,
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// SM-2 style spaced-repetition scheduler.
///
/// Pure: the same previous state, quality and timestamp always produce the
/// same decision.
///
/// # Examples
///
/// ```
/// # use tutor_core::scheduler::Scheduler;
/// # use tutor_core::model::{CardId, LearnerId, ReviewKey};
/// let scheduler = Scheduler::new();
/// let key = ReviewKey::new(LearnerId::new(1), CardId::new(1));
/// let decision = scheduler.schedule(key, None, 1.0, chrono::Utc::now())?;
/// assert_eq!(decision.state.interval_days(), 1);
/// assert_eq!(decision.state.repetitions(), 1);
/// # Ok::<(), tutor_core::scheduler::SchedulerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `config` does not validate.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Compute the next review state for `key`.
    ///
    /// - `previous` is `None` on first exposure.
    /// - `quality` is the attempt's score in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// - `InvalidQuality` if `quality` is NaN or outside `[0, 1]`
    /// - `ReviewBeforeLastReview` if `now` precedes the previous review
    /// - `KeyMismatch` if `previous` belongs to another learner/card pair
    pub fn schedule(
        &self,
        key: ReviewKey,
        previous: Option<&ReviewState>,
        quality: f64,
        now: DateTime<Utc>,
    ) -> Result<ScheduleDecision, SchedulerError> {
        if !quality.is_finite() || !(0.0..=1.0).contains(&quality) {
            return Err(SchedulerError::InvalidQuality { provided: quality });
        }

        if let Some(prev) = previous {
            if prev.key() != key {
                return Err(SchedulerError::KeyMismatch {
                    expected: key,
                    found: prev.key(),
                });
            }
            if now < prev.last_reviewed_at() {
                return Err(SchedulerError::ReviewBeforeLastReview {
                    reviewed_at: now,
                    last_reviewed_at: prev.last_reviewed_at(),
                });
            }
        }

        let grade = ReviewGrade::from_quality(quality, self.config.success_threshold);
        let version = previous.map_or(0, ReviewState::version);

        let (ease, interval, repetitions, lapses) = match (previous, grade.is_success()) {
            (None, true) => (
                self.config.default_ease,
                self.config.initial_interval_days,
                1,
                0,
            ),
            (None, false) => (
                self.penalized_ease(self.config.default_ease),
                self.config.initial_interval_days,
                0,
                1,
            ),
            (Some(prev), true) => {
                let ease = self.grown_ease(prev.ease(), quality);
                let repetitions = prev.repetitions().saturating_add(1);
                let interval = self.success_interval(prev.interval_days(), repetitions, ease);
                (ease, interval, repetitions, prev.lapses())
            }
            (Some(prev), false) => (
                self.penalized_ease(prev.ease()),
                self.config.initial_interval_days,
                0,
                prev.lapses().saturating_add(1),
            ),
        };

        let state = ReviewState::from_persisted(
            key,
            ease,
            interval,
            add_days(now, interval),
            now,
            repetitions,
            lapses,
            version,
        )
        .map_err(|_| SchedulerError::InvalidConfig("scheduler produced an invalid state"))?;

        Ok(ScheduleDecision {
            state,
            grade,
            lapsed: !grade.is_success(),
        })
    }

    fn grown_ease(&self, ease: f64, quality: f64) -> f64 {
        let miss = 1.0 - quality;
        let adjusted = ease + (0.1 - miss * (0.08 + miss * 0.02));
        adjusted.max(self.config.min_ease)
    }

    fn penalized_ease(&self, ease: f64) -> f64 {
        (ease - self.config.lapse_ease_penalty).max(self.config.min_ease)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn success_interval(&self, previous_interval: u32, repetitions: u32, ease: f64) -> u32 {
        let ladder_step = usize::try_from(repetitions)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.config.success_ladder_days.get(i).copied());

        let candidate = match ladder_step {
            Some(days) => days,
            // `as` saturates for out-of-range floats.
            None => (f64::from(previous_interval) * ease).round() as u32,
        };

        candidate
            .max(previous_interval)
            .min(self.config.max_interval_days)
            .max(1)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
