//! Shared error types for the services crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use tutor_core::correction::CorrectionConfigError;
use tutor_core::model::{CardError, EndReason, LearnerError, LearnerId, SessionId, SessionRecordError};
use tutor_core::progression::ProgressionConfigError;
use tutor_core::scheduler::SchedulerError;

/// Errors emitted by `ReviewService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReviewServiceError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures inside a single turn. Never shown to the learner as-is; the
/// controller turns them into a [`TurnFailure`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TurnError {
    #[error("no card to practise in the current stage")]
    NoCard,
    #[error("gave up after {attempts} conflicting writes")]
    ConflictRetriesExhausted { attempts: u32 },
    #[error(transparent)]
    Review(#[from] ReviewServiceError),
    #[error(transparent)]
    Learner(#[from] LearnerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<SchedulerError> for TurnError {
    fn from(e: SchedulerError) -> Self {
        TurnError::Review(ReviewServiceError::Scheduler(e))
    }
}

impl TurnError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            TurnError::Storage(e) | TurnError::Review(ReviewServiceError::Storage(e)) => {
                e.is_conflict()
            }
            _ => false,
        }
    }
}

/// Errors emitted by the session controller outside of a turn's own failure
/// path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session {id} already ended ({reason})")]
    Ended { id: SessionId, reason: EndReason },
    #[error("session {0} is already processing a turn")]
    Busy(SessionId),
    #[error("session {session} does not belong to learner {learner}")]
    LearnerMismatch {
        session: SessionId,
        learner: LearnerId,
    },
    #[error("the content catalog has no cards to practise")]
    EmptyCatalog,
    #[error(transparent)]
    Learner(#[from] LearnerError),
    #[error(transparent)]
    Record(#[from] SessionRecordError),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while loading or validating `TutorConfig`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {raw}")]
    Env { key: &'static str, raw: String },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Progression(#[from] ProgressionConfigError),
    #[error(transparent)]
    Correction(#[from] CorrectionConfigError),
    #[error("invalid turn configuration: {0}")]
    Turn(&'static str),
}

/// Errors emitted while importing the seed catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping the tutor service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BootstrapError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

//
// ─── LEARNER-FACING FAILURE ────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Progress could not be saved.
    Storage,
    /// Another write to the same card won repeatedly.
    Conflict,
    /// The review schedule could not be computed.
    Scheduling,
    /// Nothing left to practise.
    Content,
}

/// The apologetic `turn_failed` reply. Session state is unchanged when this
/// is returned, so the learner can simply try again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&TurnError> for TurnFailure {
    fn from(e: &TurnError) -> Self {
        let kind = match e {
            TurnError::NoCard => FailureKind::Content,
            TurnError::ConflictRetriesExhausted { .. } => FailureKind::Conflict,
            TurnError::Review(ReviewServiceError::Scheduler(_)) => FailureKind::Scheduling,
            _ => FailureKind::Storage,
        };
        let message = match kind {
            FailureKind::Storage | FailureKind::Conflict => {
                "Sorry, I couldn't save that attempt. Please say it once more."
            }
            FailureKind::Scheduling => {
                "Sorry, something went wrong while planning your next review. Please try again."
            }
            FailureKind::Content => "Sorry, there is nothing to practise right now.",
        };
        Self {
            kind,
            message: message.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_detected_through_wrappers() {
        let direct = TurnError::Storage(StorageError::Conflict("stale".into()));
        let wrapped = TurnError::Review(ReviewServiceError::Storage(StorageError::Conflict(
            "stale".into(),
        )));
        assert!(direct.is_conflict());
        assert!(wrapped.is_conflict());
        assert!(!TurnError::NoCard.is_conflict());
    }

    #[test]
    fn failures_are_apologetic() {
        let failure = TurnFailure::from(&TurnError::ConflictRetriesExhausted { attempts: 4 });
        assert_eq!(failure.kind, FailureKind::Conflict);
        assert!(failure.message.starts_with("Sorry"));

        let failure = TurnFailure::from(&TurnError::from(SchedulerError::InvalidQuality {
            provided: 2.0,
        }));
        assert_eq!(failure.kind, FailureKind::Scheduling);
    }
}
