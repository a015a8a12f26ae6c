use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::{LearnerId, LessonStage, SessionId};

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionRecordError {
    #[error("ended_at is before started_at")]
    InvalidTimeRange,

    #[error("scored turns ({scored}) exceed total turns ({turns})")]
    TurnMismatch { turns: u32, scored: u32 },

    #[error("mean accuracy must be in [0, 1], got {0}")]
    InvalidAccuracy(f64),

    #[error("unknown end reason: {0}")]
    UnknownEndReason(String),
}

/// Why a session reached the terminal `ended` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The learner or transport closed the session explicitly.
    Closed,
    /// An external idle-timeout event fired.
    IdleTimeout,
    /// The learner started a new session while this one was still open.
    Superseded,
}

impl EndReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Closed => "closed",
            EndReason::IdleTimeout => "idle_timeout",
            EndReason::Superseded => "superseded",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndReason {
    type Err = SessionRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(EndReason::Closed),
            "idle_timeout" => Ok(EndReason::IdleTimeout),
            "superseded" => Ok(EndReason::Superseded),
            other => Err(SessionRecordError::UnknownEndReason(other.to_owned())),
        }
    }
}

/// Closed session, persisted once at session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    id: SessionId,
    learner_id: LearnerId,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    end_reason: EndReason,
    turns: u32,
    scored_turns: u32,
    mean_accuracy: f64,
    final_stage: LessonStage,
}

impl SessionRecord {
    /// Build a closed-session record, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns `SessionRecordError` if the time range is inverted, the turn
    /// counts disagree, or the accuracy is outside `[0, 1]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        learner_id: LearnerId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        end_reason: EndReason,
        turns: u32,
        scored_turns: u32,
        mean_accuracy: f64,
        final_stage: LessonStage,
    ) -> Result<Self, SessionRecordError> {
        if ended_at < started_at {
            return Err(SessionRecordError::InvalidTimeRange);
        }
        if scored_turns > turns {
            return Err(SessionRecordError::TurnMismatch {
                turns,
                scored: scored_turns,
            });
        }
        if !(0.0..=1.0).contains(&mean_accuracy) {
            return Err(SessionRecordError::InvalidAccuracy(mean_accuracy));
        }
        Ok(Self {
            id,
            learner_id,
            started_at,
            ended_at,
            end_reason,
            turns,
            scored_turns,
            mean_accuracy,
            final_stage,
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    #[must_use]
    pub fn end_reason(&self) -> EndReason {
        self.end_reason
    }

    #[must_use]
    pub fn turns(&self) -> u32 {
        self.turns
    }

    #[must_use]
    pub fn scored_turns(&self) -> u32 {
        self.scored_turns
    }

    #[must_use]
    pub fn mean_accuracy(&self) -> f64 {
        self.mean_accuracy
    }

    /// Stage the learner was in when the session ended (never `Review`-pushed
    /// state; the suspended stage is reported instead).
    #[must_use]
    pub fn final_stage(&self) -> LessonStage {
        self.final_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn inverted_range_is_rejected() {
        let now = fixed_now();
        let err = SessionRecord::new(
            SessionId::generate(),
            LearnerId::new(1),
            now,
            now - Duration::minutes(1),
            EndReason::Closed,
            0,
            0,
            0.0,
            LessonStage::Onboarding,
        )
        .unwrap_err();
        assert_eq!(err, SessionRecordError::InvalidTimeRange);
    }

    #[test]
    fn scored_turns_cannot_exceed_turns() {
        let now = fixed_now();
        let err = SessionRecord::new(
            SessionId::generate(),
            LearnerId::new(1),
            now,
            now,
            EndReason::IdleTimeout,
            2,
            3,
            0.5,
            LessonStage::Tones,
        )
        .unwrap_err();
        assert_eq!(err, SessionRecordError::TurnMismatch { turns: 2, scored: 3 });
    }

    #[test]
    fn end_reason_round_trips() {
        for reason in [EndReason::Closed, EndReason::IdleTimeout, EndReason::Superseded] {
            assert_eq!(reason.as_str().parse::<EndReason>().unwrap(), reason);
        }
    }
}
