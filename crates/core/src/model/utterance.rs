use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correction::{Diagnosis, Mismatch};
use crate::model::{CardId, LearnerId, SessionId};

/// One learner attempt, as written to the append-only utterance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Assigned by storage on append.
    pub id: Option<i64>,
    pub learner_id: LearnerId,
    pub card_id: CardId,
    pub session_id: SessionId,
    pub transcript: String,
    pub mismatches: Vec<Mismatch>,
    pub score: f64,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl Utterance {
    /// Capture an attempt and its diagnosis.
    #[must_use]
    pub fn from_diagnosis(
        learner_id: LearnerId,
        card_id: CardId,
        session_id: SessionId,
        transcript: impl Into<String>,
        diagnosis: &Diagnosis,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            learner_id,
            card_id,
            session_id,
            transcript: transcript.into(),
            mismatches: diagnosis.mismatches.clone(),
            score: diagnosis.score,
            passed: diagnosis.passed,
            recorded_at,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}
