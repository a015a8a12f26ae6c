use std::collections::VecDeque;
use std::mem;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    CardId, EndReason, LearnerId, LessonStage, SessionId, SessionRecord, SessionRecordError,
};

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid progression configuration: {0}")]
pub struct ProgressionConfigError(pub &'static str);

/// Promotion/demotion thresholds over a rolling window of turn scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub window: usize,
    pub promote_threshold: f64,
    pub demote_threshold: f64,
    /// Scored turns required in a stage before it can change.
    pub min_turns_in_stage: u32,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            window: 5,
            promote_threshold: 0.8,
            demote_threshold: 0.4,
            min_turns_in_stage: 3,
        }
    }
}

impl ProgressionConfig {
    /// # Errors
    ///
    /// Returns `ProgressionConfigError` for an empty window or thresholds that
    /// are out of range or inverted.
    pub fn validate(&self) -> Result<(), ProgressionConfigError> {
        if self.window == 0 {
            return Err(ProgressionConfigError("window must be >= 1"));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.promote_threshold) || !unit.contains(&self.demote_threshold) {
            return Err(ProgressionConfigError("thresholds must be in [0, 1]"));
        }
        if self.demote_threshold >= self.promote_threshold {
            return Err(ProgressionConfigError(
                "demote_threshold must be below promote_threshold",
            ));
        }
        Ok(())
    }
}

//
// ─── ROLLING WINDOW ────────────────────────────────────────────────────────────
//

/// Last `capacity` turn scores.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingAccuracy {
    capacity: usize,
    scores: VecDeque<f64>,
}

impl RollingAccuracy {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            scores: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    #[must_use]
    pub fn from_scores(capacity: usize, scores: &[f64]) -> Self {
        let mut window = Self::new(capacity);
        for s in scores {
            window.push(*s);
        }
        window
    }

    pub fn push(&mut self, score: f64) {
        if self.scores.len() == self.capacity {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.iter().sum::<f64>() / self.scores.len() as f64)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Promote(LessonStage),
    Demote(LessonStage),
}

/// Decide whether a stage with the given history should change.
///
/// Demotion never lands on `Review`, which is entered from the due queue and
/// not as a fallback.
#[must_use]
pub fn evaluate(
    stage: LessonStage,
    window: &RollingAccuracy,
    turns_in_stage: u32,
    config: &ProgressionConfig,
) -> Transition {
    if turns_in_stage < config.min_turns_in_stage {
        return Transition::Stay;
    }
    let Some(mean) = window.mean() else {
        return Transition::Stay;
    };

    if mean >= config.promote_threshold {
        if let Some(next) = stage.next() {
            return Transition::Promote(next);
        }
    } else if mean < config.demote_threshold {
        let previous = match stage.previous() {
            Some(LessonStage::Review) => LessonStage::Review.previous(),
            other => other,
        };
        if let Some(previous) = previous {
            return Transition::Demote(previous);
        }
    }
    Transition::Stay
}

/// A change of the active stage, reported for logging and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageChange {
    ReviewEntered { suspended: LessonStage },
    ReviewExited { resumed: LessonStage },
    Promoted { from: LessonStage, to: LessonStage },
    Demoted { from: LessonStage, to: LessonStage },
    Skipped { from: LessonStage, to: LessonStage },
}

impl StageChange {
    #[must_use]
    pub fn target(self) -> LessonStage {
        match self {
            StageChange::ReviewEntered { .. } => LessonStage::Review,
            StageChange::ReviewExited { resumed } => resumed,
            StageChange::Promoted { to, .. }
            | StageChange::Demoted { to, .. }
            | StageChange::Skipped { to, .. } => to,
        }
    }
}

//
// ─── SESSION STATE ─────────────────────────────────────────────────────────────
//

/// Progress within one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFrame {
    stage: LessonStage,
    window: RollingAccuracy,
    turns_in_stage: u32,
    queue: VecDeque<CardId>,
}

impl StageFrame {
    fn new(stage: LessonStage, window: usize) -> Self {
        Self {
            stage,
            window: RollingAccuracy::new(window),
            turns_in_stage: 0,
            queue: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn stage(&self) -> LessonStage {
        self.stage
    }

    #[must_use]
    pub fn window(&self) -> &RollingAccuracy {
        &self.window
    }

    #[must_use]
    pub fn turns_in_stage(&self) -> u32 {
        self.turns_in_stage
    }

    #[must_use]
    pub fn queue(&self) -> &VecDeque<CardId> {
        &self.queue
    }
}

/// Live state of a practice session.
///
/// The review interruption is a one-deep stack: entering review suspends the
/// active frame, and leaving review resumes it untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    id: SessionId,
    learner_id: LearnerId,
    active: StageFrame,
    suspended: Option<StageFrame>,
    turns: u32,
    scored_turns: u32,
    score_sum: f64,
    started_at: DateTime<Utc>,
    config: ProgressionConfig,
}

impl SessionState {
    #[must_use]
    pub fn new(
        id: SessionId,
        learner_id: LearnerId,
        stage: LessonStage,
        config: ProgressionConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            learner_id,
            active: StageFrame::new(stage, config.window),
            suspended: None,
            turns: 0,
            scored_turns: 0,
            score_sum: 0.0,
            started_at,
            config,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    /// Stage the learner is practising right now.
    #[must_use]
    pub fn stage(&self) -> LessonStage {
        self.active.stage
    }

    /// Stage the session returns to once a review interruption is over.
    #[must_use]
    pub fn base_stage(&self) -> LessonStage {
        self.suspended
            .as_ref()
            .map_or(self.active.stage, |f| f.stage)
    }

    #[must_use]
    pub fn active_frame(&self) -> &StageFrame {
        &self.active
    }

    #[must_use]
    pub fn suspended_frame(&self) -> Option<&StageFrame> {
        self.suspended.as_ref()
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
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Mean score over all scored turns, `0.0` before the first one.
    #[must_use]
    pub fn mean_accuracy(&self) -> f64 {
        if self.scored_turns == 0 {
            0.0
        } else {
            (self.score_sum / f64::from(self.scored_turns)).clamp(0.0, 1.0)
        }
    }

    /// The active stage draws from the catalog and has run out of cards.
    #[must_use]
    pub fn needs_cards(&self) -> bool {
        self.active.stage.has_curriculum() && self.active.queue.is_empty()
    }

    pub fn load_queue(&mut self, cards: impl IntoIterator<Item = CardId>) {
        self.active.queue.extend(cards);
    }

    /// Move past a stage that has nothing to practise.
    ///
    /// Returns `None` when there is no later stage.
    pub fn skip_stage(&mut self) -> Option<StageChange> {
        let from = self.active.stage;
        let to = from.next()?;
        self.active = StageFrame::new(to, self.config.window);
        Some(StageChange::Skipped { from, to })
    }

    /// Jump to `stage` with a fresh frame, dropping any review interruption.
    pub fn reset_to(&mut self, stage: LessonStage) {
        self.suspended = None;
        self.active = StageFrame::new(stage, self.config.window);
    }

    /// Reconcile the review stack with the learner's due queue before a turn.
    pub fn begin_turn(&mut self, due: &[CardId]) -> Option<StageChange> {
        let in_review = self.active.stage == LessonStage::Review;
        match (due.is_empty(), in_review) {
            (false, false) => {
                let review = StageFrame::new(LessonStage::Review, self.config.window);
                let suspended = mem::replace(&mut self.active, review);
                let change = StageChange::ReviewEntered {
                    suspended: suspended.stage,
                };
                self.suspended = Some(suspended);
                Some(change)
            }
            (true, true) => Some(self.leave_review()),
            _ => None,
        }
    }

    /// Card to prompt next: the most urgent due card in review, else the
    /// front of the stage queue.
    #[must_use]
    pub fn target_card(&self, due: &[CardId]) -> Option<CardId> {
        if self.active.stage == LessonStage::Review {
            due.first().copied()
        } else {
            self.active.queue.front().copied()
        }
    }

    /// Fold a scored turn into the state.
    ///
    /// `remaining_due` is the size of the due queue after the turn committed.
    pub fn record_turn(
        &mut self,
        card: CardId,
        score: f64,
        passed: bool,
        remaining_due: usize,
    ) -> Option<StageChange> {
        self.turns = self.turns.saturating_add(1);
        self.scored_turns = self.scored_turns.saturating_add(1);
        self.score_sum += score;

        if self.active.stage == LessonStage::Review {
            return (remaining_due == 0).then(|| self.leave_review());
        }

        let frame = &mut self.active;
        if passed && frame.queue.front() == Some(&card) {
            frame.queue.rotate_left(1);
        }
        frame.window.push(score);
        frame.turns_in_stage = frame.turns_in_stage.saturating_add(1);

        let from = frame.stage;
        match evaluate(from, &frame.window, frame.turns_in_stage, &self.config) {
            Transition::Stay => None,
            Transition::Promote(to) => {
                self.active = StageFrame::new(to, self.config.window);
                Some(StageChange::Promoted { from, to })
            }
            Transition::Demote(to) => {
                self.active = StageFrame::new(to, self.config.window);
                Some(StageChange::Demoted { from, to })
            }
        }
    }

    /// Count a turn that could not be scored (silence, timeout).
    pub fn record_unscored_turn(&mut self) {
        self.turns = self.turns.saturating_add(1);
    }

    /// Finalize into a closed-session record.
    ///
    /// # Errors
    ///
    /// Returns `SessionRecordError` if `ended_at` precedes the start.
    pub fn close(
        &self,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<SessionRecord, SessionRecordError> {
        SessionRecord::new(
            self.id,
            self.learner_id,
            self.started_at,
            ended_at,
            reason,
            self.turns,
            self.scored_turns,
            self.mean_accuracy(),
            self.base_stage(),
        )
    }

    fn leave_review(&mut self) -> StageChange {
        match self.suspended.take() {
            Some(frame) => {
                let resumed = frame.stage;
                self.active = frame;
                StageChange::ReviewExited { resumed }
            }
            None => {
                // Review reached through promotion: move on once drained.
                let to = LessonStage::Review
                    .next()
                    .unwrap_or(LessonStage::FreeConversation);
                self.active = StageFrame::new(to, self.config.window);
                StageChange::ReviewExited { resumed: to }
            }
        }
    }
}
