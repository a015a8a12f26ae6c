use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storage::repository::{
    CardRepository, LearnerRepository, SessionRepository, Storage, StorageError, TurnCommit,
    TurnPersistence, TurnReceipt,
};
use tutor_core::correction::{CorrectionEngine, Diagnosis, TemplateCatalog};
use tutor_core::model::{
    Card, CardId, EndReason, Learner, LearnerId, LearnerError, LessonStage, ReviewKey, SessionId,
    SessionRecord, Utterance,
};
use tutor_core::progression::{ProgressionConfig, SessionState, StageChange};
use tutor_core::scheduler::Scheduler;
use tutor_core::text::LaoTextProcessor;

use super::registry::{Checkout, CheckoutError, SessionRegistry};
use crate::config::{TurnConfig, TutorConfig};
use crate::error::{BootstrapError, ConfigError, SessionError, TurnError, TurnFailure};
use crate::feedback::{self, Prompt, RenderInstruction};
use crate::review_service::ReviewService;

/// Outcome of one learner turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnReply {
    Feedback(RenderInstruction),
    #[serde(rename = "turn_failed")]
    Failed(TurnFailure),
}

#[derive(Debug, Clone, Copy)]
enum Attempt<'a> {
    Spoken(&'a str),
    TimedOut,
}

impl Attempt<'_> {
    fn transcript(&self) -> &str {
        match self {
            Attempt::Spoken(t) => t,
            Attempt::TimedOut => "",
        }
    }
}

/// What a turn made durable.
struct ScoredTurn {
    card: Card,
    diagnosis: Diagnosis,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Session controller: drives the lesson state machine over the store, the
/// correction engine and the scheduler.
///
/// Turns of different sessions run in parallel; a session handles one turn at
/// a time.
#[derive(Clone)]
pub struct TutorService {
    storage: Storage,
    engine: CorrectionEngine,
    reviews: ReviewService,
    progression: ProgressionConfig,
    turn: TurnConfig,
    registry: Arc<SessionRegistry>,
}

impl TutorService {
    /// Build a controller from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a section of `config` does not validate.
    pub fn new(storage: Storage, config: &TutorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = CorrectionEngine::new(
            Arc::new(LaoTextProcessor::new()),
            Arc::new(TemplateCatalog::default()),
            config.correction.clone(),
        )?;
        let scheduler = Scheduler::with_config(config.scheduler.clone())?;

        Ok(Self {
            storage,
            engine,
            reviews: ReviewService::with_scheduler(scheduler),
            progression: config.progression.clone(),
            turn: config.turn.clone(),
            registry: Arc::new(SessionRegistry::default()),
        })
    }

    /// Connect to `SQLite`, run migrations and build the controller.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError` if storage or configuration fail.
    pub async fn sqlite(config: &TutorConfig) -> Result<Self, BootstrapError> {
        let storage = Storage::sqlite(&config.database_url).await?;
        Ok(Self::new(storage, config)?)
    }

    /// Swap the correction engine (custom segmenter or explanation catalog).
    #[must_use]
    pub fn with_engine(mut self, engine: CorrectionEngine) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Copy of a live session's state, `None` if it is unknown or mid-turn.
    #[must_use]
    pub fn session_state(&self, session_id: SessionId) -> Option<SessionState> {
        self.registry.snapshot(session_id)
    }

    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.registry.len()
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Open a session, creating the learner on first contact.
    ///
    /// A session the learner still has open is closed as superseded. The new
    /// session resumes at the stage the previous one ended in.
    ///
    /// # Errors
    ///
    /// - `SessionError::EmptyCatalog` if there is nothing to practise
    /// - `SessionError::Busy` if the superseded session is mid-turn
    /// - `SessionError::Learner` for archived learners
    /// - `SessionError::Storage` on store failures
    pub async fn start_session(
        &self,
        learner_id: LearnerId,
        now: DateTime<Utc>,
    ) -> Result<SessionId, SessionError> {
        let mut learner = match self.storage.learners.get_learner(learner_id).await {
            Ok(learner) => learner,
            Err(StorageError::NotFound { .. }) => {
                tracing::info!(%learner_id, "first contact, creating learner");
                Learner::new(learner_id, now)
            }
            Err(e) => return Err(e.into()),
        };
        if learner.is_archived() {
            return Err(LearnerError::Archived(learner_id).into());
        }

        self.supersede_open_sessions(&mut learner, now).await?;

        let stage = self.resume_stage(learner_id).await?;
        let id = SessionId::generate();
        let mut state = SessionState::new(id, learner_id, stage, self.progression.clone(), now);
        let mut changes = Vec::new();
        match self.prepare(&mut state, now, &mut changes).await {
            Ok(_) => {}
            Err(TurnError::NoCard) if stage != LessonStage::Onboarding => {
                tracing::warn!(%learner_id, %stage, "resume stage exhausted, restarting curriculum");
                state.reset_to(LessonStage::Onboarding);
                self.prepare(&mut state, now, &mut changes)
                    .await
                    .map_err(|e| match e {
                        TurnError::NoCard => SessionError::EmptyCatalog,
                        other => other.into(),
                    })?;
            }
            Err(TurnError::NoCard) => return Err(SessionError::EmptyCatalog),
            Err(e) => return Err(e.into()),
        }
        log_changes(id, &changes);

        learner.begin_session(id)?;
        self.storage.learners.upsert_learner(&learner).await?;
        tracing::info!(session_id = %id, %learner_id, stage = %state.stage(), "session started");
        self.registry.insert(state);
        Ok(id)
    }

    /// Close a session at the learner's request.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is unknown, ended, busy, or the
    /// record cannot be stored.
    pub async fn close_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, SessionError> {
        self.finish(session_id, now, EndReason::Closed).await
    }

    /// Close a session after an external idle timeout.
    ///
    /// # Errors
    ///
    /// Same as [`TutorService::close_session`].
    pub async fn expire_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, SessionError> {
        self.finish(session_id, now, EndReason::IdleTimeout).await
    }

    /// The card the learner should attempt next, `None` if nothing is left.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is unavailable or the store fails.
    pub async fn current_card(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Prompt>, SessionError> {
        let (checkout, mut state) = self.checkout(session_id).await?;
        let mut changes = Vec::new();
        let due = match self.prepare(&mut state, now, &mut changes).await {
            Ok(due) => due,
            Err(TurnError::NoCard) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let card = match state.target_card(&due) {
            Some(id) => Some(self.storage.cards.get_card(id).await?),
            None => None,
        };
        log_changes(session_id, &changes);
        let prompt = card.map(|c| Prompt::for_card(&c, state.stage()));
        checkout.commit(state);
        Ok(prompt)
    }

    //
    // ─── TURNS ─────────────────────────────────────────────────────────────────
    //

    /// Process one transcribed attempt.
    ///
    /// Store and scheduler failures do not surface as `Err`: they produce a
    /// `TurnReply::Failed` and leave the session as it was.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotFound` / `SessionError::Ended` for unknown or closed sessions
    /// - `SessionError::Busy` while another turn of the session is running
    /// - `SessionError::LearnerMismatch` if the session belongs to someone else
    pub async fn process_turn(
        &self,
        learner_id: LearnerId,
        session_id: SessionId,
        transcript: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnReply, SessionError> {
        self.run_turn(learner_id, session_id, Attempt::Spoken(transcript), now)
            .await
    }

    /// Process an attempt lost to an ASR or TTS timeout.
    ///
    /// The attempt is logged but neither scheduled nor counted in the window.
    ///
    /// # Errors
    ///
    /// Same as [`TutorService::process_turn`].
    pub async fn process_timeout(
        &self,
        learner_id: LearnerId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<TurnReply, SessionError> {
        self.run_turn(learner_id, session_id, Attempt::TimedOut, now)
            .await
    }

    async fn run_turn(
        &self,
        learner_id: LearnerId,
        session_id: SessionId,
        attempt: Attempt<'_>,
        now: DateTime<Utc>,
    ) -> Result<TurnReply, SessionError> {
        let (mut checkout, mut state) = self.checkout(session_id).await?;
        if state.learner_id() != learner_id {
            return Err(SessionError::LearnerMismatch {
                session: session_id,
                learner: learner_id,
            });
        }

        let mut changes = Vec::new();
        let scored = match self.score_turn(&mut state, attempt, now, &mut changes).await {
            Ok(scored) => scored,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "turn failed");
                return Ok(TurnReply::Failed(TurnFailure::from(&e)));
            }
        };
        // The turn is durable from here on.
        checkout.advance(state.clone());

        let next_card = self.peek_next(&mut state, now, &mut changes).await;
        log_changes(session_id, &changes);
        tracing::info!(
            %session_id,
            card_id = %scored.card.id(),
            score = scored.diagnosis.score,
            passed = scored.diagnosis.passed,
            stage = %state.stage(),
            "turn processed"
        );

        let instruction = feedback::render(&scored.diagnosis, &scored.card, next_card.as_ref(), &state);
        checkout.commit(state);
        Ok(TurnReply::Feedback(instruction))
    }

    async fn score_turn(
        &self,
        state: &mut SessionState,
        attempt: Attempt<'_>,
        now: DateTime<Utc>,
        changes: &mut Vec<StageChange>,
    ) -> Result<ScoredTurn, TurnError> {
        let due = self.prepare(state, now, changes).await?;
        let card_id = state.target_card(&due).ok_or(TurnError::NoCard)?;
        let card = self.storage.cards.get_card(card_id).await?;

        let diagnosis = match attempt {
            Attempt::Spoken(transcript) => self.engine.diagnose(transcript, card.text()),
            Attempt::TimedOut => self.engine.degraded(card.text()),
        };
        let utterance = Utterance::from_diagnosis(
            state.learner_id(),
            card_id,
            state.id(),
            attempt.transcript(),
            &diagnosis,
            now,
        );

        if diagnosis.is_degraded() {
            let learner = self.storage.learners.get_learner(state.learner_id()).await?;
            self.storage
                .turns
                .commit_turn(&TurnCommit {
                    review_state: None,
                    utterance,
                    learner,
                })
                .await?;
            state.record_unscored_turn();
        } else {
            self.commit_scored(state.learner_id(), card_id, &diagnosis, &utterance, now)
                .await?;
            // The reviewed card is at least a day out now.
            let remaining_due = due.iter().filter(|id| **id != card_id).count();
            if let Some(change) =
                state.record_turn(card_id, diagnosis.score, diagnosis.passed, remaining_due)
            {
                changes.push(change);
            }
        }

        Ok(ScoredTurn { card, diagnosis })
    }

    /// Schedule and commit, re-reading and retrying on version conflicts.
    async fn commit_scored(
        &self,
        learner_id: LearnerId,
        card_id: CardId,
        diagnosis: &Diagnosis,
        utterance: &Utterance,
        now: DateTime<Utc>,
    ) -> Result<TurnReceipt, TurnError> {
        let key = ReviewKey::new(learner_id, card_id);
        let attempts = self.turn.max_conflict_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let planned = self
                .reviews
                .plan(self.storage.review_states.as_ref(), key, diagnosis.score, now)
                .await?;
            let mut learner = self.storage.learners.get_learner(learner_id).await?;
            learner.record_turn(&diagnosis.skill_tally());

            let commit = TurnCommit {
                review_state: Some(planned.decision.state),
                utterance: utterance.clone(),
                learner,
            };
            match self.storage.turns.commit_turn(&commit).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_conflict() => {
                    tracing::warn!(%learner_id, %card_id, attempt, "review state moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TurnError::ConflictRetriesExhausted { attempts })
    }

    //
    // ─── STAGE BOOKKEEPING ─────────────────────────────────────────────────────
    //

    /// Bring `state` to a point where it has a card to prompt.
    ///
    /// Enters or leaves review against the due queue, loads the stage's slice
    /// of the catalog and skips stages whose slice is empty. Returns the due
    /// queue it reconciled against.
    async fn prepare(
        &self,
        state: &mut SessionState,
        now: DateTime<Utc>,
        changes: &mut Vec<StageChange>,
    ) -> Result<Vec<CardId>, TurnError> {
        let due = self
            .reviews
            .due_queue(
                self.storage.review_states.as_ref(),
                state.learner_id(),
                now,
                self.turn.due_limit,
            )
            .await?;

        loop {
            changes.extend(state.begin_turn(&due));
            if !state.needs_cards() {
                break;
            }
            let cards = self.storage.cards.cards_for_stage(state.stage()).await?;
            if !cards.is_empty() {
                state.load_queue(cards.iter().map(Card::id));
                break;
            }
            match state.skip_stage() {
                Some(change) => changes.push(change),
                None => return Err(TurnError::NoCard),
            }
        }
        Ok(due)
    }

    /// Best-effort look-ahead at the next prompt once a turn is durable.
    async fn peek_next(
        &self,
        state: &mut SessionState,
        now: DateTime<Utc>,
        changes: &mut Vec<StageChange>,
    ) -> Option<Card> {
        let mut preview = state.clone();
        let mut preview_changes = Vec::new();
        let next = match self.prepare(&mut preview, now, &mut preview_changes).await {
            Ok(due) => preview.target_card(&due)?,
            Err(e) => {
                tracing::warn!(session_id = %state.id(), error = %e, "could not look ahead");
                return None;
            }
        };
        match self.storage.cards.get_card(next).await {
            Ok(card) => {
                *state = preview;
                changes.extend(preview_changes);
                Some(card)
            }
            Err(e) => {
                tracing::warn!(session_id = %state.id(), card_id = %next, error = %e, "could not load next card");
                None
            }
        }
    }

    async fn resume_stage(&self, learner_id: LearnerId) -> Result<LessonStage, SessionError> {
        let history = self.storage.sessions.sessions_for_learner(learner_id).await?;
        Ok(history
            .last()
            .map(SessionRecord::final_stage)
            .filter(|stage| *stage != LessonStage::Ended)
            .unwrap_or(LessonStage::Onboarding))
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    async fn checkout(
        &self,
        session_id: SessionId,
    ) -> Result<(Checkout, SessionState), SessionError> {
        match self.registry.checkout(session_id) {
            Ok(held) => Ok(held),
            Err(CheckoutError::Busy) => Err(SessionError::Busy(session_id)),
            Err(CheckoutError::Missing) => match self.storage.sessions.get_session(session_id).await {
                Ok(record) => Err(SessionError::Ended {
                    id: session_id,
                    reason: record.end_reason(),
                }),
                Err(StorageError::NotFound { .. }) => Err(SessionError::NotFound(session_id)),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn finish(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<SessionRecord, SessionError> {
        let (checkout, state) = self.checkout(session_id).await?;
        let record = state.close(now, reason)?;
        self.storage.sessions.close_session(&record).await?;
        checkout.remove();
        tracing::info!(
            %session_id,
            %reason,
            turns = record.turns(),
            mean_accuracy = record.mean_accuracy(),
            final_stage = %record.final_stage(),
            "session ended"
        );
        Ok(record)
    }

    async fn supersede_open_sessions(
        &self,
        learner: &mut Learner,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut open = self.registry.sessions_of(learner.id());
        if let Some(pointer) = learner.current_session()
            && !open.contains(&pointer)
        {
            open.push(pointer);
        }

        for session_id in open {
            match self.finish(session_id, now, EndReason::Superseded).await {
                Ok(_) | Err(SessionError::NotFound(_) | SessionError::Ended { .. }) => {}
                Err(e) => return Err(e),
            }
            learner.end_session(session_id);
        }
        Ok(())
    }
}

fn log_changes(session_id: SessionId, changes: &[StageChange]) {
    for change in changes {
        tracing::info!(%session_id, ?change, stage = %change.target(), "stage changed");
    }
}
