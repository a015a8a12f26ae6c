use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tutor_core::model::{
    Card, CardId, Learner, LearnerId, LessonStage, ReviewKey, ReviewState, SessionId,
    SessionRecord, Utterance,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn stale_version(key: ReviewKey, expected: u64, provided: u64) -> Self {
        StorageError::Conflict(format!(
            "review state {}/{} is at version {expected}, write carried {provided}",
            key.learner_id, key.card_id
        ))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait LearnerRepository: Send + Sync {
    /// Fetch a learner by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_learner(&self, id: LearnerId) -> Result<Learner, StorageError>;

    /// Persist or update a learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the learner cannot be stored.
    async fn upsert_learner(&self, learner: &Learner) -> Result<(), StorageError>;
}

/// Content catalog. Read-only to the session controller.
#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Insert a card or replace its curated fields.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the card cannot be stored.
    async fn upsert_card(&self, card: &Card) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_card(&self, id: CardId) -> Result<Card, StorageError>;

    /// Cards of one curriculum slice, easiest first, then by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn cards_for_stage(&self, stage: LessonStage) -> Result<Vec<Card>, StorageError>;
}

#[async_trait]
pub trait ReviewStateRepository: Send + Sync {
    /// Review state of a pair; `None` before the first exposure.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the learner or card is unknown.
    async fn get_review_state(&self, key: ReviewKey) -> Result<Option<ReviewState>, StorageError>;

    /// Version-checked write. The state must carry the stored version (0 for
    /// a first write); the stored copy, carrying the next version, is returned.
    ///
    /// # Errors
    ///
    /// - `StorageError::Conflict` if the carried version is stale
    /// - `StorageError::NotFound` if the learner or card is unknown
    async fn put_review_state(&self, state: &ReviewState) -> Result<ReviewState, StorageError>;

    /// States due at or before `as_of`, ordered by due time, then lapses
    /// (most first), then card ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the states cannot be read.
    async fn due_cards(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReviewState>, StorageError>;
}

#[async_trait]
pub trait UtteranceRepository: Send + Sync {
    /// Append to the utterance log and return the assigned ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the learner or card is unknown.
    async fn append_utterance(&self, utterance: &Utterance) -> Result<i64, StorageError>;

    /// Most recent utterances of a learner, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the log cannot be read.
    async fn utterances_for_learner(
        &self,
        learner_id: LearnerId,
        limit: u32,
    ) -> Result<Vec<Utterance>, StorageError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a closed session and clear the learner's pointer to it.
    ///
    /// # Errors
    ///
    /// - `StorageError::Conflict` if the session was already closed
    /// - `StorageError::NotFound` if the learner is unknown
    async fn close_session(&self, record: &SessionRecord) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_session(&self, id: SessionId) -> Result<SessionRecord, StorageError>;

    /// Closed sessions of a learner, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the sessions cannot be read.
    async fn sessions_for_learner(
        &self,
        learner_id: LearnerId,
    ) -> Result<Vec<SessionRecord>, StorageError>;
}

/// Everything a scored (or degraded) turn writes.
#[derive(Debug, Clone)]
pub struct TurnCommit {
    /// Absent for degraded turns, which are logged but not scheduled.
    pub review_state: Option<ReviewState>,
    pub utterance: Utterance,
    pub learner: Learner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReceipt {
    pub review_state: Option<ReviewState>,
    pub utterance_id: i64,
}

/// Atomic turn commit.
#[async_trait]
pub trait TurnPersistence: Send + Sync {
    /// Upsert the learner, write the review state (version-checked) and append
    /// the utterance in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a stale review state, in which case
    /// nothing was written, or other storage errors.
    async fn commit_turn(&self, commit: &TurnCommit) -> Result<TurnReceipt, StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct Tables {
    learners: HashMap<LearnerId, Learner>,
    cards: BTreeMap<CardId, Card>,
    review_states: HashMap<ReviewKey, ReviewState>,
    utterances: Vec<Utterance>,
    sessions: HashMap<SessionId, SessionRecord>,
}

impl Tables {
    fn ensure_pair(&self, key: ReviewKey) -> Result<(), StorageError> {
        if !self.learners.contains_key(&key.learner_id) {
            return Err(StorageError::not_found("learner", key.learner_id));
        }
        if !self.cards.contains_key(&key.card_id) {
            return Err(StorageError::not_found("card", key.card_id));
        }
        Ok(())
    }

    /// Version the write would be stored under.
    fn next_version(&self, state: &ReviewState) -> Result<u64, StorageError> {
        let expected = self
            .review_states
            .get(&state.key())
            .map_or(0, ReviewState::version);
        if state.version() != expected {
            return Err(StorageError::stale_version(
                state.key(),
                expected,
                state.version(),
            ));
        }
        Ok(expected + 1)
    }

    fn put_state(&mut self, state: &ReviewState) -> Result<ReviewState, StorageError> {
        self.ensure_pair(state.key())?;
        let stored = state.clone().with_version(self.next_version(state)?);
        self.review_states.insert(stored.key(), stored.clone());
        Ok(stored)
    }

    fn append(&mut self, utterance: &Utterance) -> Result<i64, StorageError> {
        self.ensure_pair(ReviewKey::new(utterance.learner_id, utterance.card_id))?;
        let id = i64::try_from(self.utterances.len() + 1)
            .map_err(|_| StorageError::Serialization("utterance id overflow".into()))?;
        self.utterances.push(utterance.clone().with_id(id));
        Ok(id)
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All tables sit behind one lock, so every operation is trivially atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl LearnerRepository for InMemoryRepository {
    async fn get_learner(&self, id: LearnerId) -> Result<Learner, StorageError> {
        let guard = self.lock()?;
        guard
            .learners
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("learner", id))
    }

    async fn upsert_learner(&self, learner: &Learner) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.learners.insert(learner.id(), learner.clone());
        Ok(())
    }
}

#[async_trait]
impl CardRepository for InMemoryRepository {
    async fn upsert_card(&self, card: &Card) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.cards.insert(card.id(), card.clone());
        Ok(())
    }

    async fn get_card(&self, id: CardId) -> Result<Card, StorageError> {
        let guard = self.lock()?;
        guard
            .cards
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("card", id))
    }

    async fn cards_for_stage(&self, stage: LessonStage) -> Result<Vec<Card>, StorageError> {
        let guard = self.lock()?;
        let mut cards: Vec<Card> = guard
            .cards
            .values()
            .filter(|c| c.stage() == stage)
            .cloned()
            .collect();
        cards.sort_by_key(|c| (c.difficulty(), c.id()));
        Ok(cards)
    }
}

#[async_trait]
impl ReviewStateRepository for InMemoryRepository {
    async fn get_review_state(&self, key: ReviewKey) -> Result<Option<ReviewState>, StorageError> {
        let guard = self.lock()?;
        guard.ensure_pair(key)?;
        Ok(guard.review_states.get(&key).cloned())
    }

    async fn put_review_state(&self, state: &ReviewState) -> Result<ReviewState, StorageError> {
        let mut guard = self.lock()?;
        guard.put_state(state)
    }

    async fn due_cards(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReviewState>, StorageError> {
        let guard = self.lock()?;
        let mut due: Vec<ReviewState> = guard
            .review_states
            .values()
            .filter(|s| s.learner_id() == learner_id && s.is_due(as_of))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.due_at()
                .cmp(&b.due_at())
                .then(b.lapses().cmp(&a.lapses()))
                .then(a.card_id().cmp(&b.card_id()))
        });
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(due)
    }
}

#[async_trait]
impl UtteranceRepository for InMemoryRepository {
    async fn append_utterance(&self, utterance: &Utterance) -> Result<i64, StorageError> {
        let mut guard = self.lock()?;
        guard.append(utterance)
    }

    async fn utterances_for_learner(
        &self,
        learner_id: LearnerId,
        limit: u32,
    ) -> Result<Vec<Utterance>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .utterances
            .iter()
            .rev()
            .filter(|u| u.learner_id == learner_id)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn close_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.sessions.contains_key(&record.id()) {
            return Err(StorageError::Conflict(format!(
                "session {} already closed",
                record.id()
            )));
        }
        let learner = guard
            .learners
            .get_mut(&record.learner_id())
            .ok_or_else(|| StorageError::not_found("learner", record.learner_id()))?;
        learner.end_session(record.id());
        guard.sessions.insert(record.id(), record.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<SessionRecord, StorageError> {
        let guard = self.lock()?;
        guard
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("session", id))
    }

    async fn sessions_for_learner(
        &self,
        learner_id: LearnerId,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<SessionRecord> = guard
            .sessions
            .values()
            .filter(|s| s.learner_id() == learner_id)
            .cloned()
            .collect();
        out.sort_by_key(SessionRecord::started_at);
        Ok(out)
    }
}

#[async_trait]
impl TurnPersistence for InMemoryRepository {
    async fn commit_turn(&self, commit: &TurnCommit) -> Result<TurnReceipt, StorageError> {
        let mut guard = self.lock()?;

        // Validate everything before the first mutation.
        if let Some(state) = &commit.review_state {
            if !guard.cards.contains_key(&state.card_id()) {
                return Err(StorageError::not_found("card", state.card_id()));
            }
            guard.next_version(state)?;
        }
        if !guard.cards.contains_key(&commit.utterance.card_id) {
            return Err(StorageError::not_found("card", commit.utterance.card_id));
        }

        guard
            .learners
            .insert(commit.learner.id(), commit.learner.clone());
        let review_state = commit
            .review_state
            .as_ref()
            .map(|s| guard.put_state(s))
            .transpose()?;
        let utterance_id = guard.append(&commit.utterance)?;

        Ok(TurnReceipt {
            review_state,
            utterance_id,
        })
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub learners: Arc<dyn LearnerRepository>,
    pub cards: Arc<dyn CardRepository>,
    pub review_states: Arc<dyn ReviewStateRepository>,
    pub utterances: Arc<dyn UtteranceRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub turns: Arc<dyn TurnPersistence>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wire every contract to the same backend.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: LearnerRepository
            + CardRepository
            + ReviewStateRepository
            + UtteranceRepository
            + SessionRepository
            + TurnPersistence
            + Clone
            + 'static,
    {
        Self {
            learners: Arc::new(repo.clone()),
            cards: Arc::new(repo.clone()),
            review_states: Arc::new(repo.clone()),
            utterances: Arc::new(repo.clone()),
            sessions: Arc::new(repo.clone()),
            turns: Arc::new(repo),
        }
    }
}
