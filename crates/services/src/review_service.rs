use chrono::{DateTime, Utc};

use storage::repository::{ReviewStateRepository, StorageError};
use tutor_core::{
    model::{CardId, LearnerId, ReviewKey, ReviewState},
    scheduler::{ScheduleDecision, Scheduler},
};

use crate::error::ReviewServiceError;

/// A scheduling decision together with the state it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedReview {
    pub previous: Option<ReviewState>,
    pub decision: ScheduleDecision,
}

/// Coordinates the pure scheduler with persisted review states.
#[derive(Debug, Clone, Default)]
pub struct ReviewService {
    scheduler: Scheduler,
}

impl ReviewService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_scheduler(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Load the current state of a pair and schedule the attempt on top of it.
    ///
    /// Nothing is written: the returned state carries the version it was read
    /// at, ready for a version-checked commit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown learner or card, or a
    /// scheduler error for invalid input.
    pub async fn plan(
        &self,
        states: &dyn ReviewStateRepository,
        key: ReviewKey,
        quality: f64,
        now: DateTime<Utc>,
    ) -> Result<PlannedReview, ReviewServiceError> {
        let previous = states.get_review_state(key).await?;
        let decision = self
            .scheduler
            .schedule(key, previous.as_ref(), quality, now)?;
        Ok(PlannedReview { previous, decision })
    }

    /// Plan and persist in one go, outside of a turn.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the state changed between read and
    /// write, plus anything [`ReviewService::plan`] returns.
    pub async fn review(
        &self,
        states: &dyn ReviewStateRepository,
        key: ReviewKey,
        quality: f64,
        now: DateTime<Utc>,
    ) -> Result<ReviewState, ReviewServiceError> {
        let planned = self.plan(states, key, quality, now).await?;
        Ok(states.put_review_state(&planned.decision.state).await?)
    }

    /// Card IDs due for `learner_id`, most urgent first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the due queue cannot be read.
    pub async fn due_queue(
        &self,
        states: &dyn ReviewStateRepository,
        learner_id: LearnerId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CardId>, StorageError> {
        Ok(states
            .due_cards(learner_id, now, limit)
            .await?
            .iter()
            .map(ReviewState::card_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use storage::repository::{CardRepository, InMemoryRepository, LearnerRepository};
    use tutor_core::model::{CardDraft, Learner, LessonStage};
    use tutor_core::scheduler::SchedulerError;
    use tutor_core::text::LaoTextProcessor;
    use tutor_core::time::fixed_now;

    async fn repo() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.upsert_learner(&Learner::new(LearnerId::new(1), fixed_now()))
            .await
            .unwrap();
        let card = CardDraft::new("ສອງ", LessonStage::Numbers)
            .validate(CardId::new(1), &LaoTextProcessor::new(), fixed_now())
            .unwrap();
        repo.upsert_card(&card).await.unwrap();
        repo
    }

    fn key() -> ReviewKey {
        ReviewKey::new(LearnerId::new(1), CardId::new(1))
    }

    #[tokio::test]
    async fn first_review_is_persisted_at_version_one() {
        let repo = repo().await;
        let service = ReviewService::new();

        let stored = service.review(&repo, key(), 1.0, fixed_now()).await.unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.interval_days(), 1);
        assert_eq!(stored.repetitions(), 1);
    }

    #[tokio::test]
    async fn plans_build_on_the_stored_state() {
        let repo = repo().await;
        let service = ReviewService::new();
        service.review(&repo, key(), 1.0, fixed_now()).await.unwrap();

        let later = fixed_now() + Duration::days(1);
        let planned = service.plan(&repo, key(), 1.0, later).await.unwrap();
        assert_eq!(planned.previous.as_ref().map(ReviewState::version), Some(1));
        assert_eq!(planned.decision.state.version(), 1);
        assert_eq!(planned.decision.state.interval_days(), 3);
    }

    #[tokio::test]
    async fn invalid_quality_is_a_scheduler_error() {
        let repo = repo().await;
        let err = ReviewService::new()
            .plan(&repo, key(), f64::NAN, fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReviewServiceError::Scheduler(SchedulerError::InvalidQuality { .. })
        ));
    }

    #[tokio::test]
    async fn due_queue_is_inclusive_of_now() {
        let repo = repo().await;
        let service = ReviewService::new();
        let stored = service.review(&repo, key(), 0.0, fixed_now()).await.unwrap();

        let at_due = service
            .due_queue(&repo, LearnerId::new(1), stored.due_at(), 10)
            .await
            .unwrap();
        assert_eq!(at_due, vec![CardId::new(1)]);

        let before = service
            .due_queue(&repo, LearnerId::new(1), fixed_now(), 10)
            .await
            .unwrap();
        assert!(before.is_empty());
    }
}
