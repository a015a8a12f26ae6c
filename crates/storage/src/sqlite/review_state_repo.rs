use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tutor_core::model::{LearnerId, ReviewKey, ReviewState};

use super::{
    SqliteRepository, conn_err,
    learner_repo::write_learner,
    mapping::{id_i64, map_review_state_row, ser},
    utterance_repo::insert_utterance,
};
use crate::repository::{
    ReviewStateRepository, StorageError, TurnCommit, TurnPersistence, TurnReceipt,
};

/// Fails with `NotFound` unless both ends of the pair exist.
pub(crate) async fn ensure_pair(
    conn: &mut SqliteConnection,
    key: ReviewKey,
) -> Result<(), StorageError> {
    let row = sqlx::query(
        r"
        SELECT
            EXISTS(SELECT 1 FROM learners WHERE id = ?1) AS has_learner,
            EXISTS(SELECT 1 FROM cards WHERE id = ?2) AS has_card
        ",
    )
    .bind(id_i64("learner_id", key.learner_id.value())?)
    .bind(id_i64("card_id", key.card_id.value())?)
    .fetch_one(&mut *conn)
    .await
    .map_err(conn_err)?;

    let has_learner: bool = row.try_get("has_learner").map_err(ser)?;
    let has_card: bool = row.try_get("has_card").map_err(ser)?;
    if !has_learner {
        return Err(StorageError::not_found("learner", key.learner_id));
    }
    if !has_card {
        return Err(StorageError::not_found("card", key.card_id));
    }
    Ok(())
}

/// Compare-and-swap on `version`. Must run inside a transaction.
async fn write_state(
    conn: &mut SqliteConnection,
    state: &ReviewState,
) -> Result<ReviewState, StorageError> {
    let key = state.key();
    ensure_pair(conn, key).await?;

    let learner_id = id_i64("learner_id", key.learner_id.value())?;
    let card_id = id_i64("card_id", key.card_id.value())?;

    let stored: Option<i64> = sqlx::query_scalar(
        "SELECT version FROM review_states WHERE learner_id = ?1 AND card_id = ?2",
    )
    .bind(learner_id)
    .bind(card_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(conn_err)?;

    let expected = stored.map_or(Ok(0), |v| {
        u64::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid version: {v}")))
    })?;
    if state.version() != expected {
        return Err(StorageError::stale_version(key, expected, state.version()));
    }
    let next = expected + 1;

    let result = if expected == 0 {
        sqlx::query(
            r"
            INSERT INTO review_states (
                learner_id, card_id, ease, interval_days, due_at,
                last_reviewed_at, repetitions, lapses, version
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(learner_id, card_id) DO NOTHING
            ",
        )
        .bind(learner_id)
        .bind(card_id)
        .bind(state.ease())
        .bind(i64::from(state.interval_days()))
        .bind(state.due_at())
        .bind(state.last_reviewed_at())
        .bind(i64::from(state.repetitions()))
        .bind(i64::from(state.lapses()))
        .bind(id_i64("version", next)?)
        .execute(&mut *conn)
        .await
    } else {
        sqlx::query(
            r"
            UPDATE review_states SET
                ease = ?3,
                interval_days = ?4,
                due_at = ?5,
                last_reviewed_at = ?6,
                repetitions = ?7,
                lapses = ?8,
                version = ?9
            WHERE learner_id = ?1 AND card_id = ?2 AND version = ?10
            ",
        )
        .bind(learner_id)
        .bind(card_id)
        .bind(state.ease())
        .bind(i64::from(state.interval_days()))
        .bind(state.due_at())
        .bind(state.last_reviewed_at())
        .bind(i64::from(state.repetitions()))
        .bind(i64::from(state.lapses()))
        .bind(id_i64("version", next)?)
        .bind(id_i64("version", expected)?)
        .execute(&mut *conn)
        .await
    }
    .map_err(conn_err)?;

    if result.rows_affected() == 0 {
        return Err(StorageError::Conflict(format!(
            "review state {}/{} changed under a concurrent write",
            key.learner_id, key.card_id
        )));
    }
    Ok(state.clone().with_version(next))
}

#[async_trait::async_trait]
impl ReviewStateRepository for SqliteRepository {
    async fn get_review_state(&self, key: ReviewKey) -> Result<Option<ReviewState>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(conn_err)?;
        ensure_pair(&mut conn, key).await?;

        let row = sqlx::query(
            r"
            SELECT learner_id, card_id, ease, interval_days, due_at,
                   last_reviewed_at, repetitions, lapses, version
            FROM review_states
            WHERE learner_id = ?1 AND card_id = ?2
            ",
        )
        .bind(id_i64("learner_id", key.learner_id.value())?)
        .bind(id_i64("card_id", key.card_id.value())?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(conn_err)?;

        row.as_ref().map(map_review_state_row).transpose()
    }

    async fn put_review_state(&self, state: &ReviewState) -> Result<ReviewState, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn_err)?;
        let stored = write_state(&mut tx, state).await?;
        tx.commit().await.map_err(conn_err)?;

        tracing::debug!(
            learner_id = %stored.learner_id(),
            card_id = %stored.card_id(),
            version = stored.version(),
            "review state stored"
        );
        Ok(stored)
    }

    async fn due_cards(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReviewState>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT learner_id, card_id, ease, interval_days, due_at,
                   last_reviewed_at, repetitions, lapses, version
            FROM review_states
            WHERE learner_id = ?1 AND due_at <= ?2
            ORDER BY due_at ASC, lapses DESC, card_id ASC
            LIMIT ?3
            ",
        )
        .bind(id_i64("learner_id", learner_id.value())?)
        .bind(as_of)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn_err)?;

        rows.iter().map(map_review_state_row).collect()
    }
}

#[async_trait::async_trait]
impl TurnPersistence for SqliteRepository {
    async fn commit_turn(&self, commit: &TurnCommit) -> Result<TurnReceipt, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn_err)?;

        write_learner(&mut *tx, &commit.learner).await?;

        let review_state = match &commit.review_state {
            Some(state) => match write_state(&mut tx, state).await {
                Ok(stored) => Some(stored),
                Err(e) => {
                    if e.is_conflict() {
                        tracing::warn!(
                            learner_id = %state.learner_id(),
                            card_id = %state.card_id(),
                            version = state.version(),
                            "turn commit lost a version race"
                        );
                    }
                    // Dropping the transaction rolls back the learner write.
                    return Err(e);
                }
            },
            None => None,
        };

        let utterance_id = insert_utterance(&mut tx, &commit.utterance).await?;
        tx.commit().await.map_err(conn_err)?;

        tracing::info!(
            learner_id = %commit.learner.id(),
            card_id = %commit.utterance.card_id,
            utterance_id,
            scheduled = review_state.is_some(),
            "turn committed"
        );
        Ok(TurnReceipt {
            review_state,
            utterance_id,
        })
    }
}
