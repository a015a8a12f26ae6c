use tutor_core::model::{LearnerId, SessionId, SessionRecord};

use super::{
    SqliteRepository, conn_err,
    mapping::{id_i64, map_session_row},
};
use crate::repository::{SessionRepository, StorageError};

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn close_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let learner_id = id_i64("learner_id", record.learner_id().value())?;
        let session_id = record.id().to_string();
        let mut tx = self.pool.begin().await.map_err(conn_err)?;

        let learner_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM learners WHERE id = ?1")
            .bind(learner_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn_err)?;
        if learner_exists.is_none() {
            return Err(StorageError::not_found("learner", record.learner_id()));
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO sessions (
                id, learner_id, started_at, ended_at, end_reason,
                turns, scored_turns, mean_accuracy, final_stage
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(session_id.as_str())
        .bind(learner_id)
        .bind(record.started_at())
        .bind(record.ended_at())
        .bind(record.end_reason().as_str())
        .bind(i64::from(record.turns()))
        .bind(i64::from(record.scored_turns()))
        .bind(record.mean_accuracy())
        .bind(record.final_stage().as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn_err)?;
        if inserted.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "session {} already closed",
                record.id()
            )));
        }

        // A newer session may already own the pointer.
        sqlx::query(
            "UPDATE learners SET current_session = NULL WHERE id = ?1 AND current_session = ?2",
        )
        .bind(learner_id)
        .bind(session_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn_err)?;

        tx.commit().await.map_err(conn_err)?;
        tracing::info!(
            session_id = %record.id(),
            learner_id = %record.learner_id(),
            reason = %record.end_reason(),
            turns = record.turns(),
            "session closed"
        );
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<SessionRecord, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, learner_id, started_at, ended_at, end_reason,
                   turns, scored_turns, mean_accuracy, final_stage
            FROM sessions
            WHERE id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn_err)?;

        match row {
            Some(row) => map_session_row(&row),
            None => Err(StorageError::not_found("session", id)),
        }
    }

    async fn sessions_for_learner(
        &self,
        learner_id: LearnerId,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, learner_id, started_at, ended_at, end_reason,
                   turns, scored_turns, mean_accuracy, final_stage
            FROM sessions
            WHERE learner_id = ?1
            ORDER BY started_at ASC
            ",
        )
        .bind(id_i64("learner_id", learner_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn_err)?;

        rows.iter().map(map_session_row).collect()
    }
}
