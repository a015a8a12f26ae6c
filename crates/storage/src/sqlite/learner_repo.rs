use tutor_core::model::{Learner, LearnerId};

use super::{
    SqliteRepository, conn_err,
    mapping::{id_i64, map_learner_row},
};
use crate::repository::{LearnerRepository, StorageError};

const UPSERT_LEARNER: &str = r"
    INSERT INTO learners (
        id, display_name,
        tone_attempts, tone_errors,
        consonant_attempts, consonant_errors,
        vocabulary_attempts, vocabulary_errors,
        current_session, created_at, archived_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(id) DO UPDATE SET
        -- created_at is fixed on first contact
        display_name = excluded.display_name,
        tone_attempts = excluded.tone_attempts,
        tone_errors = excluded.tone_errors,
        consonant_attempts = excluded.consonant_attempts,
        consonant_errors = excluded.consonant_errors,
        vocabulary_attempts = excluded.vocabulary_attempts,
        vocabulary_errors = excluded.vocabulary_errors,
        current_session = excluded.current_session,
        archived_at = excluded.archived_at
";

/// Upsert on any executor so turn commits can reuse it inside their transaction.
pub(crate) async fn write_learner<'e, E>(executor: E, learner: &Learner) -> Result<(), StorageError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let p = learner.proficiency();

    sqlx::query(UPSERT_LEARNER)
        .bind(id_i64("learner_id", learner.id().value())?)
        .bind(learner.display_name().map(str::to_owned))
        .bind(id_i64("tone_attempts", p.tone.attempts)?)
        .bind(id_i64("tone_errors", p.tone.errors)?)
        .bind(id_i64("consonant_attempts", p.consonant.attempts)?)
        .bind(id_i64("consonant_errors", p.consonant.errors)?)
        .bind(id_i64("vocabulary_attempts", p.vocabulary.attempts)?)
        .bind(id_i64("vocabulary_errors", p.vocabulary.errors)?)
        .bind(learner.current_session().map(|s| s.to_string()))
        .bind(learner.created_at())
        .bind(learner.archived_at())
        .execute(executor)
        .await
        .map_err(conn_err)?;
    Ok(())
}

#[async_trait::async_trait]
impl LearnerRepository for SqliteRepository {
    async fn get_learner(&self, id: LearnerId) -> Result<Learner, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                id, display_name,
                tone_attempts, tone_errors,
                consonant_attempts, consonant_errors,
                vocabulary_attempts, vocabulary_errors,
                current_session, created_at, archived_at
            FROM learners
            WHERE id = ?1
            ",
        )
        .bind(id_i64("learner_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn_err)?;

        match row {
            Some(row) => map_learner_row(&row),
            None => Err(StorageError::not_found("learner", id)),
        }
    }

    async fn upsert_learner(&self, learner: &Learner) -> Result<(), StorageError> {
        write_learner(&self.pool, learner).await?;
        tracing::debug!(learner_id = %learner.id(), "learner upserted");
        Ok(())
    }
}
