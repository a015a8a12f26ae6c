use sqlx::SqliteConnection;
use tutor_core::model::{LearnerId, ReviewKey, Utterance};

use super::{
    SqliteRepository, conn_err,
    mapping::{id_i64, map_utterance_row, ser},
    review_state_repo::ensure_pair,
};
use crate::repository::{StorageError, UtteranceRepository};

pub(crate) async fn insert_utterance(
    conn: &mut SqliteConnection,
    utterance: &Utterance,
) -> Result<i64, StorageError> {
    ensure_pair(conn, ReviewKey::new(utterance.learner_id, utterance.card_id)).await?;
    let mismatches = serde_json::to_string(&utterance.mismatches).map_err(ser)?;

    let res = sqlx::query(
        r"
        INSERT INTO utterances (
            learner_id, card_id, session_id, transcript,
            mismatches, score, passed, recorded_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
    )
    .bind(id_i64("learner_id", utterance.learner_id.value())?)
    .bind(id_i64("card_id", utterance.card_id.value())?)
    .bind(utterance.session_id.to_string())
    .bind(utterance.transcript.as_str())
    .bind(mismatches)
    .bind(utterance.score)
    .bind(utterance.passed)
    .bind(utterance.recorded_at)
    .execute(&mut *conn)
    .await
    .map_err(conn_err)?;

    Ok(res.last_insert_rowid())
}

#[async_trait::async_trait]
impl UtteranceRepository for SqliteRepository {
    async fn append_utterance(&self, utterance: &Utterance) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(conn_err)?;
        let id = insert_utterance(&mut conn, utterance).await?;
        tracing::debug!(utterance_id = id, learner_id = %utterance.learner_id, "utterance logged");
        Ok(id)
    }

    async fn utterances_for_learner(
        &self,
        learner_id: LearnerId,
        limit: u32,
    ) -> Result<Vec<Utterance>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, learner_id, card_id, session_id, transcript,
                   mismatches, score, passed, recorded_at
            FROM utterances
            WHERE learner_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            ",
        )
        .bind(id_i64("learner_id", learner_id.value())?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn_err)?;

        rows.iter().map(map_utterance_row).collect()
    }
}
