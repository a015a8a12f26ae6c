use tutor_core::model::{Card, CardId, LessonStage};

use super::{
    SqliteRepository, conn_err,
    mapping::{id_i64, map_card_row, ser},
};
use crate::repository::{CardRepository, StorageError};

#[async_trait::async_trait]
impl CardRepository for SqliteRepository {
    async fn upsert_card(&self, card: &Card) -> Result<(), StorageError> {
        let tags = serde_json::to_string(card.tags()).map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO cards (
                id, text, romanized, annotation, translation, tags,
                stage, difficulty, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                -- keep created_at from the original import; only curated fields change
                text = excluded.text,
                romanized = excluded.romanized,
                annotation = excluded.annotation,
                translation = excluded.translation,
                tags = excluded.tags,
                stage = excluded.stage,
                difficulty = excluded.difficulty
            ",
        )
        .bind(id_i64("card_id", card.id().value())?)
        .bind(card.text().to_owned())
        .bind(card.romanized().to_owned())
        .bind(card.annotation().map(str::to_owned))
        .bind(card.translation().map(str::to_owned))
        .bind(tags)
        .bind(card.stage().as_str())
        .bind(i64::from(card.difficulty()))
        .bind(card.created_at())
        .execute(&self.pool)
        .await
        .map_err(conn_err)?;

        tracing::debug!(card_id = %card.id(), stage = %card.stage(), "card upserted");
        Ok(())
    }

    async fn get_card(&self, id: CardId) -> Result<Card, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, text, romanized, annotation, translation, tags, stage, difficulty, created_at
            FROM cards
            WHERE id = ?1
            ",
        )
        .bind(id_i64("card_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn_err)?;

        match row {
            Some(row) => map_card_row(&row),
            None => Err(StorageError::not_found("card", id)),
        }
    }

    async fn cards_for_stage(&self, stage: LessonStage) -> Result<Vec<Card>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, text, romanized, annotation, translation, tags, stage, difficulty, created_at
            FROM cards
            WHERE stage = ?1
            ORDER BY difficulty ASC, id ASC
            ",
        )
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn_err)?;

        let mut cards = Vec::with_capacity(rows.len());
        for row in rows {
            cards.push(map_card_row(&row)?);
        }
        tracing::debug!(%stage, count = cards.len(), "loaded stage catalog");
        Ok(cards)
    }
}
