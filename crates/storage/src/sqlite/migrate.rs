use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates learners, the card catalog, review states, the utterance log and
/// closed sessions, plus their indexes.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS learners (
                    id INTEGER PRIMARY KEY,
                    display_name TEXT,
                    tone_attempts INTEGER NOT NULL CHECK (tone_attempts >= 0),
                    tone_errors INTEGER NOT NULL CHECK (tone_errors BETWEEN 0 AND tone_attempts),
                    consonant_attempts INTEGER NOT NULL CHECK (consonant_attempts >= 0),
                    consonant_errors INTEGER NOT NULL
                        CHECK (consonant_errors BETWEEN 0 AND consonant_attempts),
                    vocabulary_attempts INTEGER NOT NULL CHECK (vocabulary_attempts >= 0),
                    vocabulary_errors INTEGER NOT NULL
                        CHECK (vocabulary_errors BETWEEN 0 AND vocabulary_attempts),
                    current_session TEXT,
                    created_at TEXT NOT NULL,
                    archived_at TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS cards (
                    id INTEGER PRIMARY KEY,
                    text TEXT NOT NULL,
                    romanized TEXT NOT NULL,
                    annotation TEXT,
                    translation TEXT,
                    tags TEXT NOT NULL,
                    stage TEXT NOT NULL,
                    difficulty INTEGER NOT NULL CHECK (difficulty BETWEEN 1 AND 5),
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS review_states (
                    learner_id INTEGER NOT NULL,
                    card_id INTEGER NOT NULL,
                    ease REAL NOT NULL CHECK (ease > 0),
                    interval_days INTEGER NOT NULL CHECK (interval_days >= 1),
                    due_at TEXT NOT NULL,
                    last_reviewed_at TEXT NOT NULL,
                    repetitions INTEGER NOT NULL CHECK (repetitions >= 0),
                    lapses INTEGER NOT NULL CHECK (lapses >= 0),
                    version INTEGER NOT NULL CHECK (version >= 1),
                    PRIMARY KEY (learner_id, card_id),
                    FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE,
                    FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS utterances (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    learner_id INTEGER NOT NULL,
                    card_id INTEGER NOT NULL,
                    session_id TEXT NOT NULL,
                    transcript TEXT NOT NULL,
                    mismatches TEXT NOT NULL,
                    score REAL NOT NULL CHECK (score BETWEEN 0 AND 1),
                    passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
                    recorded_at TEXT NOT NULL,
                    FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE,
                    FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    learner_id INTEGER NOT NULL,
                    started_at TEXT NOT NULL,
                    ended_at TEXT NOT NULL,
                    end_reason TEXT NOT NULL,
                    turns INTEGER NOT NULL CHECK (turns >= 0),
                    scored_turns INTEGER NOT NULL CHECK (scored_turns BETWEEN 0 AND turns),
                    mean_accuracy REAL NOT NULL CHECK (mean_accuracy BETWEEN 0 AND 1),
                    final_stage TEXT NOT NULL,
                    FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_cards_stage_difficulty
                    ON cards(stage, difficulty, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_review_states_learner_due
                    ON review_states(learner_id, due_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_utterances_learner
                    ON utterances(learner_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_sessions_learner_started
                    ON sessions(learner_id, started_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
