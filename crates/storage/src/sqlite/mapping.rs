use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tutor_core::model::{
    Card, CardId, EndReason, Learner, LearnerId, LessonStage, Proficiency, ReviewKey, ReviewState,
    SessionId, SessionRecord, SkillCounter, Utterance,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn learner_id_from_i64(v: i64) -> Result<LearnerId, StorageError> {
    Ok(LearnerId::new(i64_to_u64("learner_id", v)?))
}

pub(crate) fn card_id_from_i64(v: i64) -> Result<CardId, StorageError> {
    Ok(CardId::new(i64_to_u64("card_id", v)?))
}

pub(crate) fn parse_session_id(s: &str) -> Result<SessionId, StorageError> {
    s.parse().map_err(ser)
}

pub(crate) fn parse_stage(s: &str) -> Result<LessonStage, StorageError> {
    s.parse().map_err(ser)
}

fn counter(row: &SqliteRow, skill: &str) -> Result<SkillCounter, StorageError> {
    let attempts: i64 = row.try_get(format!("{skill}_attempts").as_str()).map_err(ser)?;
    let errors: i64 = row.try_get(format!("{skill}_errors").as_str()).map_err(ser)?;
    Ok(SkillCounter {
        attempts: i64_to_u64("attempts", attempts)?,
        errors: i64_to_u64("errors", errors)?,
    })
}

pub(crate) fn map_learner_row(row: &SqliteRow) -> Result<Learner, StorageError> {
    let proficiency = Proficiency {
        tone: counter(row, "tone")?,
        consonant: counter(row, "consonant")?,
        vocabulary: counter(row, "vocabulary")?,
    };
    let current_session = row
        .try_get::<Option<String>, _>("current_session")
        .map_err(ser)?
        .as_deref()
        .map(parse_session_id)
        .transpose()?;

    Learner::from_persisted(
        learner_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        row.try_get("display_name").map_err(ser)?,
        proficiency,
        current_session,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("archived_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_card_row(row: &SqliteRow) -> Result<Card, StorageError> {
    let tags_json: String = row.try_get("tags").map_err(ser)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(ser)?;
    let stage: String = row.try_get("stage").map_err(ser)?;
    let difficulty: i64 = row.try_get("difficulty").map_err(ser)?;

    Card::from_persisted(
        card_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        row.try_get("text").map_err(ser)?,
        row.try_get("romanized").map_err(ser)?,
        row.try_get("annotation").map_err(ser)?,
        row.try_get("translation").map_err(ser)?,
        tags,
        parse_stage(&stage)?,
        u8::try_from(difficulty)
            .map_err(|_| StorageError::Serialization(format!("invalid difficulty: {difficulty}")))?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_review_state_row(row: &SqliteRow) -> Result<ReviewState, StorageError> {
    let key = ReviewKey::new(
        learner_id_from_i64(row.try_get::<i64, _>("learner_id").map_err(ser)?)?,
        card_id_from_i64(row.try_get::<i64, _>("card_id").map_err(ser)?)?,
    );
    let due_at: DateTime<Utc> = row.try_get("due_at").map_err(ser)?;
    let last_reviewed_at: DateTime<Utc> = row.try_get("last_reviewed_at").map_err(ser)?;

    ReviewState::from_persisted(
        key,
        row.try_get("ease").map_err(ser)?,
        i64_to_u32("interval_days", row.try_get("interval_days").map_err(ser)?)?,
        due_at,
        last_reviewed_at,
        i64_to_u32("repetitions", row.try_get("repetitions").map_err(ser)?)?,
        i64_to_u32("lapses", row.try_get("lapses").map_err(ser)?)?,
        i64_to_u64("version", row.try_get("version").map_err(ser)?)?,
    )
    .map_err(ser)
}

pub(crate) fn map_utterance_row(row: &SqliteRow) -> Result<Utterance, StorageError> {
    let mismatches_json: String = row.try_get("mismatches").map_err(ser)?;
    let session_id: String = row.try_get("session_id").map_err(ser)?;

    Ok(Utterance {
        id: Some(row.try_get("id").map_err(ser)?),
        learner_id: learner_id_from_i64(row.try_get::<i64, _>("learner_id").map_err(ser)?)?,
        card_id: card_id_from_i64(row.try_get::<i64, _>("card_id").map_err(ser)?)?,
        session_id: parse_session_id(&session_id)?,
        transcript: row.try_get("transcript").map_err(ser)?,
        mismatches: serde_json::from_str(&mismatches_json).map_err(ser)?,
        score: row.try_get("score").map_err(ser)?,
        passed: row.try_get("passed").map_err(ser)?,
        recorded_at: row.try_get("recorded_at").map_err(ser)?,
    })
}

pub(crate) fn map_session_row(row: &SqliteRow) -> Result<SessionRecord, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let end_reason: String = row.try_get("end_reason").map_err(ser)?;
    let final_stage: String = row.try_get("final_stage").map_err(ser)?;

    SessionRecord::new(
        parse_session_id(&id)?,
        learner_id_from_i64(row.try_get::<i64, _>("learner_id").map_err(ser)?)?,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("ended_at").map_err(ser)?,
        end_reason.parse::<EndReason>().map_err(ser)?,
        i64_to_u32("turns", row.try_get("turns").map_err(ser)?)?,
        i64_to_u32("scored_turns", row.try_get("scored_turns").map_err(ser)?)?,
        row.try_get("mean_accuracy").map_err(ser)?,
        parse_stage(&final_stage)?,
    )
    .map_err(ser)
}
