use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Notify;

use services::feedback::{PRAISE, SpeakingRate};
use services::{FailureKind, TurnReply, TutorConfig, TutorService};
use storage::repository::{
    CardRepository, InMemoryRepository, LearnerRepository, ReviewStateRepository, Storage,
    StorageError, TurnCommit, TurnPersistence, TurnReceipt, UtteranceRepository,
};
use tutor_core::correction::MismatchKind;
use tutor_core::model::{CardDraft, CardId, LearnerId, LessonStage, ReviewKey};
use tutor_core::text::LaoTextProcessor;
use tutor_core::time::fixed_now;

const LEARNER: LearnerId = LearnerId::new(1);

async fn add_card(repo: &InMemoryRepository, id: u64, text: &str, stage: LessonStage) {
    let card = CardDraft::new(text, stage)
        .with_translation("gloss")
        .validate(CardId::new(id), &LaoTextProcessor::new(), fixed_now())
        .unwrap();
    repo.upsert_card(&card).await.unwrap();
}

fn service(storage: Storage) -> TutorService {
    TutorService::new(storage, &TutorConfig::default()).unwrap()
}

fn feedback(reply: TurnReply) -> services::RenderInstruction {
    match reply {
        TurnReply::Feedback(instruction) => instruction,
        TurnReply::Failed(failure) => panic!("turn failed: {failure:?}"),
    }
}

#[tokio::test]
async fn first_exact_attempt_schedules_one_day_out() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let out = feedback(
        tutor
            .process_turn(LEARNER, session, "ສະບາຍດີ", now)
            .await
            .unwrap(),
    );

    assert!((out.score - 1.0).abs() < f64::EPSILON);
    assert!(out.passed);
    assert!(out.explanations.is_empty());
    assert_eq!(out.praise.as_deref(), Some(PRAISE));

    let state = repo
        .get_review_state(ReviewKey::new(LEARNER, CardId::new(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.interval_days(), 1);
    assert_eq!(state.repetitions(), 1);
    assert_eq!(state.due_at(), now + Duration::days(1));

    let log = repo.utterances_for_learner(LEARNER, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transcript, "ສະບາຍດີ");
}

#[tokio::test]
async fn tone_slip_slows_the_model_phrase() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ma2", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let out = feedback(tutor.process_turn(LEARNER, session, "ma3", now).await.unwrap());

    assert_eq!(out.explanations.len(), 1);
    assert_eq!(out.explanations[0].kind, MismatchKind::ToneError);
    assert!((out.score - 0.5).abs() < f64::EPSILON);
    assert!(!out.passed);
    assert_eq!(out.speaking_rate, SpeakingRate::Slow);
    assert_eq!(out.spoken_phrase, "ma2");
    assert!(out.praise.is_none());

    let learner = repo.get_learner(LEARNER).await.unwrap();
    let tone = learner.proficiency().tone;
    assert_eq!((tone.attempts, tone.errors), (1, 1));
    assert_eq!(learner.proficiency().vocabulary.errors, 0);
}

#[tokio::test]
async fn tone_slip_on_a_lao_number_counts_as_half_the_card() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສອງ", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let out = feedback(tutor.process_turn(LEARNER, session, "ສ້ອງ", now).await.unwrap());

    assert_eq!(out.explanations.len(), 1);
    assert_eq!(out.explanations[0].kind, MismatchKind::ToneError);
    assert!((out.score - 0.5).abs() < f64::EPSILON);
    assert!(!out.passed);
    assert_eq!(out.highlights[0].slice(&out.display_text), Some("ສ້ອງ"));
}

#[tokio::test]
async fn repeated_lapses_keep_the_card_on_a_daily_cycle() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let start = fixed_now();
    let key = ReviewKey::new(LEARNER, CardId::new(1));

    let session = tutor.start_session(LEARNER, start).await.unwrap();
    for day in 0..3 {
        let now = start + Duration::days(day);
        let out = feedback(tutor.process_turn(LEARNER, session, "xyz", now).await.unwrap());
        assert!(!out.passed);
    }

    let state = repo.get_review_state(key).await.unwrap().unwrap();
    assert_eq!(state.lapses(), 3);
    assert_eq!(state.repetitions(), 0);
    assert_eq!(state.interval_days(), 1);
    assert!(state.ease() >= 1.3);
    assert_eq!(state.version(), 3);
}

#[tokio::test]
async fn steady_accuracy_promotes_to_the_next_stage() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ຂາ", LessonStage::Tones).await;
    add_card(&repo, 2, "ມາ", LessonStage::Tones).await;
    add_card(&repo, 3, "ສອງ", LessonStage::Numbers).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    assert_eq!(tutor.session_state(session).unwrap().stage(), LessonStage::Tones);

    let mut last = None;
    for _ in 0..3 {
        let prompt = tutor.current_card(session, now).await.unwrap().unwrap();
        assert_eq!(prompt.stage, LessonStage::Tones);
        last = Some(feedback(
            tutor
                .process_turn(LEARNER, session, &prompt.text, now)
                .await
                .unwrap(),
        ));
    }

    let out = last.unwrap();
    assert_eq!(out.stage, LessonStage::Numbers);
    assert_eq!(out.next_prompt.unwrap().card_id, CardId::new(3));
    assert_eq!(tutor.session_state(session).unwrap().stage(), LessonStage::Numbers);
}

#[tokio::test]
async fn cards_due_exactly_now_are_reviewed_first() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    add_card(&repo, 2, "ຂອບໃຈ", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let start = fixed_now();

    let session = tutor.start_session(LEARNER, start).await.unwrap();
    tutor
        .process_turn(LEARNER, session, "ສະບາຍດີ", start)
        .await
        .unwrap();

    let due_at = start + Duration::days(1);
    let prompt = tutor.current_card(session, due_at).await.unwrap().unwrap();
    assert_eq!(prompt.card_id, CardId::new(1));
    assert_eq!(prompt.stage, LessonStage::Review);

    let out = feedback(
        tutor
            .process_turn(LEARNER, session, "ສະບາຍດີ", due_at)
            .await
            .unwrap(),
    );
    // Drained: back to where the session was interrupted.
    assert_eq!(out.stage, LessonStage::Onboarding);
    assert_eq!(out.next_prompt.unwrap().card_id, CardId::new(2));
}

#[tokio::test]
async fn timeouts_are_logged_but_not_scheduled() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let out = feedback(tutor.process_timeout(LEARNER, session, now).await.unwrap());
    assert!(!out.passed);
    assert_eq!(out.explanations[0].kind, MismatchKind::EmptyInput);

    let key = ReviewKey::new(LEARNER, CardId::new(1));
    assert!(repo.get_review_state(key).await.unwrap().is_none());
    assert_eq!(repo.utterances_for_learner(LEARNER, 10).await.unwrap().len(), 1);

    let state = tutor.session_state(session).unwrap();
    assert_eq!(state.turns(), 1);
    assert_eq!(state.scored_turns(), 0);
    assert_eq!(state.active_frame().window().len(), 0);
}

//
// ─── FAULT INJECTION ───────────────────────────────────────────────────────────
//

/// Reports a version conflict for the first `failures` commits.
#[derive(Clone)]
struct ConflictingTurns {
    inner: InMemoryRepository,
    failures: Arc<AtomicU32>,
}

#[async_trait]
impl TurnPersistence for ConflictingTurns {
    async fn commit_turn(&self, commit: &TurnCommit) -> Result<TurnReceipt, StorageError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StorageError::Conflict("injected".into()));
        }
        self.inner.commit_turn(commit).await
    }
}

fn with_conflicts(repo: &InMemoryRepository, failures: u32) -> Storage {
    Storage {
        turns: Arc::new(ConflictingTurns {
            inner: repo.clone(),
            failures: Arc::new(AtomicU32::new(failures)),
        }),
        ..Storage::from_repository(repo.clone())
    }
}

#[tokio::test]
async fn version_conflicts_are_retried() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let tutor = service(with_conflicts(&repo, 2));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let out = feedback(
        tutor
            .process_turn(LEARNER, session, "ສະບາຍດີ", now)
            .await
            .unwrap(),
    );
    assert!(out.passed);

    let key = ReviewKey::new(LEARNER, CardId::new(1));
    assert_eq!(repo.get_review_state(key).await.unwrap().unwrap().version(), 1);
    assert_eq!(tutor.session_state(session).unwrap().turns(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_the_turn_and_keep_the_session() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let tutor = service(with_conflicts(&repo, 100));
    let now = fixed_now();

    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let before = tutor.session_state(session).unwrap();
    let reply = tutor
        .process_turn(LEARNER, session, "ສະບາຍດີ", now)
        .await
        .unwrap();

    match reply {
        TurnReply::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Conflict);
            assert!(failure.message.starts_with("Sorry"));
        }
        TurnReply::Feedback(_) => panic!("expected a failed turn"),
    }
    assert_eq!(tutor.session_state(session), Some(before));
    assert!(repo.utterances_for_learner(LEARNER, 10).await.unwrap().is_empty());
}

/// Parks every commit until released.
#[derive(Clone)]
struct GatedTurns {
    inner: InMemoryRepository,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl TurnPersistence for GatedTurns {
    async fn commit_turn(&self, commit: &TurnCommit) -> Result<TurnReceipt, StorageError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.commit_turn(commit).await
    }
}

fn gated(repo: &InMemoryRepository) -> (Storage, Arc<Notify>, Arc<Notify>) {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let storage = Storage {
        turns: Arc::new(GatedTurns {
            inner: repo.clone(),
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }),
        ..Storage::from_repository(repo.clone())
    };
    (storage, entered, release)
}

#[tokio::test]
async fn a_session_runs_one_turn_at_a_time() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let (storage, entered, release) = gated(&repo);
    let tutor = service(storage);
    let now = fixed_now();
    let session = tutor.start_session(LEARNER, now).await.unwrap();

    let first = tokio::spawn({
        let tutor = tutor.clone();
        async move { tutor.process_turn(LEARNER, session, "ສະບາຍດີ", now).await }
    });
    entered.notified().await;

    let err = tutor
        .process_turn(LEARNER, session, "ສະບາຍດີ", now)
        .await
        .unwrap_err();
    assert!(matches!(err, services::SessionError::Busy(id) if id == session));

    release.notify_one();
    let out = feedback(first.await.unwrap().unwrap());
    assert!(out.passed);
    assert_eq!(tutor.session_state(session).unwrap().turns(), 1);
}

#[tokio::test]
async fn cancelled_turns_leave_the_session_untouched() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let (storage, entered, release) = gated(&repo);
    let tutor = service(storage);
    let now = fixed_now();
    let session = tutor.start_session(LEARNER, now).await.unwrap();
    let before = tutor.session_state(session).unwrap();

    let turn = tokio::spawn({
        let tutor = tutor.clone();
        async move { tutor.process_turn(LEARNER, session, "ສະບາຍດີ່", now).await }
    });
    entered.notified().await;
    turn.abort();
    assert!(turn.await.unwrap_err().is_cancelled());

    assert_eq!(tutor.session_state(session), Some(before));
    let key = ReviewKey::new(LEARNER, CardId::new(1));
    assert!(repo.get_review_state(key).await.unwrap().is_none());

    // The same attempt, replayed, must land exactly where an
    // uninterrupted run does.
    release.notify_one();
    let replayed = feedback(
        tutor
            .process_turn(LEARNER, session, "ສະບາຍດີ່", now)
            .await
            .unwrap(),
    );

    let clean_repo = InMemoryRepository::new();
    add_card(&clean_repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let clean_tutor = service(Storage::from_repository(clean_repo.clone()));
    let clean_session = clean_tutor.start_session(LEARNER, now).await.unwrap();
    let clean = feedback(
        clean_tutor
            .process_turn(LEARNER, clean_session, "ສະບາຍດີ່", now)
            .await
            .unwrap(),
    );

    assert_eq!(replayed.explanations.len(), 1);
    assert_eq!(replayed.explanations[0].kind, MismatchKind::ToneError);
    assert!((replayed.score - clean.score).abs() < f64::EPSILON);
    assert_eq!(replayed, clean);

    let stored = repo.get_review_state(key).await.unwrap().unwrap();
    let expected = clean_repo.get_review_state(key).await.unwrap().unwrap();
    assert_eq!(stored.version(), 1);
    assert_eq!(stored.interval_days(), expected.interval_days());
    assert!((stored.ease() - expected.ease()).abs() < f64::EPSILON);
    assert_eq!(stored, expected);
    assert_eq!(repo.utterances_for_learner(LEARNER, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sessions_of_different_learners_run_in_parallel() {
    let repo = InMemoryRepository::new();
    add_card(&repo, 1, "ສະບາຍດີ", LessonStage::Onboarding).await;
    let tutor = service(Storage::from_repository(repo.clone()));
    let now = fixed_now();

    let mut handles = Vec::new();
    for learner in 1..=4 {
        let tutor = tutor.clone();
        handles.push(tokio::spawn(async move {
            let learner = LearnerId::new(learner);
            let session = tutor.start_session(learner, now).await?;
            tutor.process_turn(learner, session, "ສະບາຍດີ", now).await
        }));
    }
    for handle in handles {
        assert!(feedback(handle.await.unwrap().unwrap()).passed);
    }
    assert_eq!(tutor.live_sessions(), 4);
}
