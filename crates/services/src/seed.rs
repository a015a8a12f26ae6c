//! Default Lao content catalog.

use chrono::{DateTime, Utc};

use storage::repository::CardRepository;
use tutor_core::model::{Card, CardDraft, CardError, CardId, LessonStage};
use tutor_core::text::Romanizer;

use crate::error::SeedError;

struct SeedCard {
    text: &'static str,
    translation: &'static str,
    annotation: Option<&'static str>,
    difficulty: u8,
}

const fn card(text: &'static str, translation: &'static str, difficulty: u8) -> SeedCard {
    SeedCard {
        text,
        translation,
        annotation: None,
        difficulty,
    }
}

const fn annotated(
    text: &'static str,
    translation: &'static str,
    annotation: &'static str,
    difficulty: u8,
) -> SeedCard {
    SeedCard {
        text,
        translation,
        annotation: Some(annotation),
        difficulty,
    }
}

const GREETINGS: &[SeedCard] = &[
    card("ສະບາຍດີ", "Hello", 1),
    card("ຂອບໃຈ", "Thank you", 1),
    card("ຂໍໂທດ", "Sorry", 1),
    card("ບໍ່ເປັນຫຍັງ", "You're welcome", 2),
    card("ສະບາຍດີຕອນເຊົ້າ", "Good morning", 2),
    card("ສະບາຍດີຕອນແລງ", "Good evening", 2),
];

const ALPHABET: &[SeedCard] = &[
    annotated("ໄກ່", "chicken", "ກ mid-class", 1),
    annotated("ໄຂ່", "egg", "ຂ high-class", 1),
    annotated("ຄວາຍ", "buffalo", "ຄ low-class", 2),
    annotated("ງົວ", "cow", "ງ low-class", 2),
    annotated("ເສືອ", "tiger", "ສ high-class", 2),
    annotated("ຊ້າງ", "elephant", "ຊ low-class", 2),
    annotated("ນົກ", "bird", "ນ low-class", 1),
    annotated("ປາ", "fish", "ປ mid-class", 1),
    annotated("ແມວ", "cat", "ມ low-class", 1),
    annotated("ເຮືອນ", "house", "ຮ low-class", 3),
];

const TONES: &[SeedCard] = &[
    annotated("ຂາ", "leg", "rising", 2),
    annotated("ຂ່າ", "galangal", "low", 3),
    annotated("ຂ້າ", "to kill", "falling", 3),
    annotated("ມາ", "to come", "mid", 2),
    annotated("ໝາ", "dog", "rising", 3),
    annotated("ມ້າ", "horse", "high falling", 3),
    annotated("ໃກ້", "near", "falling", 4),
    annotated("ໄກ", "far", "mid", 4),
];

const NUMBERS: &[SeedCard] = &[
    card("ສູນ", "0", 1),
    card("ໜຶ່ງ", "1", 1),
    card("ສອງ", "2", 1),
    card("ສາມ", "3", 1),
    card("ສີ່", "4", 2),
    card("ຫ້າ", "5", 2),
    card("ຫົກ", "6", 2),
    card("ເຈັດ", "7", 2),
    card("ແປດ", "8", 2),
    card("ເກົ້າ", "9", 3),
    card("ສິບ", "10", 2),
];

const PHRASES: &[SeedCard] = &[
    card("ຈົ່ງພູດຊ້າ", "Please speak slowly", 2),
    card("ຂ້ອຍສຸກສະບາຍ", "I'm doing well", 2),
    card("ຂ້ອຍບໍ່ເຂົ້າໃຈ", "I don't understand", 3),
    card("ລາຄາເທົ່າໃດ?", "How much is it?", 3),
    card("ຫ້ອງນ້ຳຢູ່ໃສ?", "Where is the bathroom?", 4),
    card("ແຊບຫຼາຍ", "Very delicious", 2),
];

const CONVERSATION: &[SeedCard] = &[
    card("ທ່ານສະບາຍດີບໍ?", "How are you?", 2),
    card("ເຈົ້າຊື່ຫຍັງ?", "What is your name?", 3),
    card("ເຈົ້າມາຈາກໃສ?", "Where are you from?", 3),
    card("ມື້ນີ້ອາກາດດີ", "The weather is nice today", 4),
];

fn slices() -> [(LessonStage, &'static str, &'static [SeedCard]); 6] {
    [
        (LessonStage::Onboarding, "greetings", GREETINGS),
        (LessonStage::Alphabet, "consonants", ALPHABET),
        (LessonStage::Tones, "tone-pairs", TONES),
        (LessonStage::Numbers, "numbers", NUMBERS),
        (LessonStage::PhrasePractice, "phrases", PHRASES),
        (LessonStage::FreeConversation, "conversation", CONVERSATION),
    ]
}

/// Build the default catalog. IDs are stable: `100 * (slice + 1) + n`.
///
/// # Errors
///
/// Returns `CardError` if a seed entry does not validate.
pub fn default_catalog(
    romanizer: &dyn Romanizer,
    now: DateTime<Utc>,
) -> Result<Vec<Card>, CardError> {
    let mut cards = Vec::new();
    for ((stage, tag, entries), block) in slices().into_iter().zip(1_u64..) {
        for (seed, n) in entries.iter().zip(1_u64..) {
            let mut draft = CardDraft::new(seed.text, stage)
                .with_translation(seed.translation)
                .with_tag(tag)
                .with_difficulty(seed.difficulty);
            if let Some(annotation) = seed.annotation {
                draft = draft.with_annotation(annotation);
            }
            cards.push(draft.validate(CardId::new(block * 100 + n), romanizer, now)?);
        }
    }
    Ok(cards)
}

/// Upsert the default catalog; re-running refreshes curated fields only.
///
/// # Errors
///
/// Returns `SeedError` if a card fails validation or cannot be stored.
pub async fn import_default_catalog(
    cards: &dyn CardRepository,
    romanizer: &dyn Romanizer,
    now: DateTime<Utc>,
) -> Result<usize, SeedError> {
    let catalog = default_catalog(romanizer, now)?;
    for card in &catalog {
        cards.upsert_card(card).await?;
    }
    tracing::info!(cards = catalog.len(), "seed catalog imported");
    Ok(catalog.len())
}
