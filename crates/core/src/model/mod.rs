mod card;
mod ids;
mod learner;
mod review;
mod session;
mod stage;
mod utterance;

pub use ids::{CardId, LearnerId, ParseIdError, SessionId};

pub use card::{Card, CardDraft, CardError};
pub use learner::{Learner, LearnerError, Proficiency, Skill, SkillCounter, SkillTally};
pub use review::{ReviewGrade, ReviewKey, ReviewState, ReviewStateError};
pub use session::{EndReason, SessionRecord, SessionRecordError};
pub use stage::{LessonStage, ParseStageError};
pub use utterance::Utterance;
