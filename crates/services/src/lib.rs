#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod feedback;
pub mod review_service;
pub mod seed;
pub mod sessions;

pub use tutor_core::Clock;

pub use config::{TurnConfig, TutorConfig};
pub use error::{
    BootstrapError, ConfigError, FailureKind, ReviewServiceError, SeedError, SessionError,
    TurnError, TurnFailure,
};
pub use feedback::{Prompt, RenderInstruction, SpeakingRate};
pub use review_service::{PlannedReview, ReviewService};
pub use sessions::{TurnReply, TutorService};
