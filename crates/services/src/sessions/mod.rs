mod controller;
mod registry;

// Public API of the session subsystem.
pub use crate::error::{SessionError, TurnFailure};
pub use controller::{TurnReply, TutorService};
