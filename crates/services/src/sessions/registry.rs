use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tutor_core::model::{LearnerId, SessionId};
use tutor_core::progression::SessionState;

enum SessionSlot {
    Idle(Box<SessionState>),
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckoutError {
    Missing,
    Busy,
}

/// Live sessions of this process.
///
/// A session is checked out for the duration of a turn; a second checkout
/// of the same session fails with `Busy` until the first one is returned.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    slots: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl SessionRegistry {
    fn slots(&self) -> MutexGuard<'_, HashMap<SessionId, SessionSlot>> {
        // Slots hold no invariant a panicking holder could break halfway.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, state: SessionState) {
        self.slots()
            .insert(state.id(), SessionSlot::Idle(Box::new(state)));
    }

    /// Take a session for one turn, returning the hold and a working copy.
    pub(crate) fn checkout(
        self: &Arc<Self>,
        id: SessionId,
    ) -> Result<(Checkout, SessionState), CheckoutError> {
        let mut slots = self.slots();
        match slots.insert(id, SessionSlot::InFlight) {
            Some(SessionSlot::Idle(state)) => {
                let working = state.as_ref().clone();
                let hold = Checkout {
                    registry: Arc::clone(self),
                    id,
                    fallback: Some(*state),
                };
                Ok((hold, working))
            }
            Some(SessionSlot::InFlight) => Err(CheckoutError::Busy),
            None => {
                slots.remove(&id);
                Err(CheckoutError::Missing)
            }
        }
    }

    /// Copy of an idle session's state.
    pub(crate) fn snapshot(&self, id: SessionId) -> Option<SessionState> {
        match self.slots().get(&id) {
            Some(SessionSlot::Idle(state)) => Some(state.as_ref().clone()),
            _ => None,
        }
    }

    /// Idle sessions of a learner.
    pub(crate) fn sessions_of(&self, learner_id: LearnerId) -> Vec<SessionId> {
        self.slots()
            .iter()
            .filter_map(|(id, slot)| match slot {
                SessionSlot::Idle(state) if state.learner_id() == learner_id => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }
}

/// Exclusive hold on one session.
///
/// Dropping it without [`Checkout::commit`] or [`Checkout::remove`] puts the
/// fallback state back, so a cancelled turn leaves the session as it was
/// before the turn (or as of the last [`Checkout::advance`]).
pub(crate) struct Checkout {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    fallback: Option<SessionState>,
}

impl Checkout {
    /// Move the fallback forward once part of a turn is durable.
    pub(crate) fn advance(&mut self, state: SessionState) {
        self.fallback = Some(state);
    }

    pub(crate) fn commit(mut self, state: SessionState) {
        self.fallback = None;
        self.registry
            .slots()
            .insert(self.id, SessionSlot::Idle(Box::new(state)));
    }

    pub(crate) fn remove(mut self) {
        self.fallback = None;
        self.registry.slots().remove(&self.id);
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(state) = self.fallback.take() {
            tracing::debug!(session_id = %self.id, "restoring session after an unfinished turn");
            self.registry
                .slots()
                .insert(self.id, SessionSlot::Idle(Box::new(state)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::model::LessonStage;
    use tutor_core::progression::ProgressionConfig;
    use tutor_core::time::fixed_now;

    fn state(learner: u64) -> SessionState {
        SessionState::new(
            SessionId::generate(),
            LearnerId::new(learner),
            LessonStage::Onboarding,
            ProgressionConfig::default(),
            fixed_now(),
        )
    }

    #[test]
    fn second_checkout_is_busy() {
        let registry = Arc::new(SessionRegistry::default());
        let s = state(1);
        let id = s.id();
        registry.insert(s);

        let (held, _) = registry.checkout(id).unwrap();
        assert_eq!(registry.checkout(id).err(), Some(CheckoutError::Busy));
        assert!(registry.snapshot(id).is_none());
        drop(held);
        assert!(registry.checkout(id).is_ok());
    }

    #[test]
    fn dropped_checkout_restores_the_fallback() {
        let registry = Arc::new(SessionRegistry::default());
        let original = state(1);
        let id = original.id();
        registry.insert(original.clone());

        let (mut held, mut advanced) = registry.checkout(id).unwrap();
        assert_eq!(advanced, original);
        advanced.record_unscored_turn();
        held.advance(advanced.clone());
        drop(held);

        assert_eq!(registry.snapshot(id), Some(advanced));
    }

    #[test]
    fn missing_sessions_leave_no_trace() {
        let registry = Arc::new(SessionRegistry::default());
        assert_eq!(
            registry.checkout(SessionId::generate()).err(),
            Some(CheckoutError::Missing)
        );
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn removal_and_lookup_by_learner() {
        let registry = Arc::new(SessionRegistry::default());
        let a = state(1);
        let b = state(2);
        let a_id = a.id();
        registry.insert(a);
        registry.insert(b);

        assert_eq!(registry.sessions_of(LearnerId::new(1)), vec![a_id]);
        registry.checkout(a_id).unwrap().0.remove();
        assert!(registry.sessions_of(LearnerId::new(1)).is_empty());
        assert_eq!(registry.len(), 1);
    }
}
