//! Session Store
//!
//! Single Source of Truth für den `CallState` eines Anrufs.
//! Updates werden serialisiert (ein Writer); Listener werden synchron nach
//! jedem erfolgreichen Update in Subscription-Reihenfolge aufgerufen.

use super::model::CallState;
use super::patch::CallStatePatch;
use crate::error::CallError;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

type Listener = Arc<dyn Fn(&CallState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Hält genau einen `CallState`
pub struct SessionStore {
    state: RwLock<CallState>,
    /// Serialisiert Updates inklusive Listener-Benachrichtigung
    writer: Mutex<()>,
    listeners: Arc<Mutex<Listeners>>,
}

impl SessionStore {
    /// Erstellt einen Store; der initiale State muss die Invarianten erfüllen
    pub fn new(initial: CallState) -> Result<Self, CallError> {
        initial.validate()?;

        Ok(Self {
            state: RwLock::new(initial),
            writer: Mutex::new(()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        })
    }

    /// Gibt eine Kopie des aktuellen States zurück
    pub fn state(&self) -> CallState {
        self.state.read().clone()
    }

    /// Lesezugriff ohne Kopie
    pub fn with_state<R>(&self, f: impl FnOnce(&CallState) -> R) -> R {
        f(&self.state.read())
    }

    /// Wendet einen flachen Patch an.
    ///
    /// Schlägt fehl, wenn der Status keine legale Transition ist, der State
    /// bereits terminal ist oder die Teilnehmer-Invarianten verletzt würden.
    /// Bei einem Fehler bleibt der State unverändert und kein Listener wird
    /// aufgerufen.
    ///
    /// Listener dürfen selbst kein `update` aufrufen.
    pub fn update(&self, patch: CallStatePatch) -> Result<CallState, CallError> {
        let _writer = self.writer.lock();

        let mut next = self.state.read().clone();
        let current = next.status;

        if current.is_terminal() {
            return Err(CallError::InvalidState(format!(
                "call is already {current}"
            )));
        }

        if let Some(status) = patch.status {
            if status != current {
                current.transition(status)?;
            }
        }

        patch.apply_to(&mut next);
        next.validate()?;

        *self.state.write() = next.clone();

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&next);
        }

        Ok(next)
    }

    /// Registriert einen Listener. Das Droppen der `Subscription` meldet ihn ab.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CallState) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.read())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Handle eines registrierten Listeners
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Meldet den Listener explizit ab
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CallSettings, CallStatus, Participant};

    fn store() -> SessionStore {
        SessionStore::new(CallState::new(
            Participant::local("me", "Alice", "de"),
            CallSettings::default(),
        ))
        .unwrap()
    }

    #[test]
    fn test_listeners_run_in_subscription_order() {
        let store = store();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let _first = store.subscribe(move |s| first_log.lock().push(("first", s.status)));
        let second_log = Arc::clone(&log);
        let _second = store.subscribe(move |s| second_log.lock().push(("second", s.status)));

        store
            .update(CallStatePatch::new().status(CallStatus::Calling))
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                ("first", CallStatus::Calling),
                ("second", CallStatus::Calling)
            ]
        );
    }

    #[test]
    fn test_illegal_transition_leaves_state_untouched() {
        let store = store();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let _sub = store.subscribe(move |_| *counter.lock() += 1);

        let err = store
            .update(
                CallStatePatch::new()
                    .status(CallStatus::Connected)
                    .call_id("call-1"),
            )
            .unwrap_err();

        assert!(err.is_invalid_state());
        let state = store.state();
        assert_eq!(state.status, CallStatus::Idle);
        assert_eq!(state.call_id, None);
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_terminal_state_rejects_updates() {
        let store = store();
        store
            .update(CallStatePatch::new().status(CallStatus::Ringing))
            .unwrap();
        store
            .update(CallStatePatch::new().status(CallStatus::Failed))
            .unwrap();

        let err = store.update(CallStatePatch::new().call_id("x")).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(store.state().call_id, None);
    }

    #[test]
    fn test_removing_local_participant_is_rejected() {
        let store = store();
        let err = store
            .update(CallStatePatch::new().participants(vec![Participant::remote(
                "bob", "Bob", "en",
            )]))
            .unwrap_err();

        assert!(err.is_invalid_state());
        assert!(store.state().local_participant().is_some());
    }

    #[test]
    fn test_same_status_is_not_a_transition() {
        let store = store();
        let state = store
            .update(CallStatePatch::new().status(CallStatus::Idle))
            .unwrap();
        assert_eq!(state.status, CallStatus::Idle);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let store = store();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let sub = store.subscribe(move |_| *counter.lock() += 1);
        assert_eq!(store.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(store.listener_count(), 0);

        store.update(CallStatePatch::new().call_id("call-1")).unwrap();
        assert_eq!(*calls.lock(), 0);
    }
}
