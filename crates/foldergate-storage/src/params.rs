//! Per-call storage parameters.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use foldergate_core::{ContextId, Session, UserId};

type StateValue = Arc<dyn Any + Send + Sync>;

/// The principal of a storage call plus the transaction state backends attach
/// to it.
///
/// Cloning shares the transaction state, so a clone passed further down the
/// same call joins the transactions already open on it. [`fork`](Self::fork)
/// keeps the principal but starts with empty state; the fan-out executor forks
/// once per task so every task owns its own transaction.
#[derive(Clone)]
pub struct StorageParameters {
    context_id: ContextId,
    user_id: UserId,
    session: Option<Arc<Session>>,
    state: Arc<DashMap<String, StateValue>>,
}

impl StorageParameters {
    /// Parameters for a user acting without a session (admin jobs, migrations).
    pub fn new(context_id: ContextId, user_id: UserId) -> Self {
        Self {
            context_id,
            user_id,
            session: None,
            state: Arc::new(DashMap::new()),
        }
    }

    /// Parameters bound to an active session.
    pub fn for_session(session: Arc<Session>) -> Self {
        Self {
            context_id: session.context_id,
            user_id: session.user_id,
            session: Some(session),
            state: Arc::new(DashMap::new()),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Same principal, fresh transaction state.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            context_id: self.context_id,
            user_id: self.user_id,
            session: self.session.clone(),
            state: Arc::new(DashMap::new()),
        }
    }

    /// Attaches backend state under `key`, returning `false` if the key is
    /// already taken.
    pub fn put_state_if_absent<T: Any + Send + Sync>(&self, key: &str, value: T) -> bool {
        match self.state.entry(key.to_string()) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(Arc::new(value));
                true
            }
        }
    }

    pub fn state<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.state.get(key).map(|entry| Arc::clone(entry.value()))?;
        value.downcast::<T>().ok()
    }

    pub fn take_state<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let (_, value) = self.state.remove(key)?;
        value.downcast::<T>().ok()
    }

    pub fn has_state(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    /// Whether any backend still has state attached, e.g. an unfinished
    /// transaction.
    pub fn has_open_state(&self) -> bool {
        !self.state.is_empty()
    }
}

impl fmt::Debug for StorageParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageParameters")
            .field("context_id", &self.context_id)
            .field("user_id", &self.user_id)
            .field("session", &self.session.as_ref().map(|s| s.id.as_str()))
            .field("open_state", &self.state.len())
            .finish()
    }
}
