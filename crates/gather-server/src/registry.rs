//! Concurrent session registry.

use std::sync::Arc;

use dashmap::DashMap;
use gather_net::SessionId;

use crate::ids::SessionIdGenerator;
use crate::session::Session;

/// Maps session ids to live sessions.
///
/// Sessions are created unpublished so the creator can join before anyone
/// else can look the session up.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    ids: SessionIdGenerator,
}

impl SessionRegistry {
    /// Create an empty registry with ids starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry drawing ids from `ids`.
    pub fn with_ids(ids: SessionIdGenerator) -> Self {
        Self {
            sessions: DashMap::new(),
            ids,
        }
    }

    /// Allocate a fresh id and an empty session. The session is not yet
    /// visible to [`lookup`](Self::lookup). `None` once session ids are
    /// exhausted.
    pub fn create_session(&self) -> Option<Arc<Session>> {
        self.ids.next_id().map(|id| Arc::new(Session::new(id)))
    }

    /// Make `session` visible. Publishing an id twice keeps the first entry.
    pub fn publish(&self, session: Arc<Session>) {
        let id = session.id();
        self.sessions.entry(id).or_insert(session);
    }

    /// Find a published session.
    pub fn lookup(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Unpublish `session`, if it is the entry registered under its id.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(&session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Number of published sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are published.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
