//! Tracks the active session of each thread.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use shardtx_driver::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
struct ActiveSession {
    session_id: Option<Uuid>,
    connection: Option<ConnectionId>,
    in_transaction: bool,
}

/// Registry of the sessions running on each thread.
///
/// Transacters derived from one another share a registry, which is how a
/// transaction started inside another one on the same thread is detected.
/// The entry of a call persists across its attempts so each attempt can
/// tell whether it landed on the physical connection of the previous one.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ThreadId, ActiveSession>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the calling thread is inside a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.sessions
            .lock()
            .get(&thread::current().id())
            .is_some_and(|active| active.in_transaction)
    }

    /// Returns the id of the session active on the calling thread.
    #[must_use]
    pub fn current_session(&self) -> Option<Uuid> {
        self.sessions
            .lock()
            .get(&thread::current().id())
            .and_then(|active| active.session_id)
    }

    /// Registers a new transaction call on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the thread is already inside a transaction.
    pub(crate) fn enter(self: &Arc<Self>) -> CoreResult<RegistryScope> {
        let thread = thread::current().id();
        let mut sessions = self.sessions.lock();
        let previous = sessions.get(&thread).copied();
        if previous.is_some_and(|active| active.in_transaction) {
            return Err(CoreError::illegal_state(
                "attempted to start a nested session",
            ));
        }
        sessions.insert(thread, ActiveSession::default());
        Ok(RegistryScope {
            registry: Arc::clone(self),
            thread,
            previous,
        })
    }

    fn update(&self, thread: ThreadId, f: impl FnOnce(&mut ActiveSession)) {
        f(self.sessions.lock().entry(thread).or_default());
    }
}

/// Registration of one transaction call; undone on drop.
#[derive(Debug)]
pub(crate) struct RegistryScope {
    registry: Arc<SessionRegistry>,
    thread: ThreadId,
    previous: Option<ActiveSession>,
}

impl RegistryScope {
    /// Physical connection used by the previous attempt of this call.
    pub(crate) fn previous_connection(&self) -> Option<ConnectionId> {
        self.registry
            .sessions
            .lock()
            .get(&self.thread)
            .and_then(|active| active.connection)
    }

    /// Marks a session of this call as inside its transaction.
    pub(crate) fn activate(&self, session_id: Uuid, connection: ConnectionId) {
        self.registry.update(self.thread, |active| {
            active.session_id = Some(session_id);
            active.connection = Some(connection);
            active.in_transaction = true;
        });
    }

    /// Marks the session of this call as done with its transaction.
    pub(crate) fn deactivate(&self) {
        self.registry.update(self.thread, |active| {
            active.in_transaction = false;
        });
    }
}

impl Drop for RegistryScope {
    fn drop(&mut self) {
        let mut sessions = self.registry.sessions.lock();
        match self.previous {
            Some(previous) => {
                sessions.insert(self.thread, previous);
            }
            None => {
                sessions.remove(&self.thread);
            }
        }
    }
}
