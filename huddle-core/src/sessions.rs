//! Session directory: which live connections belong to which user.
//!
//! The fan-out engine only sees the [`SessionDirectory`] trait. [`SessionHub`]
//! is the in-process implementation the server registers WebSocket
//! connections with; each session drains a bounded channel of events.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use huddle_types::{PushEvent, SessionId, UserId};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;

/// Default capacity of a session's outbound queue.
pub const DEFAULT_SESSION_BUFFER: usize = 64;

/// Result of pushing one event to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The session disconnected before the push
    Gone,
    /// The session's queue is full; the event was dropped
    Lagging,
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Live sessions of `user`, possibly none.
    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionId>, StoreError>;

    /// Hand `event` to `session` without waiting on the client.
    async fn push(&self, session: SessionId, event: &PushEvent) -> Result<PushOutcome, StoreError>;
}

/// A registered connection. Dropping the receiver makes later pushes report
/// [`PushOutcome::Gone`].
pub struct Session {
    pub id: SessionId,
    pub user: UserId,
    pub events: mpsc::Receiver<PushEvent>,
}

struct Slot {
    user: UserId,
    tx: mpsc::Sender<PushEvent>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<SessionId, Slot>,
    by_user: HashMap<UserId, BTreeSet<SessionId>>,
}

impl Registry {
    fn remove(&mut self, id: &SessionId) -> Option<UserId> {
        let slot = self.slots.remove(id)?;
        if let Some(ids) = self.by_user.get_mut(&slot.user) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(&slot.user);
            }
        }
        Some(slot.user)
    }
}

pub struct SessionHub {
    buffer: usize,
    registry: RwLock<Registry>,
}

impl SessionHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Register a new connection for `user`.
    pub fn connect(&self, user: UserId) -> Session {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SessionId::random();
        let mut registry = self.registry.write();
        registry.by_user.entry(user.clone()).or_default().insert(id);
        registry.slots.insert(
            id,
            Slot {
                user: user.clone(),
                tx,
            },
        );
        debug!(session = %id, %user, "session connected");
        Session {
            id,
            user,
            events: rx,
        }
    }

    pub fn disconnect(&self, id: &SessionId) {
        if let Some(user) = self.registry.write().remove(id) {
            debug!(session = %id, %user, "session disconnected");
        }
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().slots.len()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.registry.read().by_user.contains_key(user)
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_BUFFER)
    }
}

#[async_trait]
impl SessionDirectory for SessionHub {
    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionId>, StoreError> {
        Ok(self
            .registry
            .read()
            .by_user
            .get(user)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn push(&self, session: SessionId, event: &PushEvent) -> Result<PushOutcome, StoreError> {
        let tx = match self.registry.read().slots.get(&session) {
            Some(slot) => slot.tx.clone(),
            None => return Ok(PushOutcome::Gone),
        };
        match tx.try_send(event.clone()) {
            Ok(()) => Ok(PushOutcome::Delivered),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(PushOutcome::Lagging),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect(&session);
                Ok(PushOutcome::Gone)
            }
        }
    }
}
