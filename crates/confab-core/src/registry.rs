//! Session registry: one entry per live connection.
//!
//! The registry owns every [`Session`] exclusively; a session is created on
//! connect, destroyed on disconnect, and a reconnect from the same user is
//! a brand-new session.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use confab_protocol::{ServerEvent, UserId};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::broker::{GroupName, RoomBroker};

/// Atomic counter mixed into ids so two sessions created in the same
/// nanosecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An opaque handle for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a fresh session id.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(timestamp.wrapping_add(counter))
    }

    /// Build a session id from a raw value (tests and tooling).
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{:x}", self.0)
    }
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Operation on a session that is already gone. Callers log and move
    /// on; the connection has simply raced its own disconnect.
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Server-side state for one live connection.
#[derive(Debug)]
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Authenticated user, `None` until auth resolves.
    pub user: Option<UserId>,
    /// Groups this session has joined.
    joined: HashSet<GroupName>,
    /// When the connection was registered.
    pub created_at: DateTime<Utc>,
}

/// Tracks every live connection and its group memberships.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    broker: Arc<RoomBroker>,
}

impl SessionRegistry {
    /// Create a registry fanning out through the given broker.
    #[must_use]
    pub fn new(broker: Arc<RoomBroker>) -> Self {
        Self {
            sessions: DashMap::new(),
            broker,
        }
    }

    /// Register a new connection.
    pub fn register(&self, user: Option<UserId>) -> SessionId {
        let id = SessionId::generate();
        self.sessions.insert(
            id,
            Session {
                id,
                user: user.clone(),
                joined: HashSet::new(),
                created_at: Utc::now(),
            },
        );
        debug!(session = %id, user = ?user, "Session registered");
        id
    }

    /// Destroy a session, removing it from every group it joined.
    ///
    /// Group removal is serialized with concurrent fan-out per group, so a
    /// publish observes the membership either before or after the whole
    /// removal, never halfway.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the session is already gone.
    pub fn deregister(&self, id: SessionId) -> Result<(), RegistryError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;

        for group in &session.joined {
            self.broker.unsubscribe(id, group);
        }

        debug!(session = %id, groups = session.joined.len(), "Session deregistered");
        Ok(())
    }

    /// Join a session to a group.
    ///
    /// Membership is idempotent; each call returns a fresh receiver for the
    /// group's event stream.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the session is already gone.
    pub fn join_group(
        &self,
        id: SessionId,
        group: &str,
    ) -> Result<broadcast::Receiver<Arc<ServerEvent>>, RegistryError> {
        let mut session = self.sessions.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        session.joined.insert(group.to_string());
        Ok(self.broker.subscribe(id, group))
    }

    /// Remove a session from a group.
    ///
    /// Leaving a group that was never joined is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the session is already gone.
    pub fn leave_group(&self, id: SessionId, group: &str) -> Result<(), RegistryError> {
        let mut session = self.sessions.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        session.joined.remove(group);
        drop(session); // Release the shard lock before touching the broker
        self.broker.unsubscribe(id, group);
        Ok(())
    }

    /// Current member sessions of a group.
    #[must_use]
    pub fn sessions_in(&self, group: &str) -> Vec<SessionId> {
        self.broker.members(group)
    }

    /// The authenticated user of a session, if any.
    #[must_use]
    pub fn session_user(&self, id: SessionId) -> Option<UserId> {
        self.sessions.get(&id).and_then(|s| s.user.clone())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(RoomBroker::new()))
    }

    #[test]
    fn test_register_deregister() {
        let registry = registry();

        let id = registry.register(Some("alice".to_string()));
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.session_user(id), Some("alice".to_string()));

        registry.deregister(id).unwrap();
        assert_eq!(registry.session_count(), 0);

        // Second deregister: connection already gone
        assert!(matches!(
            registry.deregister(id),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let registry = registry();
        let ghost = SessionId::from_raw(999);

        assert!(matches!(
            registry.join_group(ghost, "g"),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.leave_group(ghost, "g"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_join_leave_idempotent() {
        let registry = registry();
        let id = registry.register(None);

        let _rx1 = registry.join_group(id, "g").unwrap();
        let _rx2 = registry.join_group(id, "g").unwrap();
        assert_eq!(registry.sessions_in("g").len(), 1);

        registry.leave_group(id, "g").unwrap();
        assert!(registry.sessions_in("g").is_empty());

        // Leaving again, or leaving a group never joined, is a no-op
        registry.leave_group(id, "g").unwrap();
        registry.leave_group(id, "other").unwrap();
    }

    #[test]
    fn test_deregister_removes_from_all_groups() {
        let broker = Arc::new(RoomBroker::new());
        let registry = SessionRegistry::new(Arc::clone(&broker));

        let id = registry.register(Some("alice".to_string()));
        let other = registry.register(Some("bob".to_string()));

        let _rx1 = registry.join_group(id, "private:alice:bob").unwrap();
        let _rx2 = registry.join_group(id, "user_list").unwrap();
        let _rx3 = registry.join_group(other, "user_list").unwrap();

        registry.deregister(id).unwrap();

        assert!(registry.sessions_in("private:alice:bob").is_empty());
        assert_eq!(registry.sessions_in("user_list"), vec![other]);
    }

    #[test]
    fn test_session_ids_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }
}
