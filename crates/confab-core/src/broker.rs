//! Room broker: deterministic room naming and per-group fan-out.
//!
//! Groups are named broadcast channels with dynamic session membership.
//! Delivery is best-effort and fire-and-forget; ordering is per-publisher
//! FIFO within a single group.

use std::collections::HashSet;
use std::sync::Arc;

use confab_protocol::ServerEvent;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::registry::SessionId;

/// A group identifier.
pub type GroupName = String;

/// The single global presence group.
pub const STATUS_GROUP: &str = "user_list";

/// Default per-group broadcast capacity.
const DEFAULT_GROUP_CAPACITY: usize = 1024;

/// Compute the room name for a private chat between two users.
///
/// The name is identical regardless of which peer initiates:
/// the lower id (string order) always comes first.
#[must_use]
pub fn room_name(a: &str, b: &str) -> GroupName {
    if a <= b {
        format!("private:{a}:{b}")
    } else {
        format!("private:{b}:{a}")
    }
}

/// A single broadcast group.
struct Group {
    sender: broadcast::Sender<Arc<ServerEvent>>,
    members: HashSet<SessionId>,
}

impl Group {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: HashSet::new(),
        }
    }
}

/// The central fan-out table, mapping group names to subscriber sessions.
///
/// Groups are created on first join and deleted when the last member
/// leaves. Mutation is serialized per group (sharded locks); fan-out to
/// one group never blocks unrelated groups.
pub struct RoomBroker {
    groups: DashMap<GroupName, Group>,
    capacity: usize,
}

impl RoomBroker {
    /// Create a broker with the default per-group capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_GROUP_CAPACITY)
    }

    /// Create a broker with a specific per-group broadcast capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            groups: DashMap::new(),
            capacity,
        }
    }

    /// Add a session to a group, creating the group on first join.
    ///
    /// Membership is idempotent; each call returns a fresh receiver for the
    /// group's event stream.
    pub fn subscribe(
        &self,
        session_id: SessionId,
        group: &str,
    ) -> broadcast::Receiver<Arc<ServerEvent>> {
        let mut entry = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| {
                debug!(group = %group, "Creating group");
                Group::new(self.capacity)
            });

        entry.members.insert(session_id);
        debug!(group = %group, session = %session_id, members = entry.members.len(), "Joined group");
        entry.sender.subscribe()
    }

    /// Remove a session from a group.
    ///
    /// Returns `true` if the session was a member. Removing a session that
    /// never joined is a no-op. The group is deleted once empty.
    pub fn unsubscribe(&self, session_id: SessionId, group: &str) -> bool {
        let removed = if let Some(mut entry) = self.groups.get_mut(group) {
            let removed = entry.members.remove(&session_id);
            if entry.members.is_empty() {
                drop(entry); // Release the shard lock
                self.groups.remove(group);
                debug!(group = %group, "Deleted empty group");
            }
            removed
        } else {
            false
        };

        if removed {
            debug!(group = %group, session = %session_id, "Left group");
        }
        removed
    }

    /// Get the current member sessions of a group.
    #[must_use]
    pub fn members(&self, group: &str) -> Vec<SessionId> {
        self.groups
            .get(group)
            .map(|g| g.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Publish an event to every session in a group.
    ///
    /// Returns the number of recipients. Publishing to an unknown or empty
    /// group delivers nothing and returns 0; the publisher does not need to
    /// be a member.
    pub fn publish(&self, group: &str, event: ServerEvent) -> usize {
        if let Some(entry) = self.groups.get(group) {
            let count = entry.sender.send(Arc::new(event)).unwrap_or(0);
            trace!(group = %group, recipients = count, "Published event");
            count
        } else {
            trace!(group = %group, "Publish to unknown group");
            0
        }
    }

    /// Check whether a group currently exists.
    #[must_use]
    pub fn group_exists(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Number of live groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl Default for RoomBroker {
    fn default() -> Self {
        Self::new()
    }
}
