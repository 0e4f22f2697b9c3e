//! Presence tracking.
//!
//! Online status is strictly derived: a user is online iff at least one
//! live session exists for them. The last-online timestamp is stamped when
//! the last session goes away, never stored as a separate boolean.

use chrono::{DateTime, Utc};
use confab_protocol::{UserEntry, UserId};
use dashmap::DashMap;
use tracing::debug;

use crate::timefmt;

/// Presence state for a single user.
#[derive(Debug)]
struct PresenceRecord {
    display_name: String,
    /// Live session count; online iff > 0.
    live_sessions: usize,
    /// When the last live session went away. `None` = never seen.
    last_online: Option<DateTime<Utc>>,
}

/// Computes and snapshots online/offline/last-seen transitions.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: DashMap<UserId, PresenceRecord>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a user without any live session (a freshly created account),
    /// so the next full snapshot includes them. No-op if already tracked.
    pub fn register_user(&self, user: impl Into<UserId>, display_name: impl Into<String>) {
        self.records
            .entry(user.into())
            .or_insert_with(|| PresenceRecord {
                display_name: display_name.into(),
                live_sessions: 0,
                last_online: None,
            });
    }

    /// Record a live session for a user.
    ///
    /// The display name is captured here so snapshots never need a
    /// directory lookup.
    pub fn mark_online(&self, user: impl Into<UserId>, display_name: impl Into<String>) {
        let user = user.into();
        let mut record = self
            .records
            .entry(user.clone())
            .or_insert_with(|| PresenceRecord {
                display_name: display_name.into(),
                live_sessions: 0,
                last_online: None,
            });
        record.live_sessions += 1;
        debug!(user = %user, sessions = record.live_sessions, "Presence: online");
    }

    /// Record a session going away for a user.
    ///
    /// When the last session disappears the last-online timestamp is
    /// stamped with `now`. Unknown users are ignored.
    pub fn mark_offline(&self, user: &str, now: DateTime<Utc>) {
        if let Some(mut record) = self.records.get_mut(user) {
            record.live_sessions = record.live_sessions.saturating_sub(1);
            if record.live_sessions == 0 {
                record.last_online = Some(now);
                debug!(user = %user, "Presence: offline");
            }
        }
    }

    /// Whether any live session exists for a user.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.records
            .get(user)
            .map(|r| r.live_sessions > 0)
            .unwrap_or(false)
    }

    /// Number of users currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.records.iter().filter(|r| r.live_sessions > 0).count()
    }

    /// Full presence snapshot, most-recent-online first.
    ///
    /// Online users sort before everyone else (their recency is `now`),
    /// ties break by ascending user id, never-seen users come last.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<UserEntry> {
        let mut rows: Vec<(Option<DateTime<Utc>>, UserEntry)> = self
            .records
            .iter()
            .map(|entry| {
                let online = entry.live_sessions > 0;
                let recency = if online { Some(now) } else { entry.last_online };
                let row = UserEntry {
                    id: entry.key().clone(),
                    username: entry.display_name.clone(),
                    is_online: online,
                    last_seen: timefmt::last_seen_text(recency, now),
                };
                (recency, row)
            })
            .collect();

        rows.sort_by(|(ra, a), (rb, b)| rb.cmp(ra).then_with(|| a.id.cmp(&b.id)));
        rows.into_iter().map(|(_, row)| row).collect()
    }
}
