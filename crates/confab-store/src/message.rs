//! Durable chat message log.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confab_protocol::{MessageId, UserId};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;

/// One persisted chat message.
///
/// Immutable after append except for the read flag.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Append-only log of chat messages with read-state.
///
/// `list_between` is the reconciliation path for clients that reconnect
/// after missing fan-out.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, returning its store-assigned id.
    async fn append(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError>;

    /// Flip the read flag.
    ///
    /// Returns `Ok(true)` iff the flag newly transitioned; marking an
    /// already-read message again is a no-op reporting `Ok(false)`.
    async fn mark_read(&self, id: MessageId) -> Result<bool, StoreError>;

    /// All messages exchanged between two users, in either direction,
    /// chronological order.
    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, StoreError>;
}

/// In-memory message store for the single-process server and tests.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: DashMap<MessageId, ChatMessage>,
    next_id: AtomicU64,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Fetch one message by id.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<ChatMessage> {
        self.messages.get(&id).map(|m| m.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.messages.insert(
            id,
            ChatMessage {
                id,
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                content: content.to_string(),
                timestamp,
                is_read: false,
            },
        );
        debug!(message = id, sender = %sender, receiver = %receiver, "Message appended");
        Ok(id)
    }

    async fn mark_read(&self, id: MessageId) -> Result<bool, StoreError> {
        let mut message = self
            .messages
            .get_mut(&id)
            .ok_or(StoreError::UnknownMessage(id))?;

        if message.is_read {
            return Ok(false);
        }
        message.is_read = true;
        Ok(true)
    }

    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| {
                (m.sender == a && m.receiver == b) || (m.sender == b && m.receiver == a)
            })
            .map(|m| m.clone())
            .collect();

        messages.sort_by(|x, y| x.timestamp.cmp(&y.timestamp).then(x.id.cmp(&y.id)));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[tokio::test]
    async fn test_append_then_list_between() {
        let store = MemoryMessageStore::new();

        let id = store.append("alice", "bob", "hi", ts(0)).await.unwrap();

        let messages = store.list_between("alice", "bob").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].content, "hi");
        assert!(!messages[0].is_read);
    }

    #[tokio::test]
    async fn test_list_between_is_chronological_both_directions() {
        let store = MemoryMessageStore::new();

        store.append("alice", "bob", "first", ts(0)).await.unwrap();
        store.append("bob", "alice", "second", ts(10)).await.unwrap();
        store.append("alice", "carol", "other pair", ts(5)).await.unwrap();
        store.append("alice", "bob", "third", ts(20)).await.unwrap();

        let contents: Vec<_> = store
            .list_between("bob", "alice")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_mark_read_idempotent() {
        let store = MemoryMessageStore::new();
        let id = store.append("alice", "bob", "hi", ts(0)).await.unwrap();

        assert!(store.mark_read(id).await.unwrap());
        assert!(!store.mark_read(id).await.unwrap());
        assert!(store.get(id).unwrap().is_read);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_message() {
        let store = MemoryMessageStore::new();
        assert!(matches!(
            store.mark_read(404).await,
            Err(StoreError::UnknownMessage(404))
        ));
    }
}
