//! Inbound and outbound event shapes.
//!
//! Inbound events all carry a `message` field; two literal values
//! (`"message_read"`, `"user_created"`) act as discriminators and anything
//! else is plain chat text. Outbound events are serialized exactly as the
//! client renders them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MessageId, UserId};

/// Errors raised while parsing an inbound payload.
///
/// A malformed event is never fatal: the handler discards the payload and
/// the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON or not an object.
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload was valid JSON but missed a required field.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Raw inbound shape before discrimination.
#[derive(Debug, Deserialize)]
struct RawClientEvent {
    message: String,
    user: Option<UserId>,
    message_id: Option<MessageId>,
}

/// An event received from a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Plain chat text (`{"message": <text>}`).
    Chat { text: String },

    /// Read acknowledgement for a previously delivered message
    /// (`{"message": "message_read", "message_id": N}`).
    MessageRead { message_id: MessageId },

    /// A new account was created (`{"message": "user_created", "user": <id>}`).
    /// Only meaningful on the status channel.
    UserCreated { user: UserId },
}

impl ClientEvent {
    /// Parse an inbound JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the payload is not a JSON object with a
    /// `message` field, or a discriminated event misses its companion field.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientEvent = serde_json::from_str(payload)?;

        match raw.message.as_str() {
            "message_read" => {
                let message_id = raw
                    .message_id
                    .ok_or(ProtocolError::MissingField("message_id"))?;
                Ok(ClientEvent::MessageRead { message_id })
            }
            "user_created" => {
                let user = raw.user.ok_or(ProtocolError::MissingField("user"))?;
                Ok(ClientEvent::UserCreated { user })
            }
            _ => Ok(ClientEvent::Chat { text: raw.message }),
        }
    }
}

/// A chat message broadcast to a private room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBroadcast {
    /// Message content.
    pub message: String,
    /// Sender display name.
    pub username: String,
    /// Store-assigned id, referenced by read acknowledgements.
    pub message_id: MessageId,
    /// Human-readable send time ("just now", "3 minutes ago", ...).
    pub sent_time: String,
}

/// Read receipt broadcast to a private room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    #[serde(rename = "type")]
    kind: String,
    /// Id of the message that was read.
    pub message_id: MessageId,
}

impl ReadReceipt {
    /// Create a read receipt for a message id.
    #[must_use]
    pub fn new(message_id: MessageId) -> Self {
        Self {
            kind: "chat.read".to_string(),
            message_id,
        }
    }
}

/// One row of the global user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: UserId,
    pub username: String,
    pub is_online: bool,
    /// Bucketed last-seen text ("just now", "yesterday", an absolute date).
    pub last_seen: String,
}

/// Full presence snapshot for the status channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    pub user_list: Vec<UserEntry>,
}

/// Minimal status row used by incremental updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    pub id: UserId,
    pub username: String,
    pub online: bool,
}

/// Incremental status update, avoiding a full list recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatusUpdate {
    #[serde(rename = "type")]
    kind: String,
    pub users: Vec<UserStatus>,
}

impl UserStatusUpdate {
    /// Create an incremental update for the given users.
    #[must_use]
    pub fn new(users: Vec<UserStatus>) -> Self {
        Self {
            kind: "user_status_update".to_string(),
            users,
        }
    }
}

/// An error surfaced to a single client, never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(rename = "type")]
    kind: String,
    pub reason: String,
}

impl ErrorEvent {
    /// Create an error event with a machine-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            reason: reason.into(),
        }
    }

    /// The message store rejected a persist; the sender should retry.
    #[must_use]
    pub fn persist_failed() -> Self {
        Self::new("persist_failed")
    }
}

/// An event fanned out to room/group subscribers or sent to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEvent {
    Chat(ChatBroadcast),
    Read(ReadReceipt),
    UserList(UserList),
    StatusUpdate(UserStatusUpdate),
    Error(ErrorEvent),
}

impl ServerEvent {
    /// Serialize to the JSON text sent over the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (practically unreachable for
    /// these shapes).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_chat_text() {
        let event = ClientEvent::parse(r#"{"message": "hi there"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Chat {
                text: "hi there".to_string()
            }
        );
    }

    #[test]
    fn test_parse_message_read() {
        let event = ClientEvent::parse(r#"{"message": "message_read", "message_id": 42}"#).unwrap();
        assert_eq!(event, ClientEvent::MessageRead { message_id: 42 });

        // Discriminator without its companion field
        assert!(matches!(
            ClientEvent::parse(r#"{"message": "message_read"}"#),
            Err(ProtocolError::MissingField("message_id"))
        ));
    }

    #[test]
    fn test_parse_user_created() {
        let event = ClientEvent::parse(r#"{"message": "user_created", "user": "u7"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::UserCreated {
                user: "u7".to_string()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(ClientEvent::parse("not json").is_err());
        assert!(ClientEvent::parse(r#"{"no_message": 1}"#).is_err());
        assert!(ClientEvent::parse("[1, 2]").is_err());
    }

    #[test]
    fn test_chat_broadcast_shape() {
        let event = ServerEvent::Chat(ChatBroadcast {
            message: "hi".to_string(),
            username: "Alice".to_string(),
            message_id: 7,
            sent_time: "just now".to_string(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "message": "hi",
                "username": "Alice",
                "message_id": 7,
                "sent_time": "just now"
            })
        );
    }

    #[test]
    fn test_read_receipt_shape() {
        let value = serde_json::to_value(ServerEvent::Read(ReadReceipt::new(42))).unwrap();
        assert_eq!(value, json!({"type": "chat.read", "message_id": 42}));
    }

    #[test]
    fn test_user_list_shape() {
        let event = ServerEvent::UserList(UserList {
            user_list: vec![UserEntry {
                id: "u1".to_string(),
                username: "Alice".to_string(),
                is_online: true,
                last_seen: "just now".to_string(),
            }],
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "user_list": [{
                    "id": "u1",
                    "username": "Alice",
                    "is_online": true,
                    "last_seen": "just now"
                }]
            })
        );
    }

    #[test]
    fn test_status_update_shape() {
        let event = ServerEvent::StatusUpdate(UserStatusUpdate::new(vec![UserStatus {
            id: "u9".to_string(),
            username: "Bob".to_string(),
            online: true,
        }]));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "user_status_update",
                "users": [{"id": "u9", "username": "Bob", "online": true}]
            })
        );
    }

    #[test]
    fn test_error_event_shape() {
        let value = serde_json::to_value(ServerEvent::Error(ErrorEvent::persist_failed())).unwrap();
        assert_eq!(value, json!({"type": "error", "reason": "persist_failed"}));
    }
}
