//! # confab-protocol
//!
//! Wire event definitions for the Confab realtime chat engine.
//!
//! Events cross the WebSocket boundary as JSON objects. Inbound events are
//! discriminated by their `message` field, outbound events either mirror the
//! shapes clients already render (chat broadcasts, user lists) or carry an
//! explicit `type` field.
//!
//! ## Event Types
//!
//! - [`ClientEvent`] - events received from a connected client
//! - [`ServerEvent`] - events fanned out to room/group subscribers
//!
//! ## Example
//!
//! ```rust
//! use confab_protocol::ClientEvent;
//!
//! let event = ClientEvent::parse(r#"{"message": "hello there"}"#).unwrap();
//! assert!(matches!(event, ClientEvent::Chat { .. }));
//! ```

pub mod events;

pub use events::{
    ChatBroadcast, ClientEvent, ErrorEvent, ProtocolError, ReadReceipt, ServerEvent, UserEntry,
    UserList, UserStatus, UserStatusUpdate,
};

/// A user identifier.
///
/// Ids are opaque strings with a total order, so both peers of a private
/// room derive the identical room name regardless of who initiates.
pub type UserId = String;

/// A durable message identifier assigned by the message store.
pub type MessageId = u64;
