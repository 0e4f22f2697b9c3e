//! # confab-store
//!
//! External collaborator interfaces for the Confab chat engine.
//!
//! The engine never talks to a database directly; it reaches durable state
//! through two narrow async traits:
//!
//! - [`MessageStore`] - append-only chat log with read-state
//! - [`DirectoryService`] - user identity and profile lookup
//!
//! In-memory implementations back the single-process server and the test
//! suite; production deployments implement the same traits over their own
//! storage.

pub mod directory;
pub mod error;
pub mod message;

pub use directory::{DirectoryService, MemoryDirectory};
pub use error::StoreError;
pub use message::{ChatMessage, MemoryMessageStore, MessageStore};
