//! # confab-core
//!
//! Session registry, room broker, and presence tracking for the Confab
//! realtime chat engine.
//!
//! This crate provides the concurrency-coordinated heart of the system:
//!
//! - **Registry** - tracks live sessions and which groups they joined
//! - **Broker** - deterministic room naming and per-group message fan-out
//! - **Presence** - derives online/offline status from live sessions
//! - **Timefmt** - the shared human-readable timestamp buckets
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Registry   │────▶│   Broker    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Presence   │
//!                     └─────────────┘
//! ```

pub mod broker;
pub mod presence;
pub mod registry;
pub mod timefmt;

pub use broker::{room_name, GroupName, RoomBroker, STATUS_GROUP};
pub use presence::PresenceTracker;
pub use registry::{RegistryError, Session, SessionId, SessionRegistry};
