//! Store errors.

use confab_protocol::{MessageId, UserId};
use thiserror::Error;

/// Errors from the message store and directory service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Read-state operation on a message id that was never appended.
    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    /// Lookup of a user the directory does not know.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// The backing store is unreachable or rejected the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
