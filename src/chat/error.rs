// Error taxonomy for the chat core

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by chat operations
#[derive(Debug, Error)]
pub enum ChatError {
    /// Inbound message rejected before it reached the store
    #[error("invalid message: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Only ever produced for single-connection sends (history replay)
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Failures of the underlying message store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored message {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("message store lock poisoned")]
    Poisoned,
}

/// Failure to hand an event to one connection
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    Closed(Uuid),

    #[error("connection {0} did not accept the event within {1:?}")]
    TimedOut(Uuid, Duration),
}

impl DeliveryError {
    pub fn connection_id(&self) -> Uuid {
        match self {
            DeliveryError::Closed(id) | DeliveryError::TimedOut(id, _) => *id,
        }
    }
}
