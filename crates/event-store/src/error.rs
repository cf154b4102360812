use thiserror::Error;

use crate::EntityUid;

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The store was used before `start` or after `stop`.
    #[error("{store} not started!")]
    NotStarted { store: &'static str },

    /// `start` was called on a store that is already running.
    #[error("{store} already started!")]
    AlreadyStarted { store: &'static str },

    /// An event was rejected by write validation. The whole batch is discarded.
    #[error("{0}")]
    InvalidEvent(String),

    /// A write stream was used after it failed.
    #[error("Write stream is closed after a failed write")]
    StreamClosed,

    /// A stored row could not be turned back into an event.
    #[error(
        "Failed to decode row: the {event_type} event with sequence number {sequence_number} for entityUid {entity_uid}: {source}"
    )]
    RowDecode {
        event_type: String,
        sequence_number: i64,
        entity_uid: EntityUid,
        #[source]
        source: sqlx::Error,
    },

    /// The store could not be configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
