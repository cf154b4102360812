//! Domain error types.

use common::EntityUid;
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Boxed error for failures coming from application code (handlers, sagas,
/// projections) that the runtime only needs to report.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A command failed its own validation and was never queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    /// Creates a validation error with a single message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Joins several failure messages into one error.
    pub fn from_failures<I, S>(failures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let messages: Vec<String> = failures
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self(messages.join(", "))
    }
}

/// Violations of the entity contract.
///
/// These are programming errors in the calling code; a command that hits one
/// fails and is not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// The event targets another entity.
    #[error("Event Entity UID property must match entity UID (entity {expected}, event {actual})")]
    UidMismatch {
        expected: EntityUid,
        actual: EntityUid,
    },

    /// The event does not directly follow the entity's current version.
    #[error("Event version ({actual}) should be exactly {expected} (entity version {current})")]
    VersionMismatch {
        current: Version,
        expected: Version,
        actual: Version,
    },

    /// A stored event is not newer than the entity it is applied to.
    #[error("Event version ({actual}) must exceed the entity version ({current})")]
    StaleVersion { current: Version, actual: Version },

    /// Historic event kinds can still be loaded but never triggered again.
    #[error("{0} is an historic event which means it cannot be triggered anymore.")]
    HistoricEvent(&'static str),
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A command failed validation before being queued.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No handler is registered for the command kind.
    #[error("Command handler for command \"{0}\" not found")]
    CommandHandlerNotFound(&'static str),

    /// Rehydration found no events for the uid.
    #[error("No events found for entityUid \"{0}\"")]
    NoSuchEntity(EntityUid),

    /// An error occurred in the event store (write validation, I/O, ...).
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A stored event could not be turned back into its event kind.
    #[error(
        "{source} - The {event_type} event with sequence number {sequence_number:?} for entityUid {entity_uid} could not be deserialized"
    )]
    Deserialization {
        event_type: String,
        sequence_number: Option<i64>,
        entity_uid: EntityUid,
        #[source]
        source: serde_json::Error,
    },

    /// An entity rejected an event.
    #[error("Entity invariant violated: {0}")]
    EntityInvariant(#[from] EntityError),

    /// A uid was loaded as a different entity kind than the one cached for it.
    #[error("Entity {entity_uid} is not a {expected}")]
    EntityKindMismatch {
        entity_uid: EntityUid,
        expected: &'static str,
    },

    /// An event payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The command bus worker is gone.
    #[error("Command bus is closed")]
    CommandBusClosed,

    /// The command was dropped before it reported an outcome.
    #[error("Command {0} was abandoned before completing")]
    CommandAbandoned(uuid::Uuid),

    /// A command handler failed with an application error.
    #[error("Command handler failed: {0}")]
    Handler(#[source] BoxError),
}

impl DomainError {
    /// Wraps an application error raised inside a command handler.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        DomainError::Handler(err.into())
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_joins_failures() {
        let err = ValidationError::from_failures(["name is required", "amount must be positive"]);
        assert_eq!(err.to_string(), "name is required, amount must be positive");
    }

    #[test]
    fn no_such_entity_mentions_the_uid() {
        let uid = EntityUid::new();
        let err = DomainError::NoSuchEntity(uid.clone());
        assert!(err.to_string().contains(uid.as_str()));
    }

    #[test]
    fn handler_not_found_names_the_command() {
        let err = DomainError::CommandHandlerNotFound("OpenAccount");
        assert_eq!(
            err.to_string(),
            "Command handler for command \"OpenAccount\" not found"
        );
    }
}
