//! Projection error types.

use domain::BoxError;
use thiserror::Error;

/// Errors raised while delivering events to targets.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// A target failed to handle an event.
    #[error("{target} failed to handle {event_type} for entityUid {entity_uid}: {source}")]
    Target {
        target: String,
        event_type: &'static str,
        entity_uid: String,
        #[source]
        source: BoxError,
    },
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
