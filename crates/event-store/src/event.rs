use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EntityUid;

/// Version number of an entity.
///
/// An entity starts at version 0 and every applied event moves it to the
/// event's version, so the first stored event of an entity carries version 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a blank entity.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// An event as it sits in the store.
///
/// The store knows nothing about event kinds: it keeps the entity identity,
/// the version, a timestamp, a type discriminator and an opaque JSON payload.
/// Turning a row back into a typed event is the domain layer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Global storage position, assigned by the store when the event is
    /// committed. `None` for events that have not been stored yet.
    pub sequence_number: Option<i64>,

    /// The entity this event belongs to.
    pub entity_uid: EntityUid,

    /// The version of the entity after this event.
    pub entity_version: Version,

    /// When the event was triggered.
    pub timestamp: DateTime<Utc>,

    /// The event kind (e.g. "AccountOpened").
    pub event_type: String,

    /// Kind-specific payload.
    pub payload: serde_json::Value,
}

impl StoredEvent {
    /// Creates an unsequenced event timestamped now.
    pub fn new(
        entity_uid: EntityUid,
        entity_version: Version,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            sequence_number: None,
            entity_uid,
            entity_version,
            timestamp: Utc::now(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Overrides the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns a copy positioned at `sequence_number`.
    pub(crate) fn sequenced(mut self, sequence_number: i64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn new_stored_event_is_unsequenced() {
        let uid = EntityUid::new();
        let event = StoredEvent::new(
            uid.clone(),
            Version::first(),
            "TestEvent",
            serde_json::json!({"amount": 10}),
        );

        assert_eq!(event.sequence_number, None);
        assert_eq!(event.entity_uid, uid);
        assert_eq!(event.event_type, "TestEvent");
        assert_eq!(event.sequenced(3).sequence_number, Some(3));
    }
}
