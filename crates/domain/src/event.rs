//! Domain events and their envelope.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use common::EntityUid;
use event_store::{StoredEvent, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DomainError;

static NEXT_SEQUENCE_NUMBER: AtomicU64 = AtomicU64::new(0);

fn next_sequence_number() -> u64 {
    NEXT_SEQUENCE_NUMBER.fetch_add(1, Ordering::Relaxed)
}

/// The closed set of event kinds of an application.
///
/// Implemented by an enum with one variant per event kind. The default
/// (de)serialization expects the serde layout
/// `#[serde(tag = "type", content = "data")]`: the tag becomes the stored
/// type discriminator and the content becomes the stored payload.
pub trait DomainEvent: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    /// Returns the event kind name.
    fn event_type(&self) -> &'static str;

    /// Historic kinds remain loadable but can no longer be triggered.
    fn is_historic(&self) -> bool {
        false
    }

    /// Serializes the kind-specific payload.
    fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Rebuilds an event kind from its stored type and payload.
    fn from_payload(event_type: &str, payload: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({ "type": event_type, "data": payload }))
    }
}

/// An immutable, versioned fact about one entity.
///
/// Besides the envelope fields, every instance gets a process-local sequence
/// number at construction. It orders events created within one unit of work
/// and is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    entity_uid: EntityUid,
    entity_version: Version,
    timestamp: DateTime<Utc>,
    is_being_replayed: bool,
    sequence_number: u64,
    payload: E,
}

impl<E: DomainEvent> Event<E> {
    /// Creates a live event timestamped now.
    pub fn new(entity_uid: EntityUid, entity_version: Version, payload: E) -> Self {
        Self::from_parts(entity_uid, entity_version, Utc::now(), false, payload)
    }

    fn from_parts(
        entity_uid: EntityUid,
        entity_version: Version,
        timestamp: DateTime<Utc>,
        is_being_replayed: bool,
        payload: E,
    ) -> Self {
        Self {
            entity_uid,
            entity_version,
            timestamp,
            is_being_replayed,
            sequence_number: next_sequence_number(),
            payload,
        }
    }

    pub fn entity_uid(&self) -> &EntityUid {
        &self.entity_uid
    }

    pub fn entity_version(&self) -> Version {
        self.entity_version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_being_replayed(&self) -> bool {
        self.is_being_replayed
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Returns a new event identical to this one but flagged as replayed.
    pub fn replayed(&self) -> Self {
        Self::from_parts(
            self.entity_uid.clone(),
            self.entity_version,
            self.timestamp,
            true,
            self.payload.clone(),
        )
    }

    /// Converts the event into its at-rest representation.
    pub fn to_stored(&self) -> serde_json::Result<StoredEvent> {
        Ok(StoredEvent::new(
            self.entity_uid.clone(),
            self.entity_version,
            self.event_type(),
            self.payload.to_payload()?,
        )
        .with_timestamp(self.timestamp))
    }

    /// Rebuilds a live event from a stored row.
    pub fn from_stored(stored: StoredEvent) -> Result<Self, DomainError> {
        let StoredEvent {
            sequence_number,
            entity_uid,
            entity_version,
            timestamp,
            event_type,
            payload,
        } = stored;

        match E::from_payload(&event_type, payload) {
            Ok(payload) => Ok(Self::from_parts(
                entity_uid,
                entity_version,
                timestamp,
                false,
                payload,
            )),
            Err(source) => Err(DomainError::Deserialization {
                event_type,
                sequence_number,
                entity_uid,
                source,
            }),
        }
    }
}
