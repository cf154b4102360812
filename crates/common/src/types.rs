use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static UUID_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]{8}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{12}$")
        .expect("static pattern is valid")
});

/// Identifier of an entity.
///
/// Entity identifiers are opaque strings. New identifiers are generated as
/// lower-case UUIDs, but any string can be wrapped so that malformed ids coming
/// from the outside can reach (and be rejected by) the event store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityUid(String);

impl EntityUid {
    /// Creates a new random entity uid.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the uid looks like a lower-case hyphenated UUID.
    pub fn is_uuid_shaped(&self) -> bool {
        UUID_SHAPE.is_match(&self.0)
    }
}

impl Default for EntityUid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for EntityUid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<String> for EntityUid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntityUid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for EntityUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
