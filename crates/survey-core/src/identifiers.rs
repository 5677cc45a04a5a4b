use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::EntityKind;

/// Every id minted on the device starts with this prefix; server ids never do.
pub const LOCAL_ID_PREFIX: &str = "local_";

static LOCAL_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of a survey record, either device-local or issued by the server.
///
/// Server ids are opaque; the current backend issues integers, so an id whose text is a
/// canonical integer goes over the wire as a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        is_local_id(&self.0)
    }

    pub fn as_integer(&self) -> Option<i64> {
        let value = self.0.parse::<i64>().ok()?;
        (value.to_string() == self.0).then_some(value)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_integer() {
            Some(value) => serializer.serialize_i64(value),
            None => serializer.serialize_str(&self.0),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecordId {
    Integer(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRecordId::deserialize(deserializer)?;
        let id = match raw {
            RawRecordId::Integer(value) => Self::from(value),
            RawRecordId::Text(value) => Self(value),
        };
        if id.0.trim().is_empty() {
            return Err(serde::de::Error::custom("record id must not be empty"));
        }
        Ok(id)
    }
}

pub fn is_local_id(value: &str) -> bool {
    value.starts_with(LOCAL_ID_PREFIX)
}

/// Mints a device-local id: `local_<kind>_<millis><seq>_<nonce>`.
///
/// The per-process sequence keeps ids minted within one millisecond apart, and the random
/// nonce keeps them apart across restarts and clock adjustments.
pub fn generate_local_id(kind: EntityKind) -> RecordId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = LOCAL_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    RecordId(format!(
        "{LOCAL_ID_PREFIX}{}_{millis}{sequence:04}_{}",
        kind.as_str(),
        &nonce[..12]
    ))
}
