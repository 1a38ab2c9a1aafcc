//! Native document ids and lenient id normalization.

use crate::errors::StoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The store's native document id.
///
/// Backed by a time-ordered UUIDv7 so ids sort roughly by creation time.
/// Encodes as `{"$oid": "<32 hex>"}` in extended JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses an id from its hex (or hyphenated) text form.
    pub fn parse_str(s: &str) -> Result<Self, StoreError> {
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|e| StoreError::invalid_document(format!("invalid object id '{s}': {e}")))
    }

    /// Reads an id from `{"$oid": ..}` or a plain string.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse_str(s).ok(),
            Value::Object(map) if map.len() == 1 => map
                .get("$oid")
                .and_then(Value::as_str)
                .and_then(|s| Self::parse_str(s).ok()),
            _ => None,
        }
    }

    /// Renders the canonical extended JSON form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "$oid": self.to_hex() })
    }

    /// Lowercase hex without separators.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        id.to_value()
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("expected object id, got {value}")))
    }
}

/// Converts a value to the store's native id representation.
///
/// - `null` becomes a fresh id.
/// - A string or `{"$oid": ..}` that parses becomes a canonical id.
/// - A malformed scalar is returned unchanged, so downstream lookups simply
///   find nothing.
/// - An array applies the same rule to each element.
#[must_use]
pub fn normalize_id(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(normalize_scalar).collect()),
        other => normalize_scalar(other),
    }
}

fn normalize_scalar(value: &Value) -> Value {
    if value.is_null() {
        return ObjectId::new().to_value();
    }
    ObjectId::from_value(value).map_or_else(|| value.clone(), |id| id.to_value())
}

/// Convenience wrapper over [`normalize_id`] for optional string ids.
#[must_use]
pub fn normalize_str(id: Option<&str>) -> Value {
    match id {
        Some(s) => normalize_id(&Value::String(s.to_string())),
        None => normalize_id(&Value::Null),
    }
}

/// Renders any id value as comparable text.
///
/// Native ids become their hex form, strings stay as they are.
#[must_use]
pub fn id_to_string(value: &Value) -> String {
    if let Some(id) = ObjectId::from_value(value) {
        return id.to_hex();
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
