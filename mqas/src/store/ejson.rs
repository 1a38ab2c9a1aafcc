//! Extended JSON encoding for store-native types.
//!
//! Canonical forms written by this crate:
//!
//! | type | encoding |
//! |---|---|
//! | [`ObjectId`](super::ObjectId) | `{"$oid": "<32 hex>"}` |
//! | [`ExtDateTime`] | `{"$date": "2024-01-01T00:00:00.000Z"}` |
//!
//! The decoder also accepts the relaxed forms `{"$date": <millis>}`,
//! `{"$date": {"$numberLong": ".."}}`, `{"$numberLong": ".."}`,
//! `{"$numberInt": ".."}` and `{"$numberDouble": ".."}`.

use super::ObjectId;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

/// A UTC timestamp stored with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtDateTime(DateTime<Utc>);

impl ExtDateTime {
    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_chrono(Utc::now())
    }

    /// `now + ttl`, the usual way to compute an `expireAt`.
    #[must_use]
    pub fn after(ttl: Duration) -> Self {
        let delta = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self::from_chrono(Utc::now() + delta)
    }

    /// Wraps a chrono timestamp, truncating to milliseconds.
    #[must_use]
    pub fn from_chrono(at: DateTime<Utc>) -> Self {
        Self::from_millis(at.timestamp_millis()).unwrap_or(Self(at))
    }

    /// Builds a timestamp from Unix epoch milliseconds.
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Reads a date from any accepted `$date` form.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let inner = value.as_object().filter(|m| m.len() == 1)?.get("$date")?;
        match inner {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| Self::from_chrono(dt.with_timezone(&Utc))),
            Value::Number(n) => n.as_i64().and_then(Self::from_millis),
            Value::Object(_) => number_long(inner).and_then(Self::from_millis),
            _ => None,
        }
    }

    /// Renders the canonical extended JSON form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "$date": self.0.to_rfc3339_opts(SecondsFormat::Millis, true) })
    }
}

impl From<ExtDateTime> for Value {
    fn from(at: ExtDateTime) -> Self {
        at.to_value()
    }
}

impl Serialize for ExtDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExtDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("expected extended JSON date, got {value}")))
    }
}

fn number_long(value: &Value) -> Option<i64> {
    value
        .as_object()
        .filter(|m| m.len() == 1)?
        .get("$numberLong")?
        .as_str()?
        .parse()
        .ok()
}

/// Rewrites relaxed extended JSON wrappers into canonical form, recursively.
///
/// Unknown `$`-prefixed objects are left untouched.
#[must_use]
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => canonicalize_object(map),
        other => other,
    }
}

fn canonicalize_object(map: Map<String, Value>) -> Value {
    if map.len() == 1 {
        if let Some(value) = canonical_wrapper(&map) {
            return value;
        }
    }
    Value::Object(map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect())
}

fn canonical_wrapper(map: &Map<String, Value>) -> Option<Value> {
    let (key, inner) = map.iter().next()?;
    match key.as_str() {
        "$oid" => ObjectId::from_value(inner).map(|id| id.to_value()),
        "$date" => ExtDateTime::from_value(&Value::Object(map.clone())).map(|at| at.to_value()),
        "$numberLong" | "$numberInt" => inner.as_str()?.parse::<i64>().ok().map(Value::from),
        "$numberDouble" => inner
            .as_str()?
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

/// Parses a JSON document and canonicalizes extended JSON wrappers.
pub fn decode_str(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str::<Value>(text).map(canonicalize)
}

/// Parses a JSON document into `T` after canonicalizing it.
pub fn decode_as<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_value(decode_str(text)?)
}

/// Serializes a value; native types already emit their canonical wrappers.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}
