//! Equality/membership filters over documents.

use serde_json::{Map, Value};

/// A schema-less document.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Clause {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(field, expected) => doc.get(field).is_some_and(|v| values_equal(v, expected)),
            Self::In(field, candidates) => doc
                .get(field)
                .is_some_and(|v| candidates.iter().any(|c| values_equal(v, c))),
        }
    }
}

/// Numbers compare by value so `1` matches `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// A conjunction of field clauses.
///
/// A clause on a field the document lacks never matches. An empty filter
/// matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the document with the given `_id`.
    #[must_use]
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::new().eq("_id", id)
    }

    /// Adds a `field == value` clause.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.into(), value.into()));
        self
    }

    /// Adds a `field in values` clause.
    #[must_use]
    pub fn is_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.clauses
            .push(Clause::In(field.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Tests a document against every clause.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }

    /// Returns true if the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_requires_field_present() {
        let filter = Filter::new().eq("is_locked", false);

        assert!(filter.matches(&doc(json!({ "is_locked": false }))));
        assert!(!filter.matches(&doc(json!({ "is_locked": true }))));
        assert!(!filter.matches(&doc(json!({}))));
    }

    #[test]
    fn test_in_clause() {
        let filter = Filter::new().eq("is_reservation", true).is_in("worker_id", ["a", "b"]);

        assert!(filter.matches(&doc(json!({ "is_reservation": true, "worker_id": "b" }))));
        assert!(!filter.matches(&doc(json!({ "is_reservation": true, "worker_id": "c" }))));
        assert!(!filter.matches(&doc(json!({ "worker_id": "a" }))));
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let filter = Filter::new().is_in("worker_id", Vec::<Value>::new());
        assert!(!filter.matches(&doc(json!({ "worker_id": "a" }))));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let filter = Filter::new().eq("ram", 512);
        assert!(filter.matches(&doc(json!({ "ram": 512.0 }))));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(Filter::new().matches(&doc(json!({ "x": 1 }))));
        assert!(Filter::new().is_empty());
    }
}
