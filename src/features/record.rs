//! Typed key-value lookup over a single window record.

use std::collections::{BTreeMap, HashMap};

/// Outcome of looking up one column in a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Number(f64),
    Missing,
    Invalid(String),
}

/// Anything that can answer "what is the value of column X" for one window.
pub trait RecordLookup {
    fn field(&self, column: &str) -> Field;

    /// Identifier used in error messages (row id, ip, ...).
    fn record_id(&self) -> String {
        "input".to_string()
    }
}

impl RecordLookup for HashMap<String, f64> {
    fn field(&self, column: &str) -> Field {
        self.get(column).copied().map_or(Field::Missing, Field::Number)
    }
}

impl RecordLookup for BTreeMap<String, f64> {
    fn field(&self, column: &str) -> Field {
        self.get(column).copied().map_or(Field::Missing, Field::Number)
    }
}

impl RecordLookup for serde_json::Map<String, serde_json::Value> {
    fn field(&self, column: &str) -> Field {
        match self.get(column) {
            None | Some(serde_json::Value::Null) => Field::Missing,
            Some(serde_json::Value::Bool(b)) => Field::Number(if *b { 1.0 } else { 0.0 }),
            Some(serde_json::Value::Number(n)) => match n.as_f64() {
                Some(v) => Field::Number(v),
                None => Field::Invalid(format!("{} is not representable as f64", n)),
            },
            Some(other) => Field::Invalid(format!("got {}", json_kind(other))),
        }
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Record wrapper that overrides the identifier reported in errors.
pub struct Identified<'a, R: ?Sized> {
    pub id: String,
    pub inner: &'a R,
}

impl<R: RecordLookup + ?Sized> RecordLookup for Identified<'_, R> {
    fn field(&self, column: &str) -> Field {
        self.inner.field(column)
    }

    fn record_id(&self) -> String {
        self.id.clone()
    }
}
