//! Document model: JSON documents, condition clauses, update operations
//!
//! Conditions and updates address top-level fields only; the engine keeps
//! its documents flat. A `Condition` is the predicate half of the store's
//! atomic conditional update; an `Update` is the mutation half.

use pulse_core::Timestamp;
use serde_json::Value;

/// A stored document
pub type Document = Value;

#[derive(Clone, Debug)]
enum Clause {
    /// Field equals the given value
    Eq(String, Value),
    /// Field is missing or null
    Unset(String),
    /// Field holds a timestamp strictly after the given instant
    TsGt(String, Timestamp),
    /// Field holds a timestamp at or before the given instant
    TsLte(String, Timestamp),
}

/// Conjunction of clauses over one document
///
/// An empty condition matches every existing document.
#[derive(Clone, Debug, Default)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    /// Matches any document
    pub fn any() -> Self {
        Condition::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.clauses.push(Clause::Unset(field.to_string()));
        self
    }

    pub fn ts_gt(mut self, field: &str, after: Timestamp) -> Self {
        self.clauses.push(Clause::TsGt(field.to_string(), after));
        self
    }

    pub fn ts_lte(mut self, field: &str, at_or_before: Timestamp) -> Self {
        self.clauses
            .push(Clause::TsLte(field.to_string(), at_or_before));
        self
    }

    /// Evaluate every clause against the document
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, expected) => doc.get(field) == Some(expected),
            Clause::Unset(field) => match doc.get(field) {
                None => true,
                Some(value) => value.is_null(),
            },
            Clause::TsGt(field, after) => field_ts(doc, field)
                .map(|ts| ts > *after)
                .unwrap_or(false),
            Clause::TsLte(field, bound) => field_ts(doc, field)
                .map(|ts| ts <= *bound)
                .unwrap_or(false),
        })
    }
}

fn field_ts(doc: &Document, field: &str) -> Option<Timestamp> {
    doc.get(field)?.as_i64().map(Timestamp::from_millis)
}

#[derive(Clone, Debug)]
enum UpdateOp {
    Set(String, Value),
    Inc(String, i64),
}

/// Mutation half of a conditional update: field sets and counter increments
#[derive(Clone, Debug, Default)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.to_string(), value.into()));
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(field.to_string(), by));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every operation in order. Non-object documents are untouched.
    pub fn apply(&self, doc: &mut Document) {
        let Some(map) = doc.as_object_mut() else {
            return;
        };
        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    map.insert(field.clone(), value.clone());
                }
                UpdateOp::Inc(field, by) => {
                    let current = map.get(field).and_then(Value::as_i64).unwrap_or(0);
                    map.insert(field.clone(), Value::from(current.saturating_add(*by)));
                }
            }
        }
    }
}
