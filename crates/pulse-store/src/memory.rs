//! In-process store with real atomicity
//!
//! One mutex over all collections; every `conditional_update` evaluates its
//! condition and applies its update inside a single critical section. That
//! makes this store a faithful single-process substitute for a distributed
//! compare-and-swap document store, and the deterministic double for the
//! concurrency tests.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use pulse_core::{GeoPoint, PulseError, PulseResult};

use crate::document::{Condition, Document, Update};
use crate::{Collection, Store};

#[derive(Default)]
struct Shelves {
    docs: HashMap<Collection, HashMap<String, Document>>,
    seq: u64,
}

/// In-memory `Store` implementation
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Shelves>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of documents in a collection (test/introspection helper)
    pub fn count(&self, collection: Collection) -> usize {
        self.inner
            .lock()
            .docs
            .get(&collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, collection: Collection, mut document: Document) -> PulseResult<String> {
        if !document.is_object() {
            return Err(PulseError::MalformedDocument(
                "insert expects a JSON object".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        // Honor a caller-fixed id, mint one otherwise
        let id = match document.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                inner.seq += 1;
                format!("{}-{}", collection.id_prefix(), inner.seq)
            }
        };

        if let Some(map) = document.as_object_mut() {
            map.insert("id".to_string(), Value::from(id.clone()));
        }
        inner
            .docs
            .entry(collection)
            .or_default()
            .insert(id.clone(), document);

        Ok(id)
    }

    async fn get(&self, collection: Collection, id: &str) -> PulseResult<Option<Document>> {
        let inner = self.inner.lock();
        Ok(inner
            .docs
            .get(&collection)
            .and_then(|shelf| shelf.get(id))
            .cloned())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Condition,
        limit: usize,
    ) -> PulseResult<Vec<Document>> {
        let inner = self.inner.lock();
        let Some(shelf) = inner.docs.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(&String, &Document)> = shelf
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .collect();
        // Deterministic order for a scan without a distance key
        hits.sort_by(|a, b| a.0.cmp(b.0));

        Ok(hits.into_iter().take(limit).map(|(_, d)| d.clone()).collect())
    }

    async fn find_near(
        &self,
        collection: Collection,
        center: GeoPoint,
        radius_m: f64,
        filter: &Condition,
        limit: usize,
    ) -> PulseResult<Vec<Document>> {
        let inner = self.inner.lock();
        let Some(shelf) = inner.docs.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(f64, &String, &Document)> = shelf
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .filter_map(|(id, doc)| {
                let location: GeoPoint =
                    serde_json::from_value(doc.get("location")?.clone()).ok()?;
                let distance = center.distance_m(location);
                (distance <= radius_m).then_some((distance, id, doc))
            })
            .collect();

        // Ascending distance, id tie-break for determinism
        hits.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });

        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(_, _, d)| d.clone())
            .collect())
    }

    async fn conditional_update(
        &self,
        collection: Collection,
        id: &str,
        condition: &Condition,
        update: &Update,
    ) -> PulseResult<Option<Document>> {
        let mut inner = self.inner.lock();
        let Some(doc) = inner
            .docs
            .get_mut(&collection)
            .and_then(|shelf| shelf.get_mut(id))
        else {
            return Ok(None);
        };

        if !condition.matches(doc) {
            return Ok(None);
        }
        update.apply(doc);
        Ok(Some(doc.clone()))
    }
}
