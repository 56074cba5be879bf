//! Pulse Store - the storage boundary
//!
//! An abstract document store offering geospatial proximity queries and one
//! atomic primitive: the conditional update. That primitive is the engine's
//! sole correctness mechanism for scarce-resource claims; everything else
//! here is plain reads and inserts.
//!
//! `MemoryStore` is a faithful single-process implementation with the same
//! atomicity guarantees, used as the deterministic test double and for
//! single-process deployments.

pub mod document;
pub mod memory;

pub use document::{Condition, Document, Update};
pub use memory::MemoryStore;

use async_trait::async_trait;
use pulse_core::{GeoPoint, PulseResult};

/// The document collections the engine reasons about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Events,
    Collectibles,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Events => "events",
            Collection::Collectibles => "collectibles",
        }
    }

    /// Prefix for store-minted document ids
    pub fn id_prefix(self) -> &'static str {
        match self {
            Collection::Events => "evt",
            Collection::Collectibles => "col",
        }
    }
}

/// The storage boundary consumed by the engine
///
/// Implementations must make `conditional_update` indivisible relative to
/// every other operation on the same document - including other conditional
/// updates issued from other tasks or other processes. No caller holds locks
/// around store calls; the store itself serializes conflicting writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a document, returning the store-minted id.
    ///
    /// The stored document carries its id in the `id` field.
    async fn insert(&self, collection: Collection, document: Document) -> PulseResult<String>;

    /// Point read by id. Diagnostic only; never used to decide correctness.
    async fn get(&self, collection: Collection, id: &str) -> PulseResult<Option<Document>>;

    /// Filtered scan without geo constraints, capped at `limit`.
    async fn find(
        &self,
        collection: Collection,
        filter: &Condition,
        limit: usize,
    ) -> PulseResult<Vec<Document>>;

    /// Geospatial query: documents whose `location` lies within `radius_m`
    /// meters of `center`, matching `filter`, ordered by ascending distance
    /// (ties broken by id), capped at `limit`.
    async fn find_near(
        &self,
        collection: Collection,
        center: GeoPoint,
        radius_m: f64,
        filter: &Condition,
        limit: usize,
    ) -> PulseResult<Vec<Document>>;

    /// THE atomic primitive: check every condition clause against the
    /// document and apply the update only if all hold, in one indivisible
    /// step. Returns the post-update document, or `None` when the id is
    /// unknown or any clause fails.
    ///
    /// Idempotent by construction: re-issuing a condition the update itself
    /// falsified matches nothing and changes nothing.
    async fn conditional_update(
        &self,
        collection: Collection,
        id: &str,
        condition: &Condition,
        update: &Update,
    ) -> PulseResult<Option<Document>>;
}
