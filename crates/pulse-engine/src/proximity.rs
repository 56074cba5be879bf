//! Proximity matching between moving clients and active resources
//!
//! Thin, side-effect-free layer over the store's geospatial index. Results
//! come back distance-ordered and already materialized; malformed documents
//! are skipped rather than failing the whole query.

use std::sync::Arc;

use pulse_core::{Collectible, Event, GeoPoint, PulseResult, Timestamp};
use pulse_store::{Collection, Condition, Store};

/// Default search radius in meters (5 km)
pub const DEFAULT_RADIUS_M: f64 = 5_000.0;

/// Response-size cap for a single query
pub const MAX_RESULTS: usize = 20;

/// Radius queries over active events and claimable collectibles
pub struct ProximityMatcher<S> {
    store: Arc<S>,
    radius_m: f64,
    max_results: usize,
}

impl<S> Clone for ProximityMatcher<S> {
    fn clone(&self) -> Self {
        ProximityMatcher {
            store: Arc::clone(&self.store),
            radius_m: self.radius_m,
            max_results: self.max_results,
        }
    }
}

impl<S: Store> ProximityMatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        ProximityMatcher {
            store,
            radius_m: DEFAULT_RADIUS_M,
            max_results: MAX_RESULTS,
        }
    }

    pub fn with_radius(store: Arc<S>, radius_m: f64, max_results: usize) -> Self {
        ProximityMatcher {
            store,
            radius_m,
            max_results,
        }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Active events within the configured radius of `point`
    pub async fn nearby_events(&self, point: GeoPoint) -> PulseResult<Vec<Event>> {
        let filter = Condition::any().eq("status", "active");
        let docs = self
            .store
            .find_near(
                Collection::Events,
                point,
                self.radius_m,
                &filter,
                self.max_results,
            )
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect())
    }

    /// Active, unexpired collectibles within the configured radius of `point`
    pub async fn nearby_collectibles(
        &self,
        point: GeoPoint,
        now: Timestamp,
    ) -> PulseResult<Vec<Collectible>> {
        let filter = Condition::any()
            .eq("is_active", true)
            .ts_gt("expires_at", now);
        let docs = self
            .store
            .find_near(
                Collection::Collectibles,
                point,
                self.radius_m,
                &filter,
                self.max_results,
            )
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect())
    }
}
