//! Lifecycle scheduler - drop duty and sweep duty
//!
//! Two independent recurring tasks. The drop duty seeds new collectibles
//! into busy events; the sweep duty deactivates expired ones with the same
//! conditional-update discipline the claim resolver uses, so a sweep and a
//! claim can never both land on one collectible. A failed cycle is logged
//! and skipped; the next tick proceeds on schedule.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;

use pulse_core::{
    Collectible, CollectibleId, Event, PulseError, PulseResult, Rarity, ServerNotice, Timestamp,
};
use pulse_registry::ConnectionRegistry;
use pulse_store::{Collection, Condition, Store, Update};

/// Scheduler tuning
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Cadence of the drop duty
    pub drop_interval: Duration,
    /// Cadence of the expiry sweep
    pub sweep_interval: Duration,
    /// Per-event probability of a drop each cycle, in [0, 1]
    pub drop_chance: f64,
    /// Events with fewer live subscribers than this get no drops
    pub min_participants: usize,
    /// Maximum meter offset of a drop from its event's location
    pub jitter_radius_m: f64,
    /// Cap on events considered per drop cycle
    pub max_events_per_cycle: usize,
    /// Cap on candidates deactivated per sweep cycle
    pub sweep_batch: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            drop_interval: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            drop_chance: 0.5,
            min_participants: 3,
            jitter_radius_m: 50.0,
            max_events_per_cycle: 100,
            sweep_batch: 500,
        }
    }
}

impl LifecycleConfig {
    /// Defaults with the drop cadence overridable via
    /// `PULSE_DROP_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let mut config = LifecycleConfig::default();
        if let Some(secs) = std::env::var("PULSE_DROP_INTERVAL_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            config.drop_interval = Duration::from_secs(secs.max(1));
        }
        config
    }
}

/// Recurring creator and expirer of time-bounded collectibles
pub struct LifecycleScheduler<S> {
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    config: LifecycleConfig,
}

impl<S: Store + 'static> LifecycleScheduler<S> {
    pub fn new(store: Arc<S>, registry: Arc<ConnectionRegistry>, config: LifecycleConfig) -> Self {
        LifecycleScheduler {
            store,
            registry,
            config,
        }
    }

    /// Start both duties as independent tasks. A cycle failure in one duty
    /// never touches the other.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let dropper = {
            let duty = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(duty.config.drop_interval);
                ticker.tick().await; // first tick is immediate; start on cadence
                loop {
                    ticker.tick().await;
                    match duty.drop_cycle().await {
                        Ok(dropped) if dropped > 0 => {
                            tracing::info!(dropped, "drop cycle complete");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(%err, "drop cycle failed, skipping"),
                    }
                }
            })
        };

        let sweeper = {
            let duty = self;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(duty.config.sweep_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match duty.sweep_cycle().await {
                        Ok(swept) if swept > 0 => {
                            tracing::info!(swept, "expired collectibles deactivated");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(%err, "sweep cycle failed, skipping"),
                    }
                }
            })
        };

        (dropper, sweeper)
    }

    /// One pass of the drop duty. Returns how many collectibles dropped.
    pub async fn drop_cycle(&self) -> PulseResult<usize> {
        let active = Condition::any().eq("status", "active");
        let docs = self
            .store
            .find(Collection::Events, &active, self.config.max_events_per_cycle)
            .await?;

        let now = Timestamp::now();
        let mut dropped = 0usize;

        for doc in docs {
            let Ok(event) = serde_json::from_value::<Event>(doc) else {
                continue;
            };
            if self.registry.participant_count(&event.id) < self.config.min_participants {
                continue;
            }
            if !rand::thread_rng().gen_bool(self.config.drop_chance) {
                continue;
            }

            let collectible = self.drop_into(&event, now).await?;
            let notice = ServerNotice::CollectibleDrop {
                expires_in: now.until(collectible.expires_at).as_secs(),
                collectible,
                timestamp: now,
            };
            self.registry.broadcast_to_event(&event.id, &notice, None);
            dropped += 1;
        }

        Ok(dropped)
    }

    /// Create one collectible inside an event, jittered off its location
    async fn drop_into(&self, event: &Event, now: Timestamp) -> PulseResult<Collectible> {
        let (rarity, east, north) = {
            let mut rng = rand::thread_rng();
            let r = self.config.jitter_radius_m;
            (
                Rarity::roll(&mut rng),
                rng.gen_range(-r..=r),
                rng.gen_range(-r..=r),
            )
        };

        let location = event.location.offset_m(east, north);
        let mut collectible = Collectible::drop_at(event.id.clone(), rarity, location, now);

        let doc = serde_json::to_value(&collectible)
            .map_err(|e| PulseError::MalformedDocument(e.to_string()))?;
        let id = self.store.insert(Collection::Collectibles, doc).await?;
        collectible.id = CollectibleId::new(id);

        tracing::info!(
            event = %event.id,
            collectible = %collectible.id,
            rarity = ?rarity,
            "collectible dropped"
        );
        Ok(collectible)
    }

    /// One pass of the sweep duty. Returns how many collectibles it
    /// deactivated.
    ///
    /// The deactivation condition (`is_active && expires_at <= now`) is
    /// disjoint from any already-claimed document, whose `is_active` the
    /// winning claim already cleared. Whichever writer lands first makes the
    /// other a no-op.
    pub async fn sweep_cycle(&self) -> PulseResult<usize> {
        let now = Timestamp::now();
        let expired = Condition::any()
            .eq("is_active", true)
            .ts_lte("expires_at", now);

        let candidates = self
            .store
            .find(Collection::Collectibles, &expired, self.config.sweep_batch)
            .await?;

        let deactivate = Update::new().set("is_active", false);
        let mut swept = 0usize;

        for doc in candidates {
            let Some(id) = doc.get("id").and_then(Value::as_str) else {
                continue;
            };
            // Re-check the condition inside the atomic step: a claim may have
            // landed between the scan and this update.
            let result = self
                .store
                .conditional_update(Collection::Collectibles, id, &expired, &deactivate)
                .await?;
            if result.is_some() {
                swept += 1;
            }
        }

        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{ClientId, EventId, GeoPoint, COLLECTIBLE_LIFETIME};
    use pulse_registry::NoticeSender;
    use pulse_store::MemoryStore;
    use tokio::sync::mpsc;

    fn test_config() -> LifecycleConfig {
        LifecycleConfig {
            drop_chance: 1.0,
            min_participants: 1,
            ..LifecycleConfig::default()
        }
    }

    async fn seeded_event(store: &MemoryStore) -> EventId {
        let event = Event::new(
            "plaza gathering",
            ClientId::new("creator"),
            GeoPoint::new(-74.07, 4.71).unwrap(),
            Timestamp::now(),
        );
        let id = store
            .insert(Collection::Events, serde_json::to_value(&event).unwrap())
            .await
            .unwrap();
        EventId::new(id)
    }

    fn join(registry: &ConnectionRegistry, name: &str, event: &EventId) -> mpsc::UnboundedReceiver<ServerNotice> {
        let client = ClientId::new(name);
        let (tx, rx): (NoticeSender, _) = mpsc::unbounded_channel();
        registry.register(client.clone(), tx);
        registry.subscribe(&client, event.clone());
        rx
    }

    #[tokio::test]
    async fn test_drop_cycle_creates_and_broadcasts() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let event = seeded_event(&store).await;
        let mut rx = join(&registry, "u-1", &event);

        let scheduler =
            LifecycleScheduler::new(Arc::clone(&store), Arc::clone(&registry), test_config());
        let dropped = scheduler.drop_cycle().await.unwrap();

        assert_eq!(dropped, 1);
        assert_eq!(store.count(Collection::Collectibles), 1);

        match rx.try_recv().unwrap() {
            ServerNotice::CollectibleDrop {
                collectible,
                expires_in,
                ..
            } => {
                assert_eq!(collectible.event_id, event);
                assert!(!collectible.id.is_empty());
                assert!(collectible.is_active);
                assert!(expires_in <= COLLECTIBLE_LIFETIME.as_secs());
            }
            other => panic!("expected drop notice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drop_cycle_skips_quiet_events() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        seeded_event(&store).await;

        let config = LifecycleConfig {
            min_participants: 3,
            ..test_config()
        };
        let scheduler = LifecycleScheduler::new(Arc::clone(&store), registry, config);

        let dropped = scheduler.drop_cycle().await.unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(store.count(Collection::Collectibles), 0);
    }

    #[tokio::test]
    async fn test_drop_location_stays_within_jitter() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let event = seeded_event(&store).await;
        let _rx = join(&registry, "u-1", &event);

        let scheduler =
            LifecycleScheduler::new(Arc::clone(&store), Arc::clone(&registry), test_config());
        scheduler.drop_cycle().await.unwrap();

        let docs = store
            .find(Collection::Collectibles, &Condition::any(), 10)
            .await
            .unwrap();
        let collectible: Collectible = serde_json::from_value(docs[0].clone()).unwrap();
        let origin = GeoPoint::new(-74.07, 4.71).unwrap();
        // Square jitter of +/-50m: the corner is at most ~71m out
        assert!(origin.distance_m(collectible.location) < 75.0);
    }

    #[tokio::test]
    async fn test_sweep_deactivates_only_expired() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let now = Timestamp::now();
        let here = GeoPoint::new(0.0, 0.0).unwrap();

        let fresh = Collectible::drop_at(EventId::new("evt-1"), Rarity::Common, here, now);
        let fresh_id = store
            .insert(Collection::Collectibles, serde_json::to_value(&fresh).unwrap())
            .await
            .unwrap();

        let mut stale = Collectible::drop_at(EventId::new("evt-1"), Rarity::Rare, here, now);
        stale.expires_at = now.saturating_sub(Duration::from_secs(60));
        let stale_id = store
            .insert(Collection::Collectibles, serde_json::to_value(&stale).unwrap())
            .await
            .unwrap();

        let scheduler = LifecycleScheduler::new(Arc::clone(&store), registry, test_config());
        let swept = scheduler.sweep_cycle().await.unwrap();
        assert_eq!(swept, 1);

        let fresh_doc = store
            .get(Collection::Collectibles, &fresh_id)
            .await
            .unwrap()
            .unwrap();
        let stale_doc = store
            .get(Collection::Collectibles, &stale_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh_doc["is_active"], true);
        assert_eq!(stale_doc["is_active"], false);
        assert!(stale_doc["claimed_by"].is_null());
    }

    #[tokio::test]
    async fn test_sweep_never_touches_claimed() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let now = Timestamp::now();
        let here = GeoPoint::new(0.0, 0.0).unwrap();

        // Claimed and deactivated, but with an expiry in the past: the sweep
        // condition must not match it
        let mut claimed = Collectible::drop_at(EventId::new("evt-1"), Rarity::Epic, here, now);
        claimed.expires_at = now.saturating_sub(Duration::from_secs(60));
        claimed.is_active = false;
        claimed.claimed_by = Some(ClientId::new("winner"));
        store
            .insert(
                Collection::Collectibles,
                serde_json::to_value(&claimed).unwrap(),
            )
            .await
            .unwrap();

        let scheduler = LifecycleScheduler::new(Arc::clone(&store), registry, test_config());
        let swept = scheduler.sweep_cycle().await.unwrap();
        assert_eq!(swept, 0);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let now = Timestamp::now();
        let here = GeoPoint::new(0.0, 0.0).unwrap();

        let mut stale = Collectible::drop_at(EventId::new("evt-1"), Rarity::Common, here, now);
        stale.expires_at = now.saturating_sub(Duration::from_secs(60));
        store
            .insert(Collection::Collectibles, serde_json::to_value(&stale).unwrap())
            .await
            .unwrap();

        let scheduler = LifecycleScheduler::new(Arc::clone(&store), registry, test_config());
        assert_eq!(scheduler.sweep_cycle().await.unwrap(), 1);
        assert_eq!(scheduler.sweep_cycle().await.unwrap(), 0);
    }
}
