//! Domain models: events, collectibles, rarity tiers
//!
//! These structs are the typed faces of the store's documents. Ids are empty
//! until the store mints one at insert; every document read back from the
//! store carries its id.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{ClientId, CollectibleId, EventId, GeoPoint, Timestamp};

/// How long a dropped collectible stays claimable
pub const COLLECTIBLE_LIFETIME: Duration = Duration::from_secs(30);

/// Event lifecycle status
///
/// `Active -> Ended` happens at most once and never reverts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Ended,
}

/// A time-and-place-bounded activity clients can join
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub creator_id: ClientId,
    pub location: GeoPoint,
    pub status: EventStatus,
    /// Persisted participant tally, maintained by join/leave
    #[serde(default)]
    pub participants: u32,
    pub created_at: Timestamp,
}

impl Event {
    pub fn new(
        title: impl Into<String>,
        creator_id: ClientId,
        location: GeoPoint,
        created_at: Timestamp,
    ) -> Self {
        Event {
            id: EventId::default(),
            title: title.into(),
            description: String::new(),
            category: String::new(),
            creator_id,
            location,
            status: EventStatus::Active,
            participants: 0,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }
}

/// Collectible rarity tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Score awarded for a successful claim
    pub fn score(self) -> u32 {
        match self {
            Rarity::Common => 10,
            Rarity::Rare => 30,
            Rarity::Epic => 60,
            Rarity::Legendary => 100,
        }
    }

    /// Display name for the dropped collectible
    pub fn display_name(self) -> &'static str {
        match self {
            Rarity::Common => "City Stroller",
            Rarity::Rare => "District Explorer",
            Rarity::Epic => "Urban Legend",
            Rarity::Legendary => "Pulse Icon",
        }
    }

    /// Weighted roll: 50% common, 30% rare, 15% epic, 5% legendary
    pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let sample: f64 = rng.gen();
        if sample < 0.50 {
            Rarity::Common
        } else if sample < 0.80 {
            Rarity::Rare
        } else if sample < 0.95 {
            Rarity::Epic
        } else {
            Rarity::Legendary
        }
    }

    pub fn all() -> &'static [Rarity] {
        &[Rarity::Common, Rarity::Rare, Rarity::Epic, Rarity::Legendary]
    }
}

/// The scarce, time-limited, exactly-once-claimable resource
///
/// `claimed_by` is write-once: the only mutation path is the store's
/// conditional update, conditioned on it being unset. `is_active` drops to
/// false exactly once, by claim or by expiry sweep, whichever lands first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Collectible {
    #[serde(default)]
    pub id: CollectibleId,
    pub event_id: EventId,
    pub name: String,
    pub rarity: Rarity,
    pub location: GeoPoint,
    pub dropped_at: Timestamp,
    pub expires_at: Timestamp,
    #[serde(default)]
    pub claimed_by: Option<ClientId>,
    #[serde(default)]
    pub claimed_at: Option<Timestamp>,
    pub is_active: bool,
    /// Analytics counters, best-effort
    #[serde(default)]
    pub claim_attempts: u32,
    #[serde(default)]
    pub successful_claims: u32,
}

impl Collectible {
    /// Build a fresh drop inside an event; the id stays empty until insert
    pub fn drop_at(
        event_id: EventId,
        rarity: Rarity,
        location: GeoPoint,
        now: Timestamp,
    ) -> Self {
        Collectible {
            id: CollectibleId::default(),
            event_id,
            name: rarity.display_name().to_string(),
            rarity,
            location,
            dropped_at: now,
            expires_at: now + COLLECTIBLE_LIFETIME,
            claimed_by: None,
            claimed_at: None,
            is_active: true,
            claim_attempts: 0,
            successful_claims: 0,
        }
    }

    /// Still claimable at `now`: active, unclaimed, unexpired
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        self.is_active && self.claimed_by.is_none() && self.expires_at > now
    }
}
