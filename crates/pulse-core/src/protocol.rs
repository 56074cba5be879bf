//! Session protocol message shapes
//!
//! Inbound client messages and outbound server notices, discriminated by a
//! `type` tag. The transport is any bidirectional message channel; payloads
//! are JSON text.

use serde::{Deserialize, Serialize};

use crate::{ClientId, Collectible, CollectibleId, Event, EventId, Timestamp};

/// Messages a client sends over its session channel
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Live position report; coordinates are `[longitude, latitude]`
    LocationUpdate {
        coordinates: [f64; 2],
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
    },
    JoinEvent {
        event_id: EventId,
    },
    LeaveEvent {
        event_id: EventId,
    },
    ClaimCollectible {
        collectible_id: CollectibleId,
    },
    ChatMessage {
        event_id: EventId,
        message: String,
    },
}

/// Notices the engine pushes back to clients
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    /// Active events near the client's last reported position
    NearbyEvents {
        events: Vec<Event>,
        timestamp: Timestamp,
    },
    /// Another participant joined the event room
    UserJoined {
        user_id: ClientId,
        event_id: EventId,
        timestamp: Timestamp,
    },
    UserLeft {
        user_id: ClientId,
        event_id: EventId,
        timestamp: Timestamp,
    },
    /// A collectible dropped in the client's event room
    CollectibleDrop {
        collectible: Collectible,
        /// Seconds until the drop expires
        expires_in: u64,
        timestamp: Timestamp,
    },
    /// Definitive outcome of this client's claim attempt
    ClaimResult {
        success: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collectible: Option<Collectible>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claim_order: Option<u32>,
        timestamp: Timestamp,
    },
    /// Someone won a collectible; stop displaying it
    CollectibleClaimed {
        collectible_id: CollectibleId,
        event_id: EventId,
        winner_id: ClientId,
        timestamp: Timestamp,
    },
    ChatMessage {
        user_id: ClientId,
        event_id: EventId,
        message: String,
        timestamp: Timestamp,
    },
    /// Structured rejection of a bad message; the connection stays open
    Error {
        message: String,
        timestamp: Timestamp,
    },
}
