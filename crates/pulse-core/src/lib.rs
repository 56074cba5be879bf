//! Pulse Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the Pulse engine:
//! - Identifiers (ClientId, EventId, CollectibleId)
//! - Geo primitives (GeoPoint, distances)
//! - Wall-clock timestamps
//! - Domain models (Event, Collectible, Rarity)
//! - Session protocol message shapes
//! - Error taxonomy

pub mod error;
pub mod geo;
pub mod id;
pub mod model;
pub mod protocol;
pub mod time;

pub use error::*;
pub use geo::*;
pub use id::*;
pub use model::*;
pub use protocol::*;
pub use time::*;
