//! Error types for the Pulse engine

use thiserror::Error;

use crate::{CollectibleId, EventId};

/// Core Pulse errors
///
/// Contention outcomes (a lost claim, an expired collectible) are NOT errors;
/// they are modeled as values in `ClaimOutcome`. This enum covers validation
/// failures and infrastructure faults only.
#[derive(Error, Debug)]
pub enum PulseError {
    // Validation errors - rejected locally, connection stays open
    #[error("Coordinates out of range: ({longitude}, {latitude})")]
    InvalidCoordinates { longitude: f64, latitude: f64 },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Not a participant of event {0}")]
    NotInEvent(EventId),

    // Lookup errors
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error("Event has ended: {0}")]
    EventEnded(EventId),

    #[error("Collectible not found: {0}")]
    CollectibleNotFound(CollectibleId),

    // Store errors - transient infrastructure faults
    #[error("Store error: {0}")]
    Store(String),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    // Session errors
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session not active")]
    SessionNotActive,
}

/// Result type for Pulse operations
pub type PulseResult<T> = Result<T, PulseError>;
