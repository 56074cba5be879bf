//! Event directory - creation and the one-way status transition
//!
//! Event creation comes from outside the core (an HTTP handler, a test
//! harness); this module owns the store discipline for it, and for ending an
//! event: `active -> ended` happens through a conditional update, so it
//! lands exactly once no matter how many callers race it, and can never
//! revert.

use std::sync::Arc;

use pulse_core::{Event, EventId, PulseError, PulseResult};
use pulse_store::{Collection, Condition, Store, Update};

/// Store-facing event operations
pub struct EventDirectory<S> {
    store: Arc<S>,
}

impl<S> Clone for EventDirectory<S> {
    fn clone(&self) -> Self {
        EventDirectory {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> EventDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        EventDirectory { store }
    }

    /// Persist a new event, returning it with the store-minted id
    pub async fn create(&self, mut event: Event) -> PulseResult<Event> {
        let doc = serde_json::to_value(&event)
            .map_err(|e| PulseError::MalformedDocument(e.to_string()))?;
        let id = self.store.insert(Collection::Events, doc).await?;
        event.id = EventId::new(id);
        tracing::info!(event = %event.id, title = %event.title, "event created");
        Ok(event)
    }

    pub async fn get(&self, event_id: &EventId) -> PulseResult<Option<Event>> {
        let Some(doc) = self.store.get(Collection::Events, event_id.as_str()).await? else {
            return Ok(None);
        };
        let event =
            serde_json::from_value(doc).map_err(|e| PulseError::MalformedDocument(e.to_string()))?;
        Ok(Some(event))
    }

    /// Transition `active -> ended`. Returns true only for the caller whose
    /// update landed; later calls (and races) observe false and change
    /// nothing.
    pub async fn end(&self, event_id: &EventId) -> PulseResult<bool> {
        let ended = self
            .store
            .conditional_update(
                Collection::Events,
                event_id.as_str(),
                &Condition::any().eq("status", "active"),
                &Update::new().set("status", "ended"),
            )
            .await?;
        if ended.is_some() {
            tracing::info!(event = %event_id, "event ended");
        }
        Ok(ended.is_some())
    }
}
