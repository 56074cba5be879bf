//! Per-connection session: state machine and message dispatch
//!
//! State machine: `Connecting -> Active -> Closing -> Closed`. Activation
//! registers the connection's notice channel; closing releases it. A bad
//! message earns a structured error reply and the connection stays open.
//! A store operation already issued runs to completion even if the
//! connection closes - `run` only observes channel shutdown between
//! messages, never mid-handler.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pulse_core::{
    ClientId, ClientMessage, CollectibleId, Event, EventId, GeoPoint, PulseError, PulseResult,
    ServerNotice, Timestamp,
};
use pulse_engine::{ClaimResolver, ProximityMatcher};
use pulse_engine::proximity::{DEFAULT_RADIUS_M, MAX_RESULTS};
use pulse_registry::{ConnectionRegistry, NoticeReceiver};
use pulse_store::{Collection, Condition, Store, Update};

/// Session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Radius for nearby-event matching, meters
    pub proximity_radius_m: f64,
    /// Cap on events in one `nearby_events` notice
    pub max_nearby: usize,
    /// Evict the client after this long without an inbound message
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            proximity_radius_m: DEFAULT_RADIUS_M,
            max_nearby: MAX_RESULTS,
            idle_timeout: Duration::from_secs(900),
        }
    }
}

/// Connection lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// One client's protocol handler
pub struct Session<S> {
    client: ClientId,
    state: SessionState,
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    resolver: ClaimResolver<S>,
    matcher: ProximityMatcher<S>,
    idle_timeout: Duration,
    /// Id-set of the last `nearby_events` notice, for materiality
    last_nearby: Option<BTreeSet<EventId>>,
}

impl<S: Store> Session<S> {
    /// Build a session in `Connecting`; call `activate` to register it
    pub fn new(
        client: ClientId,
        store: Arc<S>,
        registry: Arc<ConnectionRegistry>,
        config: SessionConfig,
    ) -> Self {
        let resolver = ClaimResolver::new(Arc::clone(&store));
        let matcher = ProximityMatcher::with_radius(
            Arc::clone(&store),
            config.proximity_radius_m,
            config.max_nearby,
        );
        Session {
            client,
            state: SessionState::Connecting,
            store,
            registry,
            resolver,
            matcher,
            idle_timeout: config.idle_timeout,
            last_nearby: None,
        }
    }

    /// Register with the connection registry and enter `Active`.
    ///
    /// Returns the transport's end of the outbound notice queue. Notices
    /// are delivered to it in enqueue order.
    pub fn activate(&mut self) -> NoticeReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(self.client.clone(), tx);
        self.state = SessionState::Active;
        rx
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Drive the session from an inbound text-message queue until the
    /// transport closes it or the idle timeout elapses, then release
    /// everything. A handler that already issued a store operation always
    /// runs it to completion first.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<String>) {
        loop {
            match tokio::time::timeout(self.idle_timeout, inbound.recv()).await {
                Ok(Some(text)) => {
                    self.handle_text(&text).await;
                    if self.state != SessionState::Active {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(client = %self.client, "session idle timeout");
                    break;
                }
            }
        }
        self.close();
    }

    /// Interpret one raw inbound message
    pub async fn handle_text(&mut self, text: &str) {
        if self.state != SessionState::Active {
            return;
        }
        let outcome = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(err) => Err(PulseError::InvalidMessage(err.to_string())),
        };
        if let Err(err) = outcome {
            tracing::debug!(client = %self.client, %err, "message rejected");
            self.reply(ServerNotice::Error {
                message: err.to_string(),
                timestamp: Timestamp::now(),
            });
        }
    }

    /// Transition `Closing -> Closed`, releasing registration and room
    /// membership. Idempotent: safe to call after `run` already did.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(event) = self.registry.membership_of(&self.client) {
            self.registry.broadcast_to_event(
                &event,
                &ServerNotice::UserLeft {
                    user_id: self.client.clone(),
                    event_id: event.clone(),
                    timestamp: Timestamp::now(),
                },
                Some(&self.client),
            );
        }
        self.registry.unregister(&self.client);
        self.state = SessionState::Closed;
        tracing::info!(client = %self.client, "session closed");
    }

    async fn handle_message(&mut self, message: ClientMessage) -> PulseResult<()> {
        match message {
            ClientMessage::LocationUpdate { coordinates, .. } => {
                self.on_location_update(coordinates).await
            }
            ClientMessage::JoinEvent { event_id } => self.on_join_event(event_id).await,
            ClientMessage::LeaveEvent { event_id } => self.on_leave_event(event_id).await,
            ClientMessage::ClaimCollectible { collectible_id } => {
                self.on_claim(collectible_id).await
            }
            ClientMessage::ChatMessage { event_id, message } => {
                self.on_chat(event_id, message).await
            }
        }
    }

    async fn on_location_update(&mut self, coordinates: [f64; 2]) -> PulseResult<()> {
        // Validation happens before any state is touched
        let point = GeoPoint::new(coordinates[0], coordinates[1])?;
        self.registry.update_location(&self.client, point);

        let events = self.matcher.nearby_events(point).await?;
        let ids: BTreeSet<EventId> = events.iter().map(|e| e.id.clone()).collect();

        // Push only when the set materially changed since the last notice
        if self.last_nearby.as_ref() != Some(&ids) {
            self.last_nearby = Some(ids);
            self.reply(ServerNotice::NearbyEvents {
                events,
                timestamp: Timestamp::now(),
            });
        }
        Ok(())
    }

    async fn on_join_event(&mut self, event_id: EventId) -> PulseResult<()> {
        let doc = self
            .store
            .get(Collection::Events, event_id.as_str())
            .await?
            .ok_or_else(|| PulseError::EventNotFound(event_id.clone()))?;
        let event: Event = serde_json::from_value(doc)
            .map_err(|e| PulseError::MalformedDocument(e.to_string()))?;
        if !event.is_active() {
            return Err(PulseError::EventEnded(event_id));
        }

        self.registry.subscribe(&self.client, event_id.clone());
        self.store
            .conditional_update(
                Collection::Events,
                event_id.as_str(),
                &Condition::any().eq("status", "active"),
                &Update::new().inc("participants", 1),
            )
            .await?;

        self.registry.broadcast_to_event(
            &event_id,
            &ServerNotice::UserJoined {
                user_id: self.client.clone(),
                event_id: event_id.clone(),
                timestamp: Timestamp::now(),
            },
            Some(&self.client),
        );
        Ok(())
    }

    async fn on_leave_event(&mut self, event_id: EventId) -> PulseResult<()> {
        if self.registry.membership_of(&self.client) != Some(event_id.clone()) {
            return Err(PulseError::NotInEvent(event_id));
        }

        self.registry.unsubscribe(&self.client);
        self.store
            .conditional_update(
                Collection::Events,
                event_id.as_str(),
                &Condition::any(),
                &Update::new().inc("participants", -1),
            )
            .await?;

        self.registry.broadcast_to_event(
            &event_id,
            &ServerNotice::UserLeft {
                user_id: self.client.clone(),
                event_id: event_id.clone(),
                timestamp: Timestamp::now(),
            },
            None,
        );
        Ok(())
    }

    async fn on_claim(&mut self, collectible_id: CollectibleId) -> PulseResult<()> {
        // One retry on a transient store fault: the conditional update is
        // idempotent, so a duplicate attempt cannot double-grant
        let outcome = match self.resolver.attempt_claim(&collectible_id, &self.client).await {
            Ok(outcome) => outcome,
            Err(PulseError::Store(_)) => {
                self.resolver
                    .attempt_claim(&collectible_id, &self.client)
                    .await?
            }
            Err(err) => return Err(err),
        };

        self.reply(ServerNotice::ClaimResult {
            success: outcome.granted,
            message: outcome.reason.message().to_string(),
            collectible: outcome.collectible.clone(),
            claim_order: outcome.claim_order,
            timestamp: Timestamp::now(),
        });

        // Winners are announced to the room so peers drop the collectible
        // from display; losers generate no fan-out
        if let Some(collectible) = outcome.collectible.filter(|_| outcome.granted) {
            self.registry.broadcast_to_event(
                &collectible.event_id,
                &ServerNotice::CollectibleClaimed {
                    collectible_id: collectible.id.clone(),
                    event_id: collectible.event_id.clone(),
                    winner_id: self.client.clone(),
                    timestamp: Timestamp::now(),
                },
                Some(&self.client),
            );
        }
        Ok(())
    }

    async fn on_chat(&mut self, event_id: EventId, message: String) -> PulseResult<()> {
        if self.registry.membership_of(&self.client) != Some(event_id.clone()) {
            return Err(PulseError::NotInEvent(event_id));
        }

        // Sender excluded: no echo
        self.registry.broadcast_to_event(
            &event_id,
            &ServerNotice::ChatMessage {
                user_id: self.client.clone(),
                event_id: event_id.clone(),
                message,
                timestamp: Timestamp::now(),
            },
            Some(&self.client),
        );
        Ok(())
    }

    fn reply(&self, notice: ServerNotice) {
        self.registry.send(&self.client, notice);
    }
}
