//! Pulse Registry - who is connected, where they are, what room they're in
//!
//! The registry is the only in-process mutable shared structure. It is an
//! explicit instance - constructed once per process and handed to every
//! session task and to the lifecycle scheduler - never a global.
//!
//! Delivery model: each connection owns an unbounded mpsc channel; the
//! registry holds the sender, the transport task drains the receiver. Send
//! order into one channel is delivery order for that connection. A failed
//! send means the receiver is gone, and is treated as an implicit
//! unregister.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use pulse_core::{ClientId, EventId, GeoPoint, ServerNotice};

/// Outbound handle for one connection
pub type NoticeSender = mpsc::UnboundedSender<ServerNotice>;
/// Transport side of a connection's outbound queue
pub type NoticeReceiver = mpsc::UnboundedReceiver<ServerNotice>;

/// Per-connection entry: transport handle plus live client state
struct Connection {
    sender: NoticeSender,
    location: Option<GeoPoint>,
    event: Option<EventId>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ClientId, Connection>,
    rooms: HashMap<EventId, HashSet<ClientId>>,
}

/// Connection statistics snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub connections: usize,
    pub active_rooms: usize,
    pub room_members: usize,
    pub located_clients: usize,
}

/// Live connection map with event-room fan-out
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    /// Create or replace the entry for a client.
    ///
    /// Replacing drops the prior sender, closing the old transport's queue.
    /// Location and room membership survive a reconnect: they belong to the
    /// client identity, not the socket.
    pub fn register(&self, client: ClientId, sender: NoticeSender) {
        let mut inner = self.inner.write();
        let (location, event) = match inner.connections.remove(&client) {
            Some(prior) => (prior.location, prior.event),
            None => (None, None),
        };
        inner.connections.insert(
            client.clone(),
            Connection {
                sender,
                location,
                event,
            },
        );
        tracing::info!(client = %client, total = inner.connections.len(), "client registered");
    }

    /// Remove a client entirely: connection, location, room membership.
    /// Safe to call when absent.
    pub fn unregister(&self, client: &ClientId) {
        let mut inner = self.inner.write();
        let removed = inner.connections.remove(client);
        if removed.is_some() {
            Self::leave_room(&mut inner, client);
            tracing::info!(client = %client, total = inner.connections.len(), "client unregistered");
        }
    }

    pub fn is_registered(&self, client: &ClientId) -> bool {
        self.inner.read().connections.contains_key(client)
    }

    /// Best-effort delivery to one client. Unknown client: silent no-op.
    /// Dead channel: the entry is evicted.
    pub fn send(&self, client: &ClientId, notice: ServerNotice) {
        let sender = {
            let inner = self.inner.read();
            match inner.connections.get(client) {
                Some(conn) => conn.sender.clone(),
                None => return,
            }
        };
        if sender.send(notice).is_err() {
            tracing::debug!(client = %client, "delivery failed, evicting connection");
            self.unregister(client);
        }
    }

    /// Deliver to every currently-registered id in the set. Partial delivery
    /// is normal; unknown ids are skipped silently.
    pub fn broadcast(&self, clients: &[ClientId], notice: &ServerNotice) {
        for client in clients {
            self.send(client, notice.clone());
        }
    }

    /// Deliver to every subscriber of an event room, optionally excluding
    /// one client (usually the sender).
    pub fn broadcast_to_event(
        &self,
        event: &EventId,
        notice: &ServerNotice,
        exclude: Option<&ClientId>,
    ) {
        // Snapshot under the read lock; a disconnect racing this broadcast
        // either misses the snapshot or fails the send and gets evicted.
        let members: Vec<ClientId> = {
            let inner = self.inner.read();
            match inner.rooms.get(event) {
                Some(members) => members
                    .iter()
                    .filter(|member| exclude.map_or(true, |ex| *member != ex))
                    .cloned()
                    .collect(),
                None => return,
            }
        };
        for client in &members {
            self.send(client, notice.clone());
        }
    }

    /// Enter an event room, leaving any previous room first (a client holds
    /// at most one membership). No-op for unregistered clients.
    pub fn subscribe(&self, client: &ClientId, event: EventId) {
        let mut inner = self.inner.write();
        if !inner.connections.contains_key(client) {
            return;
        }
        Self::leave_room(&mut inner, client);
        inner
            .rooms
            .entry(event.clone())
            .or_default()
            .insert(client.clone());
        if let Some(conn) = inner.connections.get_mut(client) {
            conn.event = Some(event);
        }
    }

    /// Leave the current event room, if any. Idempotent.
    pub fn unsubscribe(&self, client: &ClientId) {
        let mut inner = self.inner.write();
        Self::leave_room(&mut inner, client);
    }

    /// Record a client's last known location
    pub fn update_location(&self, client: &ClientId, location: GeoPoint) {
        let mut inner = self.inner.write();
        if let Some(conn) = inner.connections.get_mut(client) {
            conn.location = Some(location);
        }
    }

    pub fn location_of(&self, client: &ClientId) -> Option<GeoPoint> {
        self.inner.read().connections.get(client)?.location
    }

    /// The event this client is currently subscribed to, if any
    pub fn membership_of(&self, client: &ClientId) -> Option<EventId> {
        self.inner.read().connections.get(client)?.event.clone()
    }

    /// Current subscribers of an event room
    pub fn participants_of(&self, event: &EventId) -> Vec<ClientId> {
        self.inner
            .read()
            .rooms
            .get(event)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn participant_count(&self, event: &EventId) -> usize {
        self.inner
            .read()
            .rooms
            .get(event)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Events that currently have at least one subscriber
    pub fn occupied_rooms(&self) -> Vec<EventId> {
        self.inner.read().rooms.keys().cloned().collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            connections: inner.connections.len(),
            active_rooms: inner.rooms.len(),
            room_members: inner.rooms.values().map(HashSet::len).sum(),
            located_clients: inner
                .connections
                .values()
                .filter(|c| c.location.is_some())
                .count(),
        }
    }

    fn leave_room(inner: &mut RegistryInner, client: &ClientId) {
        let Some(event) = inner
            .connections
            .get_mut(client)
            .and_then(|conn| conn.event.take())
        else {
            // Not connected or not in a room; rooms may still hold a stale
            // entry if the connection was already evicted.
            for members in inner.rooms.values_mut() {
                members.remove(client);
            }
            inner.rooms.retain(|_, members| !members.is_empty());
            return;
        };
        if let Some(members) = inner.rooms.get_mut(&event) {
            members.remove(client);
            if members.is_empty() {
                inner.rooms.remove(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Timestamp;

    fn channel() -> (NoticeSender, NoticeReceiver) {
        mpsc::unbounded_channel()
    }

    fn ping() -> ServerNotice {
        ServerNotice::Error {
            message: "ping".to_string(),
            timestamp: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn test_send_after_unregister_is_noop() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new("u-1");
        let (tx, mut rx) = channel();

        registry.register(client.clone(), tx);
        registry.unregister(&client);
        registry.send(&client, ping());

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.stats().connections, 0);
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.unregister(&ClientId::new("ghost"));
    }

    #[test]
    fn test_register_replaces_prior_handle() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new("u-1");
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        registry.register(client.clone(), tx1);
        registry.register(client.clone(), tx2);

        // Prior sender was dropped: its queue reports closed
        assert!(rx1.try_recv().is_err());
        registry.send(&client, ping());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(registry.stats().connections, 1);

        drop(rx1);
    }

    #[test]
    fn test_reconnect_keeps_location_and_room() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new("u-1");
        let event = EventId::new("evt-1");
        let here = GeoPoint::new(-74.07, 4.71).unwrap();

        let (tx1, _rx1) = channel();
        registry.register(client.clone(), tx1);
        registry.update_location(&client, here);
        registry.subscribe(&client, event.clone());

        let (tx2, _rx2) = channel();
        registry.register(client.clone(), tx2);

        assert_eq!(registry.location_of(&client), Some(here));
        assert_eq!(registry.membership_of(&client), Some(event));
    }

    #[test]
    fn test_dead_channel_evicts_on_send() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new("u-1");
        let (tx, rx) = channel();
        registry.register(client.clone(), tx);
        drop(rx);

        registry.send(&client, ping());
        assert!(!registry.is_registered(&client));
    }

    #[test]
    fn test_room_broadcast_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let event = EventId::new("evt-1");
        let a = ClientId::new("a");
        let b = ClientId::new("b");
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        registry.register(a.clone(), tx_a);
        registry.register(b.clone(), tx_b);
        registry.subscribe(&a, event.clone());
        registry.subscribe(&b, event.clone());

        registry.broadcast_to_event(&event, &ping(), Some(&a));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_subscribe_moves_between_rooms() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new("u-1");
        let first = EventId::new("evt-1");
        let second = EventId::new("evt-2");
        let (tx, _rx) = channel();

        registry.register(client.clone(), tx);
        registry.subscribe(&client, first.clone());
        registry.subscribe(&client, second.clone());

        assert_eq!(registry.participant_count(&first), 0);
        assert_eq!(registry.participant_count(&second), 1);
        assert_eq!(registry.membership_of(&client), Some(second));
    }

    #[test]
    fn test_unregister_releases_room() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new("u-1");
        let event = EventId::new("evt-1");
        let (tx, _rx) = channel();

        registry.register(client.clone(), tx);
        registry.subscribe(&client, event.clone());
        registry.unregister(&client);

        assert_eq!(registry.participant_count(&event), 0);
        assert!(registry.occupied_rooms().is_empty());
    }

    #[test]
    fn test_broadcast_partial_delivery() {
        let registry = ConnectionRegistry::new();
        let alive = ClientId::new("alive");
        let dead = ClientId::new("dead");
        let ghost = ClientId::new("ghost");
        let (tx_a, mut rx_a) = channel();
        let (tx_d, rx_d) = channel();

        registry.register(alive.clone(), tx_a);
        registry.register(dead.clone(), tx_d);
        drop(rx_d);

        registry.broadcast(&[alive.clone(), dead.clone(), ghost], &ping());

        assert!(rx_a.try_recv().is_ok());
        assert!(!registry.is_registered(&dead));
        assert!(registry.is_registered(&alive));
    }
}
