use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use futures_util::Stream;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{CollabEvent, RoomId, UserId};

static NEXT_CONNECTION_ID: AtomicCell<u64> = AtomicCell::new(1);

/// Identifies a realtime connection, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-wide realtime registry: room broadcast groups and the online user set.
///
/// Created once on startup and injected through [crate::CollabContext]. Delivery is
/// fire-and-forget, a connection that can't keep up loses events instead of slowing
/// down the publisher. Nothing is replayed, clients refetch state after (re)joining.
pub struct Bus {
    me: Weak<Self>,
    buffer: usize,
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    /// Online users and the connections keeping them online
    presence: Mutex<HashMap<UserId, HashSet<ConnectionId>>>,
}

/// A realtime connection registered with the [Bus]
pub struct Connection {
    sender: mpsc::Sender<CollabEvent>,
    rooms: HashSet<RoomId>,
}

/// The receiving end of a connection. Dropping it disconnects the connection.
pub struct Subscription {
    id: ConnectionId,
    receiver: mpsc::Receiver<CollabEvent>,
    /// Required to remove the connection when dropped
    bus: Weak<Bus>,
}

impl Bus {
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            buffer: buffer.max(1),
            connections: Default::default(),
            rooms: Default::default(),
            presence: Default::default(),
        })
    }

    /// Registers a new connection that is not yet part of any room.
    pub fn connect(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = ConnectionId::next();

        self.connections.insert(
            id,
            Connection {
                sender,
                rooms: Default::default(),
            },
        );

        debug!("Realtime connection {} opened", id);

        Subscription {
            id,
            receiver,
            bus: self.me.clone(),
        }
    }

    /// Adds a connection to a room's broadcast group.
    /// Returns false if the connection is gone.
    pub fn subscribe(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        {
            let Some(mut connection) = self.connections.get_mut(&connection_id) else {
                return false;
            };

            connection.rooms.insert(room_id.to_string());
        }

        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);

        true
    }

    pub fn unsubscribe(&self, room_id: &str, connection_id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.rooms.remove(room_id);
        }

        self.remove_from_room(room_id, connection_id);
    }

    /// Delivers an event to every connection currently subscribed to the room.
    /// Returns how many connections accepted it.
    pub fn publish(&self, room_id: &str, event: CollabEvent) -> usize {
        let recipients: Vec<_> = self
            .rooms
            .get(room_id)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default();

        self.deliver(&recipients, event)
    }

    /// Delivers an event to every connection.
    pub fn broadcast(&self, event: CollabEvent) -> usize {
        let recipients: Vec<_> = self.connections.iter().map(|c| *c.key()).collect();

        self.deliver(&recipients, event)
    }

    /// Marks a user as online through the given connection.
    pub fn set_online(&self, user_id: &str, connection_id: ConnectionId) {
        let mut presence = self.presence.lock();
        let connections = presence.entry(user_id.to_string()).or_default();

        let came_online = connections.is_empty();
        connections.insert(connection_id);

        if came_online {
            info!("User {} is online", user_id);
            self.announce_presence(&presence);
        }
    }

    /// Removes a connection from a user's presence. The user goes offline once no
    /// connection keeps them online.
    pub fn set_offline(&self, user_id: &str, connection_id: ConnectionId) {
        let mut presence = self.presence.lock();

        let went_offline = presence
            .get_mut(user_id)
            .map(|connections| {
                connections.remove(&connection_id);
                connections.is_empty()
            })
            .unwrap_or(false);

        if went_offline {
            presence.remove(user_id);
            info!("User {} is offline", user_id);
            self.announce_presence(&presence);
        }
    }

    /// Returns the online users, sorted
    pub fn online_users(&self) -> Vec<UserId> {
        sorted_users(&self.presence.lock())
    }

    /// Returns how many connections are subscribed to a room
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Drops every connection. Open subscriptions end after draining what they already received.
    pub fn shutdown(&self) {
        let count = self.connections.len();

        self.connections.clear();
        self.rooms.clear();
        self.presence.lock().clear();

        info!("Closed {} realtime connections", count);
    }

    fn deliver(&self, recipients: &[ConnectionId], event: CollabEvent) -> usize {
        let mut delivered = 0;

        for id in recipients {
            let Some(connection) = self.connections.get(id) else {
                continue;
            };

            match connection.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Connection {} is lagging behind, dropped event", id)
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} is closed, dropped event", id)
                }
            }
        }

        delivered
    }

    fn announce_presence(&self, presence: &HashMap<UserId, HashSet<ConnectionId>>) {
        self.broadcast(CollabEvent::OnlineUsersChanged {
            users: sorted_users(presence),
        });
    }

    fn remove_from_room(&self, room_id: &str, connection_id: ConnectionId) {
        if let Some(mut subscribers) = self.rooms.get_mut(room_id) {
            subscribers.remove(&connection_id);
        }

        self.rooms
            .remove_if(room_id, |_, subscribers| subscribers.is_empty());
    }

    /// Called when a [Subscription] is dropped
    fn disconnect(&self, connection_id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&connection_id) else {
            return;
        };

        for room_id in &connection.rooms {
            self.remove_from_room(room_id, connection_id);
        }

        let mut presence = self.presence.lock();
        let online_before = presence.len();

        presence.retain(|_, connections| {
            connections.remove(&connection_id);
            !connections.is_empty()
        });

        if presence.len() != online_before {
            self.announce_presence(&presence);
        }

        debug!("Realtime connection {} closed", connection_id);
    }
}

fn sorted_users(presence: &HashMap<UserId, HashSet<ConnectionId>>) -> Vec<UserId> {
    let mut users: Vec<_> = presence.keys().cloned().collect();
    users.sort();
    users
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for the next event. Returns [None] once the bus dropped the connection.
    pub async fn recv(&mut self) -> Option<CollabEvent> {
        self.receiver.recv().await
    }

    /// Returns an already delivered event, if any
    pub fn try_recv(&mut self) -> Option<CollabEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = CollabEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.disconnect(self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members_event(room_id: &str) -> CollabEvent {
        CollabEvent::MembersUpdated {
            room_id: room_id.to_string(),
            members: vec!["u1".into()],
        }
    }

    #[tokio::test]
    async fn publish_only_reaches_the_rooms_subscribers() {
        let bus = Bus::new(8);
        let mut in_a = bus.connect();
        let mut in_b = bus.connect();

        bus.subscribe("a", in_a.id());
        bus.subscribe("b", in_b.id());

        assert_eq!(bus.publish("a", members_event("a")), 1);

        assert_eq!(in_a.try_recv(), Some(members_event("a")));
        assert_eq!(in_b.try_recv(), None);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let bus = Bus::new(8);
        bus.publish("a", members_event("a"));

        let mut late = bus.connect();
        bus.subscribe("a", late.id());

        assert_eq!(late.try_recv(), None);
    }

    #[tokio::test]
    async fn lagging_connection_does_not_block_publisher() {
        let bus = Bus::new(2);
        let mut slow = bus.connect();
        let mut fast = bus.connect();
        bus.subscribe("a", slow.id());
        bus.subscribe("a", fast.id());

        for _ in 0..2 {
            assert_eq!(bus.publish("a", members_event("a")), 2);
        }

        // The slow connection's queue is full, the fast one drains in between.
        while fast.try_recv().is_some() {}
        assert_eq!(bus.publish("a", members_event("a")), 1);

        let mut received = 0;
        while slow.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn dropping_subscription_cleans_up_rooms_and_presence() {
        let bus = Bus::new(8);
        let mut watcher = bus.connect();
        let leaving = bus.connect();

        bus.subscribe("a", leaving.id());
        bus.set_online("u2", leaving.id());
        assert_eq!(bus.subscriber_count("a"), 1);

        // u2 coming online was announced to everyone
        assert_eq!(
            watcher.try_recv(),
            Some(CollabEvent::OnlineUsersChanged {
                users: vec!["u2".into()]
            })
        );

        drop(leaving);

        assert_eq!(bus.subscriber_count("a"), 0);
        assert!(bus.online_users().is_empty());
        assert_eq!(
            watcher.try_recv(),
            Some(CollabEvent::OnlineUsersChanged { users: vec![] })
        );
    }

    #[tokio::test]
    async fn user_stays_online_while_any_connection_remains() {
        let bus = Bus::new(8);
        let first = bus.connect();
        let second = bus.connect();

        bus.set_online("u1", first.id());
        bus.set_online("u1", second.id());
        bus.set_offline("u1", first.id());

        assert_eq!(bus.online_users(), vec!["u1".to_string()]);

        bus.set_offline("u1", second.id());
        assert!(bus.online_users().is_empty());
    }

    #[tokio::test]
    async fn unsubscribed_connection_stops_receiving() {
        let bus = Bus::new(8);
        let mut connection = bus.connect();

        bus.subscribe("a", connection.id());
        bus.unsubscribe("a", connection.id());
        bus.publish("a", members_event("a"));

        assert_eq!(connection.try_recv(), None);
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let bus = Bus::new(8);
        let mut connection = bus.connect();
        bus.subscribe("a", connection.id());

        bus.shutdown();

        assert_eq!(connection.recv().await, None);
        assert_eq!(bus.publish("a", members_event("a")), 0);
    }
}
