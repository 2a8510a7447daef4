//! # Realtime Router
//!
//! Tracks which users are connected right now and pushes events to them.
//!
//! Delivery is best-effort. A user with no live connection simply misses the
//! push and sees the message the next time they page history. Nothing here is
//! persisted.
//!
//! ```text
//!   user id ──► [ConnectionHandle, ConnectionHandle, ...]   (one per socket)
//!                      │
//!                      └── UnboundedSender<RealtimeEvent> ──► socket writer task
//! ```
//!
//! A send that fails means the socket's writer has gone away; the handle is
//! dropped on the spot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ids::UserId;
use crate::messages::Message;

/// Events pushed to connected clients, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    /// A message arrived in one of the user's conversations.
    ReceiveMessage { message: Message },
    /// Someone started typing to the user.
    UserTyping { sender_id: UserId, receiver_id: UserId },
    /// Someone stopped typing to the user.
    UserStopTyping { sender_id: UserId, receiver_id: UserId },
}

impl RealtimeEvent {
    /// Typing indicators are never persisted and never worth retrying.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            RealtimeEvent::UserTyping { .. } | RealtimeEvent::UserStopTyping { .. }
        )
    }
}

pub type EventSender = mpsc::UnboundedSender<RealtimeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RealtimeEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// One live socket belonging to a user.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: EventSender,
}

impl ConnectionHandle {
    pub fn new(sender: EventSender) -> Self {
        Self {
            id: ConnectionId(Uuid::new_v4()),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Live user → connections map with an explicit start/stop lifecycle.
#[derive(Clone, Default)]
pub struct RealtimeRouter {
    connections: Arc<DashMap<UserId, Vec<ConnectionHandle>>>,
    running: Arc<AtomicBool>,
}

impl RealtimeRouter {
    /// A stopped router. Call [`RealtimeRouter::start`] before registering.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("Realtime router started");
        }
    }

    /// Stop accepting connections and drop every live one.
    ///
    /// Dropping the handles closes each writer's channel, which ends its
    /// socket.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let connections = self.connection_count();
            self.connections.clear();
            tracing::info!(connections, "Realtime router stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a connection for `user`.
    ///
    /// A [`stop`](Self::stop) that lands between the running check and the
    /// insert is caught by the second check, so no handle outlives the stop.
    pub fn register(&self, user: &UserId, handle: ConnectionHandle) -> Result<()> {
        if !self.is_running() {
            return Err(Error::RealtimeStopped);
        }
        let id = handle.id;
        self.connections.entry(user.clone()).or_default().push(handle);
        if !self.is_running() {
            self.unregister(user, id);
            return Err(Error::RealtimeStopped);
        }
        tracing::info!(user = %user, connection = %id, "Connection registered");
        Ok(())
    }

    /// Create a channel-backed connection and register it.
    ///
    /// The router holds the only sender, so the receiver ends once the
    /// connection is unregistered or the router stops.
    pub fn connect(&self, user: &UserId) -> Result<(ConnectionId, EventReceiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        let id = handle.id();
        self.register(user, handle)?;
        Ok((id, rx))
    }

    /// Forget a connection. Unknown connections are ignored.
    pub fn unregister(&self, user: &UserId, connection: ConnectionId) -> bool {
        let removed = match self.connections.get_mut(user) {
            Some(mut handles) => {
                let before = handles.len();
                handles.retain(|h| h.id != connection);
                handles.len() != before
            }
            None => false,
        };
        self.connections.remove_if(user, |_, handles| handles.is_empty());
        if removed {
            tracing::info!(user = %user, connection = %connection, "Connection unregistered");
        }
        removed
    }

    /// Push an event to every live connection of `user`.
    ///
    /// Returns how many connections accepted it.
    pub fn notify(&self, user: &UserId, event: RealtimeEvent) -> usize {
        let delivered = self.deliver(user, &event);
        if delivered == 0 {
            tracing::debug!(user = %user, "No live connection; event dropped");
        }
        delivered
    }

    /// Push a typing-style event. Same path as [`notify`](Self::notify), quieter.
    pub fn broadcast_ephemeral(&self, user: &UserId, event: RealtimeEvent) -> usize {
        debug_assert!(event.is_ephemeral());
        self.deliver(user, &event)
    }

    fn deliver(&self, user: &UserId, event: &RealtimeEvent) -> usize {
        if !self.is_running() {
            return 0;
        }
        let delivered = match self.connections.get_mut(user) {
            Some(mut handles) => {
                handles.retain(|h| h.sender.send(event.clone()).is_ok());
                handles.len()
            }
            None => 0,
        };
        if delivered == 0 {
            self.connections.remove_if(user, |_, handles| handles.is_empty());
        }
        delivered
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.connections
            .get(user)
            .is_some_and(|handles| !handles.is_empty())
    }

    /// Number of users with at least one connection.
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn typing(from: &str, to: &str) -> RealtimeEvent {
        RealtimeEvent::UserTyping {
            sender_id: uid(from),
            receiver_id: uid(to),
        }
    }

    fn started() -> RealtimeRouter {
        let router = RealtimeRouter::new();
        router.start();
        router
    }

    #[test]
    fn test_stopped_router_refuses_registration() {
        let router = RealtimeRouter::new();
        assert!(matches!(router.connect(&uid("alice")), Err(Error::RealtimeStopped)));
        assert_eq!(router.notify(&uid("alice"), typing("bob", "alice")), 0);
    }

    #[test]
    fn test_notify_reaches_every_connection() {
        let router = started();
        let alice = uid("alice");
        let (_h1, mut rx1) = router.connect(&alice).unwrap();
        let (_h2, mut rx2) = router.connect(&alice).unwrap();

        assert_eq!(router.notify(&alice, typing("bob", "alice")), 2);
        assert!(matches!(rx1.try_recv(), Ok(RealtimeEvent::UserTyping { .. })));
        assert!(matches!(rx2.try_recv(), Ok(RealtimeEvent::UserTyping { .. })));
        assert_eq!(router.online_count(), 1);
        assert_eq!(router.connection_count(), 2);
    }

    #[test]
    fn test_offline_user_drops_event() {
        let router = started();
        assert_eq!(router.notify(&uid("ghost"), typing("bob", "ghost")), 0);
        assert!(!router.is_online(&uid("ghost")));
    }

    #[test]
    fn test_unregister_is_tolerant() {
        let router = started();
        let alice = uid("alice");
        let (connection, _rx) = router.connect(&alice).unwrap();

        assert!(router.unregister(&alice, connection));
        assert!(!router.unregister(&alice, connection));
        assert!(!router.is_online(&alice));
        assert_eq!(router.online_count(), 0);
    }

    #[test]
    fn test_closed_connections_are_pruned() {
        let router = started();
        let alice = uid("alice");
        let (_live, mut live_rx) = router.connect(&alice).unwrap();
        let (_dead, dead_rx) = router.connect(&alice).unwrap();
        drop(dead_rx);

        assert_eq!(router.broadcast_ephemeral(&alice, typing("bob", "alice")), 1);
        assert_eq!(router.connection_count(), 1);
        assert!(live_rx.try_recv().is_ok());

        drop(live_rx);
        assert_eq!(router.broadcast_ephemeral(&alice, typing("bob", "alice")), 0);
        assert_eq!(router.online_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_closes_connections() {
        let router = started();
        let (_connection, mut rx) = router.connect(&uid("alice")).unwrap();

        router.stop();
        assert!(!router.is_running());
        assert_eq!(router.connection_count(), 0);
        // Channel closed: the writer task would exit here
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_stop_during_connects_leaves_no_connections() {
        let router = started();
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                std::thread::spawn(move || {
                    let user = uid(&format!("user{i}"));
                    (0..200).filter(|_| router.connect(&user).is_ok()).count()
                })
            })
            .collect();

        router.stop();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(router.connection_count(), 0);
        assert_eq!(router.online_count(), 0);
        assert!(matches!(router.connect(&uid("late")), Err(Error::RealtimeStopped)));
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(typing("bob", "alice")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "user_typing", "senderId": "bob", "receiverId": "alice"})
        );
    }
}
