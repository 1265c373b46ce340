//! Registry of live push connections.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::messages::PushMessage;

/// Messages queued per connection before further sends to it fail.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Lifecycle of a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted at the transport level, identity not yet checked.
    Connecting,
    /// Registered in the hub and receiving messages.
    Open,
    /// Gone; will be (or has been) removed from the hub.
    Closed,
}

/// Which connections a message is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every live connection.
    All,
    /// Connections authenticated as this user.
    Owner(String),
    /// No connection.
    Nobody,
}

impl Audience {
    /// Check if a connection with `identity` belongs to this audience.
    pub fn includes(&self, identity: Option<&str>) -> bool {
        match self {
            Audience::All => true,
            Audience::Owner(owner) => identity == Some(owner.as_str()),
            Audience::Nobody => false,
        }
    }
}

/// A connection that passed transport accept but is not registered yet.
#[derive(Debug)]
pub struct PendingConnection {
    id: Uuid,
    identity: Option<String>,
}

impl PendingConnection {
    /// Create a pending connection for `identity` (`None` = anonymous).
    pub fn new(identity: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
        }
    }

    /// Connection ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::Connecting
    }
}

/// A registered connection, held by its socket task.
#[derive(Debug)]
pub struct OpenConnection {
    id: Uuid,
    identity: Option<String>,
    receiver: mpsc::Receiver<PushMessage>,
}

impl OpenConnection {
    /// Connection ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Authenticated identity.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Wait for the next message; `None` once the hub dropped the
    /// connection.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.receiver.recv().await
    }

    /// Take the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<PushMessage> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Clone)]
struct LiveConnection {
    identity: Option<String>,
    sender: mpsc::Sender<PushMessage>,
}

impl LiveConnection {
    fn state(&self) -> ConnectionState {
        if self.sender.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }
}

/// Set of live push connections.
#[derive(Debug)]
pub struct PushHub {
    connections: RwLock<HashMap<Uuid, LiveConnection>>,
    queue_capacity: usize,
}

impl Default for PushHub {
    fn default() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl PushHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub queueing at most `capacity` messages per
    /// connection (at least one).
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_capacity: capacity.max(1),
        }
    }

    /// Register a connection whose identity check passed.
    ///
    /// The `Connected` message is queued before the connection becomes
    /// visible to broadcasts, so it is always the first frame.
    pub async fn open(&self, pending: PendingConnection) -> OpenConnection {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let _ = sender.try_send(PushMessage::Connected);

        self.connections.write().await.insert(
            pending.id,
            LiveConnection {
                identity: pending.identity.clone(),
                sender,
            },
        );
        debug!(
            "Push connection {} open ({})",
            pending.id,
            pending.identity.as_deref().unwrap_or("anonymous")
        );

        OpenConnection {
            id: pending.id,
            identity: pending.identity,
            receiver,
        }
    }

    /// Remove a connection. Removing an unknown or already removed
    /// connection is a no-op.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            debug!("Push connection {} removed", id);
        }
        removed
    }

    /// Drop every connection whose socket task has gone away.
    ///
    /// Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut connections = self.connections.write().await;
        let before = connections.len();
        connections.retain(|_, c| c.state() == ConnectionState::Open);
        before - connections.len()
    }

    /// Send `message` to every connection in `audience`.
    ///
    /// Works on a snapshot of the set, so connects and disconnects during
    /// delivery are harmless. Sends never wait: a closed connection or one
    /// whose queue is full is skipped. Returns the number of connections the
    /// message was queued for.
    pub async fn broadcast(&self, message: &PushMessage, audience: &Audience) -> usize {
        if *audience == Audience::Nobody {
            return 0;
        }

        let targets: Vec<(Uuid, mpsc::Sender<PushMessage>)> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| audience.includes(c.identity.as_deref()))
            .map(|(id, c)| (*id, c.sender.clone()))
            .collect();

        targets
            .iter()
            .filter(|(id, sender)| match sender.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Push connection {} is not reading, dropping message", id);
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            })
            .count()
    }

    /// State of a connection as seen by the hub.
    pub async fn state(&self, id: Uuid) -> ConnectionState {
        match self.connections.read().await.get(&id) {
            Some(connection) => connection.state(),
            None => ConnectionState::Closed,
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connected_is_first_frame() {
        let hub = PushHub::new();
        let mut conn = hub.open(PendingConnection::new(None)).await;
        hub.broadcast(&PushMessage::BinEmptied, &Audience::All).await;

        assert_eq!(conn.recv().await, Some(PushMessage::Connected));
        assert_eq!(conn.recv().await, Some(PushMessage::BinEmptied));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let hub = PushHub::new();
        let pending = PendingConnection::new(Some("u1".into()));
        assert_eq!(pending.state(), ConnectionState::Connecting);

        let conn = hub.open(pending).await;
        let id = conn.id();
        assert_eq!(hub.state(id).await, ConnectionState::Open);

        drop(conn);
        assert_eq!(hub.state(id).await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_owner_audience() {
        let hub = PushHub::new();
        let mut u1 = hub.open(PendingConnection::new(Some("u1".into()))).await;
        let mut u2 = hub.open(PendingConnection::new(Some("u2".into()))).await;
        let mut anon = hub.open(PendingConnection::new(None)).await;
        for conn in [&mut u1, &mut u2, &mut anon] {
            conn.recv().await;
        }

        let sent = hub
            .broadcast(&PushMessage::AddressAdded, &Audience::Owner("u1".into()))
            .await;
        assert_eq!(sent, 1);
        assert_eq!(u1.recv().await, Some(PushMessage::AddressAdded));
        assert!(u2.receiver.try_recv().is_err());
        assert!(anon.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_nobody_audience() {
        let hub = PushHub::new();
        let _conn = hub.open(PendingConnection::new(None)).await;
        assert_eq!(
            hub.broadcast(&PushMessage::BinRestored, &Audience::Nobody).await,
            0
        );
    }

    #[tokio::test]
    async fn test_closed_connection_does_not_block_others() {
        let hub = PushHub::new();
        let dead = hub.open(PendingConnection::new(None)).await;
        let mut alive = hub.open(PendingConnection::new(None)).await;
        alive.recv().await;
        drop(dead);

        let sent = hub
            .broadcast(&PushMessage::Received("box".into()), &Audience::All)
            .await;
        assert_eq!(sent, 1);
        assert_eq!(
            alive.recv().await,
            Some(PushMessage::Received("box".into()))
        );
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_failed_send() {
        let hub = PushHub::with_queue_capacity(2);
        let mut stalled = hub.open(PendingConnection::new(None)).await;
        let mut reading = hub.open(PendingConnection::new(None)).await;
        reading.recv().await;

        // Connected occupies one slot of the stalled queue.
        assert_eq!(hub.broadcast(&PushMessage::BinEmptied, &Audience::All).await, 2);
        reading.recv().await;
        assert_eq!(hub.broadcast(&PushMessage::BinRestored, &Audience::All).await, 1);
        assert_eq!(hub.state(stalled.id()).await, ConnectionState::Open);

        assert_eq!(stalled.try_recv(), Some(PushMessage::Connected));
        assert_eq!(stalled.try_recv(), Some(PushMessage::BinEmptied));
        assert_eq!(stalled.try_recv(), None);
        assert_eq!(reading.try_recv(), Some(PushMessage::BinRestored));
    }

    #[tokio::test]
    async fn test_zero_capacity_still_delivers_connected() {
        let hub = PushHub::with_queue_capacity(0);
        let mut conn = hub.open(PendingConnection::new(None)).await;
        assert_eq!(conn.recv().await, Some(PushMessage::Connected));
    }

    #[tokio::test]
    async fn test_remove_and_sweep_are_idempotent() {
        let hub = PushHub::new();
        let a = hub.open(PendingConnection::new(None)).await;
        let b = hub.open(PendingConnection::new(None)).await;
        let _c = hub.open(PendingConnection::new(None)).await;
        assert_eq!(hub.connection_count().await, 3);

        let a_id = a.id();
        drop(a);
        drop(b);

        assert!(hub.remove(a_id).await);
        assert!(!hub.remove(a_id).await);
        assert_eq!(hub.sweep().await, 1);
        assert_eq!(hub.sweep().await, 0);
        assert!(!hub.remove(a_id).await);
        assert_eq!(hub.connection_count().await, 1);
    }
}
