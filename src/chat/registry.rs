// Live connection tracking and fan-out

use crate::chat::error::DeliveryError;
use crate::chat::message::ServerEvent;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Sending side of one live connection
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle for a connection's outbound queue
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelled once the handle leaves the registry, for whatever reason
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue an event for this connection, waiting at most `timeout`
    pub async fn deliver(&self, event: ServerEvent, timeout: Duration) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed(self.id));
        }

        match tokio::time::timeout(timeout, self.tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed(self.id)),
            Err(_) => Err(DeliveryError::TimedOut(self.id, timeout)),
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Tracks all live connections
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    delivery_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create a new registry
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            delivery_timeout,
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Add a live connection
    pub async fn register(&self, handle: ConnectionHandle) {
        let id = handle.id;
        let mut connections = self.connections.write().await;
        connections.insert(id, handle);
        tracing::info!("Connection {} registered ({} live)", id, connections.len());
    }

    /// Remove a connection; returns false if it was already gone
    pub async fn unregister(&self, id: Uuid) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(&id)
        };

        match removed {
            Some(handle) => {
                handle.closed.cancel();
                tracing::info!("Connection {} unregistered", id);
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every registered connection
    ///
    /// Deliveries run concurrently, each bounded by the delivery timeout.
    /// Connections that fail are removed after the fan-out completes; the
    /// failure never reaches the caller.
    pub async fn broadcast(&self, event: ServerEvent) -> BroadcastReport {
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let deliveries = targets.iter().map(|handle| {
            let event = event.clone();
            async move { handle.deliver(event, self.delivery_timeout).await }
        });

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (handle, result) in targets.iter().zip(join_all(deliveries).await) {
            match result {
                Ok(()) => report.delivered += 1,
                // Unregistered while the broadcast was in flight
                Err(DeliveryError::Closed(_)) if handle.is_closed() => {}
                Err(e) => {
                    tracing::warn!("Failed to deliver {} event: {}", event.name(), e);
                    failed.push(e.connection_id());
                }
            }
        }

        for id in failed {
            if self.unregister(id).await {
                tracing::info!("Removed failed connection {}", id);
                report.evicted += 1;
            }
        }

        report
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.connections.read().await.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Message;
    use chrono::Utc;

    fn event(text: &str) -> ServerEvent {
        ServerEvent::chat_message(&Message {
            id: Uuid::new_v4(),
            user: "alice".to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ConnectionRegistry::new(Duration::from_millis(100));

        let (tx, _rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx);
        let id = handle.id();
        let closed = handle.closed();

        registry.register(handle).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(id).await);

        assert!(registry.unregister(id).await);
        assert!(registry.is_empty().await);
        assert!(closed.is_cancelled());

        // Second removal is a no-op
        assert!(!registry.unregister(id).await);
    }

    fn text_of(event: Option<ServerEvent>) -> String {
        match event {
            Some(ServerEvent::ChatMessage(payload)) => payload.text,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_once() {
        let registry = ConnectionRegistry::new(Duration::from_millis(100));

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(4);
            registry.register(ConnectionHandle::new(tx)).await;
            receivers.push(rx);
        }

        let report = registry.broadcast(event("hello")).await;
        assert_eq!(report, BroadcastReport { delivered: 3, evicted: 0 });

        for rx in receivers.iter_mut() {
            assert_eq!(text_of(rx.recv().await), "hello");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_closed_connection_is_evicted() {
        let registry = ConnectionRegistry::new(Duration::from_millis(100));

        let (live_tx, mut live_rx) = mpsc::channel(4);
        registry.register(ConnectionHandle::new(live_tx)).await;

        let (dead_tx, dead_rx) = mpsc::channel(4);
        let dead = ConnectionHandle::new(dead_tx);
        let dead_id = dead.id();
        let dead_closed = dead.closed();
        registry.register(dead).await;
        drop(dead_rx);

        let report = registry.broadcast(event("first")).await;
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert!(!registry.contains(dead_id).await);
        assert!(dead_closed.is_cancelled());
        assert_eq!(text_of(live_rx.recv().await), "first");

        // Later broadcasts no longer see the dead connection
        let report = registry.broadcast(event("second")).await;
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 0 });
        assert_eq!(text_of(live_rx.recv().await), "second");
    }

    #[tokio::test]
    async fn test_stuck_connection_does_not_stall_others() {
        let timeout = Duration::from_millis(50);
        let registry = ConnectionRegistry::new(timeout);

        // Queue of one that nobody drains
        let (stuck_tx, _stuck_rx) = mpsc::channel(1);
        let stuck = ConnectionHandle::new(stuck_tx);
        let stuck_id = stuck.id();
        registry.register(stuck).await;

        let (live_tx, mut live_rx) = mpsc::channel(8);
        registry.register(ConnectionHandle::new(live_tx)).await;

        let report = registry.broadcast(event("fills the queue")).await;
        assert_eq!(report.delivered, 2);

        let started = std::time::Instant::now();
        let report = registry.broadcast(event("times out")).await;
        assert!(started.elapsed() < timeout * 10);
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert!(!registry.contains(stuck_id).await);

        assert_eq!(text_of(live_rx.recv().await), "fills the queue");
        assert_eq!(text_of(live_rx.recv().await), "times out");
    }

    #[tokio::test]
    async fn test_unregistered_handle_is_not_delivered_to() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx);
        let registry = ConnectionRegistry::new(Duration::from_millis(100));
        registry.register(handle.clone()).await;
        registry.unregister(handle.id()).await;

        let result = handle.deliver(event("late"), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(DeliveryError::Closed(_))));
        assert!(rx.try_recv().is_err());
    }
}
