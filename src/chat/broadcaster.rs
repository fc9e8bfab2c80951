// Persist-then-fan-out for new chat messages

use crate::chat::error::ChatError;
use crate::chat::message::{Message, ServerEvent};
use crate::chat::registry::ConnectionRegistry;
use crate::chat::store::MessageStore;
use std::sync::Arc;

/// Accepts new messages, stores them and emits them to every connection
///
/// The sender gets no private echo: the broadcast is its confirmation.
/// Append and broadcast are not atomic; a message stored just before a
/// crash still shows up in the next connection's history.
#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Store a message and broadcast it
    pub async fn submit(&self, user: &str, text: &str) -> Result<Message, ChatError> {
        validate(user, text)?;

        let message = self.store.append(user, text)?;
        tracing::debug!("Message {} from {} stored", message.id, message.user);

        let report = self
            .registry
            .broadcast(ServerEvent::chat_message(&message))
            .await;

        tracing::info!(
            "Message {} from {} delivered to {} connection(s), {} evicted",
            message.id,
            message.user,
            report.delivered,
            report.evicted
        );

        Ok(message)
    }
}

fn validate(user: &str, text: &str) -> Result<(), ChatError> {
    if user.trim().is_empty() {
        return Err(ChatError::Validation("user is required".to_string()));
    }
    if text.trim().is_empty() {
        return Err(ChatError::Validation("text is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::clock::SystemClock;
    use crate::chat::registry::ConnectionHandle;
    use crate::chat::error::StorageError;
    use crate::chat::store::{FailingStore, MemoryStore};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (Broadcaster, Arc<dyn MessageStore>, Arc<ConnectionRegistry>) {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        let broadcaster = Broadcaster::new(store.clone(), registry.clone());
        (broadcaster, store, registry)
    }

    #[tokio::test]
    async fn test_submit_stores_and_broadcasts() {
        let (broadcaster, store, registry) = setup();

        let (tx, mut rx) = mpsc::channel(4);
        registry.register(ConnectionHandle::new(tx)).await;

        let message = broadcaster.submit("alice", "hi").await.unwrap();

        assert_eq!(store.list_ordered().unwrap(), vec![message.clone()]);
        match rx.recv().await {
            Some(ServerEvent::ChatMessage(payload)) => {
                assert_eq!(payload.id, message.id);
                assert_eq!(payload.user, "alice");
                assert_eq!(payload.text, "hi");
                assert_eq!(payload.created_at, message.sent_at);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_fields_are_rejected() {
        let (broadcaster, store, registry) = setup();

        let (tx, mut rx) = mpsc::channel(4);
        registry.register(ConnectionHandle::new(tx)).await;

        for (user, text) in [("alice", ""), ("", "hi"), ("alice", "   ")] {
            let result = broadcaster.submit(user, text).await;
            assert!(matches!(result, Err(ChatError::Validation(_))));
        }

        assert_eq!(store.count().unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_append_is_not_broadcast() {
        let store = Arc::new(FailingStore::new(Arc::new(SystemClock)));
        store.fail_append.store(true, Ordering::SeqCst);
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        let broadcaster = Broadcaster::new(store.clone(), registry.clone());

        let (tx, mut rx) = mpsc::channel(4);
        registry.register(ConnectionHandle::new(tx)).await;

        let result = broadcaster.submit("alice", "hi").await;
        assert!(matches!(result, Err(ChatError::Storage(StorageError::Poisoned))));

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len().await, 1);
    }
}
