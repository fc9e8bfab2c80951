// Per-connection lifecycle: register, replay history, relay messages, close

use crate::chat::error::ChatError;
use crate::chat::hub::ChatHub;
use crate::chat::message::{ChatInput, ClientEvent, ServerEvent};
use crate::chat::registry::ConnectionHandle;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// One client connection
///
/// On activation the session sweeps expired messages and sends the
/// survivors to this connection only, as a single `chat history` event.
/// Afterwards every inbound `chat message` goes through the broadcaster.
///
/// The session registers before it lists history, so broadcasts racing the
/// replay can land in the outbound queue ahead of it or duplicate an entry
/// of it. Whoever drains the queue runs it through a [`ReplayGate`].
pub struct ChatSession {
    hub: Arc<ChatHub>,
    handle: ConnectionHandle,
    state: SessionState,
}

impl ChatSession {
    /// Create a session that writes to `outbound`
    pub fn new(hub: Arc<ChatHub>, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            hub,
            handle: ConnectionHandle::new(outbound),
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the peer goes away, it is evicted, or the
    /// server shuts down. Always leaves the registry clean.
    pub async fn run<I>(mut self, mut inbound: I, shutdown: CancellationToken) -> SessionState
    where
        I: Stream<Item = ClientEvent> + Unpin,
    {
        if let Err(e) = self.activate().await {
            tracing::error!("Closing connection {}: {}", self.id(), e);
            self.close().await;
            return self.state;
        }

        let evicted = self.handle.closed();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Connection {} closing for shutdown", self.id());
                    break;
                }
                _ = evicted.cancelled() => {
                    tracing::info!("Connection {} was dropped by the registry", self.id());
                    break;
                }
                event = inbound.next() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }

        self.close().await;
        self.state
    }

    /// Connecting -> Active
    async fn activate(&mut self) -> Result<(), ChatError> {
        self.hub.registry().register(self.handle.clone()).await;
        self.state = SessionState::Active;

        let history = self.hub.fresh_history()?;
        let count = history.len();

        self.handle
            .deliver(
                ServerEvent::history(&history),
                self.hub.settings().delivery_timeout,
            )
            .await?;

        tracing::debug!("Sent {} history message(s) to connection {}", count, self.id());
        Ok(())
    }

    async fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::ChatMessage(input) => self.on_chat_message(input).await,
        }
    }

    async fn on_chat_message(&self, input: ChatInput) {
        match self.hub.broadcaster().submit(&input.user, &input.text).await {
            Ok(_) => {}
            Err(ChatError::Validation(reason)) => {
                tracing::warn!("Dropped message from connection {}: {}", self.id(), reason);
            }
            Err(e) => {
                tracing::error!("Failed to relay message from connection {}: {}", self.id(), e);
            }
        }
    }

    /// Any state -> Closed
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.hub.registry().unregister(self.id()).await;
        self.state = SessionState::Closed;
    }
}

/// Orders one connection's outbound events: history first, and no message
/// both inside the history and as a live `chat message`
#[derive(Debug, Default)]
pub struct ReplayGate {
    /// Ids from the history not yet seen live; `None` until history passes
    replayed: Option<HashSet<Uuid>>,
    held: Vec<ServerEvent>,
}

impl ReplayGate {
    /// Events that may be written now, in order
    pub fn admit(&mut self, event: ServerEvent) -> Vec<ServerEvent> {
        let Some(replayed) = self.replayed.as_mut() else {
            return self.hold(event);
        };

        if let ServerEvent::ChatMessage(payload) = &event {
            if replayed.remove(&payload.id) {
                return Vec::new();
            }
        }

        vec![event]
    }

    fn hold(&mut self, event: ServerEvent) -> Vec<ServerEvent> {
        let ServerEvent::History(messages) = event else {
            self.held.push(event);
            return Vec::new();
        };

        let mut replayed: HashSet<Uuid> = messages.iter().map(|m| m.id).collect();
        let mut ready = vec![ServerEvent::History(messages)];

        for held in self.held.drain(..) {
            let duplicate = matches!(
                &held,
                ServerEvent::ChatMessage(payload) if replayed.remove(&payload.id)
            );
            if !duplicate {
                ready.push(held);
            }
        }

        self.replayed = Some(replayed);
        ready
    }
}
