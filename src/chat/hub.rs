// Process-wide chat state: store, registry, retention and fan-out

use crate::chat::broadcaster::Broadcaster;
use crate::chat::clock::Clock;
use crate::chat::error::ChatError;
use crate::chat::message::Message;
use crate::chat::registry::ConnectionRegistry;
use crate::chat::retention::RetentionPolicy;
use crate::chat::store::MessageStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tunables shared by every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Maximum message age before it is swept
    pub horizon: Duration,
    /// How long a single delivery may wait on a full outbound queue
    pub delivery_timeout: Duration,
    /// Outbound queue length per connection
    pub outbound_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            horizon: crate::chat::retention::DEFAULT_HORIZON,
            delivery_timeout: Duration::from_secs(5),
            outbound_buffer: 64,
        }
    }
}

/// The single shared store/registry pair, created once at startup
pub struct ChatHub {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    settings: HubSettings,
}

impl ChatHub {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, settings: HubSettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(settings.delivery_timeout));
        let broadcaster = Broadcaster::new(store.clone(), registry.clone());

        Self {
            store,
            registry,
            broadcaster,
            policy: RetentionPolicy::new(settings.horizon),
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Delete every message older than the horizon
    pub fn sweep(&self) -> Result<usize, ChatError> {
        let cutoff = self.policy.cutoff(self.clock.now());
        let removed = self.store.delete_older_than(cutoff)?;

        if removed > 0 {
            tracing::debug!("Swept {} expired message(s) older than {}", removed, cutoff);
        }

        Ok(removed)
    }

    /// Sweep, then return what survives, oldest first
    pub fn fresh_history(&self) -> Result<Vec<Message>, ChatError> {
        self.sweep()?;
        Ok(self.store.list_ordered()?)
    }

    /// Administrative reset, independent of the horizon
    pub fn clear_all(&self) -> Result<usize, ChatError> {
        let removed = self.store.clear_all()?;
        tracing::info!("Cleared all messages ({} removed)", removed);
        Ok(removed)
    }

    /// Start background task that sweeps expired messages every `interval`
    pub fn start_sweep_task(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match self.sweep() {
                            Ok(0) => {}
                            Ok(removed) => tracing::info!(
                                "Periodic sweep removed {} expired message(s)",
                                removed
                            ),
                            Err(e) => tracing::error!("Periodic sweep failed: {}", e),
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }

            tracing::debug!("Sweep task stopped");
        })
    }
}
