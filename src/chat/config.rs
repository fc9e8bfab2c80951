// Runtime configuration for the relay

use crate::chat::hub::HubSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where messages live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Lost on restart
    Memory,
    /// SQLite database file
    Sqlite(PathBuf),
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// TCP address for chat connections
    pub listen: SocketAddr,
    /// Optional Unix socket for local chat connections
    pub socket_path: Option<PathBuf>,
    /// Address for the admin HTTP API; disabled when `None`
    pub admin: Option<SocketAddr>,
    pub store: StoreBackend,
    pub horizon: Duration,
    /// Background sweep period; `None` sweeps only when clients connect
    pub sweep_interval: Option<Duration>,
    pub delivery_timeout: Duration,
    pub outbound_buffer: usize,
}

impl ChatConfig {
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            horizon: self.horizon,
            delivery_timeout: self.delivery_timeout,
            outbound_buffer: self.outbound_buffer,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        let hub = HubSettings::default();

        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            socket_path: None,
            admin: Some(SocketAddr::from(([127, 0, 0, 1], 3001))),
            store: StoreBackend::Memory,
            horizon: hub.horizon,
            sweep_interval: Some(Duration::from_secs(5 * 60)),
            delivery_timeout: hub.delivery_timeout,
            outbound_buffer: hub.outbound_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.horizon, Duration::from_secs(3600));
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.hub_settings(), HubSettings::default());
    }
}
