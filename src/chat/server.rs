// Relay server: listeners, sweeper and admin API wired to one hub

use crate::chat::admin;
use crate::chat::clock::{Clock, SystemClock};
use crate::chat::config::{ChatConfig, StoreBackend};
use crate::chat::hub::ChatHub;
use crate::chat::store::{MemoryStore, MessageStore, SqliteStore};
use crate::chat::transport::serve_connection;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running relay
pub struct ChatServer {
    hub: Arc<ChatHub>,
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    socket_path: Option<PathBuf>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatServer {
    /// Open the configured store and start serving
    pub async fn start(config: ChatConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn MessageStore> = match &config.store {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory message store");
                Arc::new(MemoryStore::new(clock.clone()))
            }
            StoreBackend::Sqlite(path) => {
                tracing::info!("Using SQLite message store at {:?}", path);
                Arc::new(
                    SqliteStore::open(path, clock.clone())
                        .with_context(|| format!("Failed to open message store {:?}", path))?,
                )
            }
        };

        Self::start_with(config, store, clock).await
    }

    /// Start serving on top of an existing store
    pub async fn start_with(
        config: ChatConfig,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let hub = Arc::new(ChatHub::new(store, clock, config.hub_settings()));
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("Failed to bind chat listener on {}", config.listen))?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Chat listening on {}", local_addr);

        tasks.push(tokio::spawn(run_tcp_listener(
            listener,
            hub.clone(),
            shutdown.clone(),
        )));

        if let Some(path) = &config.socket_path {
            // Remove old socket if exists
            let _ = std::fs::remove_file(path);

            let listener = UnixListener::bind(path)
                .with_context(|| format!("Failed to bind Unix socket {:?}", path))?;
            tracing::info!("Chat listening on {:?}", path);

            tasks.push(tokio::spawn(run_unix_listener(
                listener,
                path.clone(),
                hub.clone(),
                shutdown.clone(),
            )));
        }

        let admin_addr = match config.admin {
            Some(addr) => {
                let (bound, task) = admin::spawn_admin_server(addr, hub.clone(), shutdown.clone())
                    .with_context(|| format!("Failed to bind admin API on {}", addr))?;
                tracing::info!("Admin API listening on http://{}", bound);
                tasks.push(task);
                Some(bound)
            }
            None => None,
        };

        match config.sweep_interval {
            Some(interval) if !interval.is_zero() => {
                tasks.push(hub.clone().start_sweep_task(interval, shutdown.clone()));
            }
            _ => tracing::info!("Periodic sweep disabled; expiring messages on connect only"),
        }

        tracing::info!(
            "Relay started (retention horizon {}s)",
            config.horizon.as_secs()
        );

        Ok(Self {
            hub,
            local_addr,
            admin_addr,
            socket_path: config.socket_path,
            shutdown,
            tasks,
        })
    }

    pub fn hub(&self) -> &Arc<ChatHub> {
        &self.hub
    }

    /// Bound chat address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Stop accepting, close every session and wait for background tasks
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Relay shutting down");
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Server task ended abnormally: {}", e);
            }
        }

        Ok(())
    }
}

async fn run_tcp_listener(listener: TcpListener, hub: Arc<ChatHub>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::debug!("Accepted connection from {}", addr);
                        tokio::spawn(serve_connection(stream, hub.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Chat listener shutting down");
                break;
            }
        }
    }
}

async fn run_unix_listener(
    listener: UnixListener,
    socket_path: PathBuf,
    hub: Arc<ChatHub>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        tokio::spawn(serve_connection(stream, hub.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Unix socket listener shutting down");
                break;
            }
        }
    }

    // Cleanup
    let _ = std::fs::remove_file(&socket_path);
}
