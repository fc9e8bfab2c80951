// Chat relay with self-expiring history
//
// Clients connect over a persistent line-delimited JSON channel, receive the
// recent history, and every message they send is stored and broadcast to
// all connected peers. Messages older than the retention horizon are swept
// whenever a client connects and, optionally, on a timer.

pub mod admin;
pub mod broadcaster;
pub mod cli;
pub mod client;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod retention;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

pub use broadcaster::Broadcaster;
pub use cli::{ChatCli, ChatCommand};
pub use client::{AdminClient, ChatClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::execute_command;
pub use config::{ChatConfig, StoreBackend};
pub use error::{ChatError, DeliveryError, StorageError};
pub use hub::{ChatHub, HubSettings};
pub use message::{ChatInput, ChatPayload, ClientEvent, Message, ServerEvent};
pub use registry::{BroadcastReport, ConnectionHandle, ConnectionRegistry};
pub use retention::{cutoff_for, RetentionPolicy};
pub use server::ChatServer;
pub use session::{ChatSession, ReplayGate, SessionState};
pub use store::{MemoryStore, MessageStore, SqliteStore};
pub use transport::serve_connection;
