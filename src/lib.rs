//! fadechat - Multi-client chat relay with self-expiring history
//!
//! This library provides the broadcast and retention engine behind the
//! relay: a message store with time-indexed deletion, a registry of live
//! connections with fan-out, and the per-connection session that replays
//! recent history before relaying new messages.

pub mod chat;

pub use chat::{ChatConfig, ChatHub, ChatServer};
