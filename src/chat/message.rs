// Chat messages and the wire events exchanged with clients

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored chat message
///
/// Created once by the store on receipt and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,
    /// Display name supplied by the sender
    pub user: String,
    /// Message body
    pub text: String,
    /// When the store accepted the message
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Human-readable local time of day, e.g. "3:04:05 PM"
    pub fn display_time(&self) -> String {
        self.sent_at
            .with_timezone(&Local)
            .format("%-I:%M:%S %p")
            .to_string()
    }

    /// Age of the message relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::TimeDelta {
        now - self.sent_at
    }
}

/// A message as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: Uuid,
    pub user: String,
    pub text: String,
    /// Display time derived from `created_at`
    pub time: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for ChatPayload {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            user: message.user.clone(),
            text: message.text.clone(),
            time: message.display_time(),
            created_at: message.sent_at,
        }
    }
}

/// Events sent from the relay to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Surviving history, oldest first; sent once right after connecting
    #[serde(rename = "chat history")]
    History(Vec<ChatPayload>),
    /// A newly accepted message, sent to every connection
    #[serde(rename = "chat message")]
    ChatMessage(ChatPayload),
}

impl ServerEvent {
    pub fn history(messages: &[Message]) -> Self {
        ServerEvent::History(messages.iter().map(ChatPayload::from).collect())
    }

    pub fn chat_message(message: &Message) -> Self {
        ServerEvent::ChatMessage(ChatPayload::from(message))
    }

    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::History(_) => "chat history",
            ServerEvent::ChatMessage(_) => "chat message",
        }
    }

    /// Serialize to a single JSON line (without the trailing newline)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Body of an inbound `chat message` event
///
/// Missing fields decode as empty strings so they are rejected by
/// validation instead of by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInput {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
}

impl ChatInput {
    pub fn new(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            text: text.into(),
        }
    }
}

/// Events sent from a client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "chat message")]
    ChatMessage(ChatInput),
}

impl ClientEvent {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
