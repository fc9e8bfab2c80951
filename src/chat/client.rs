// Clients for the chat relay and its admin API

use crate::chat::message::{ChatInput, ClientEvent, ServerEvent};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use hyper::{Body, Client, Method, Request};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// A chat connection over TCP
pub struct ChatClient {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl ChatClient {
    /// Connect to a relay
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to relay at {}", addr))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            // A history replay is one line and may be far larger than any
            // single inbound message, so relay output is read uncapped
            reader: FramedRead::new(read_half, LinesCodec::new()),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
        })
    }

    /// Next event from the relay; `None` once the relay hangs up
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>> {
        match self.reader.next().await {
            Some(line) => {
                let line = line.context("Failed to read from relay")?;
                let event = ServerEvent::from_line(&line).context("Malformed event from relay")?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Submit a chat message; it comes back as a `chat message` broadcast
    pub async fn send_message(&mut self, user: &str, text: &str) -> Result<()> {
        let line = ClientEvent::ChatMessage(ChatInput::new(user, text)).to_line()?;
        self.writer
            .send(line)
            .await
            .context("Failed to send message to relay")
    }
}

/// Calls the admin HTTP API
pub struct AdminClient {
    base: String,
    http: Client<hyper::client::HttpConnector>,
}

impl AdminClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            base: format!("http://{}", addr),
            http: Client::new(),
        }
    }

    /// Remove every stored message; returns how many were removed
    pub async fn clear_messages(&self) -> Result<u64> {
        let body = self.call(Method::DELETE, "/clear-messages").await?;

        if body["success"].as_bool() != Some(true) {
            let error = body["error"].as_str().unwrap_or("unknown error");
            anyhow::bail!("Relay refused to clear messages: {}", error);
        }

        Ok(body["removed"].as_u64().unwrap_or(0))
    }

    /// Raw status document
    pub async fn status(&self) -> Result<serde_json::Value> {
        self.call(Method::GET, "/status").await
    }

    async fn call(&self, method: Method, path: &str) -> Result<serde_json::Value> {
        let request = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base, path))
            .body(Body::empty())
            .context("Failed to build admin request")?;

        let response = self
            .http
            .request(request)
            .await
            .with_context(|| format!("Admin API at {} unreachable", self.base))?;

        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read admin response")?;

        serde_json::from_slice(&bytes).context("Admin API returned invalid JSON")
    }
}
