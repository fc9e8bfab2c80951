// Command handlers for the chat relay CLI

use crate::chat::cli::{ChatCommand, ServeArgs};
use crate::chat::client::{AdminClient, ChatClient};
use crate::chat::message::{ChatPayload, ServerEvent};
use crate::chat::server::ChatServer;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Execute a relay command
pub async fn execute_command(command: ChatCommand) -> Result<()> {
    match command {
        ChatCommand::Serve(args) => handle_serve(args).await,
        ChatCommand::Send {
            message,
            user,
            server,
            timeout,
        } => handle_send(server, user, message, Duration::from_secs(timeout)).await,
        ChatCommand::Listen { server, no_history } => handle_listen(server, no_history).await,
        ChatCommand::Clear { admin } => handle_clear(admin).await,
        ChatCommand::Status { admin } => handle_status(admin).await,
    }
}

async fn handle_serve(args: ServeArgs) -> Result<()> {
    let server = ChatServer::start(args.into_config()).await?;

    println!("✓ Relay running on {}", server.local_addr());
    if let Some(path) = server.socket_path() {
        println!("  Socket: {:?}", path);
    }
    if let Some(admin) = server.admin_addr() {
        println!("  Admin API: http://{}", admin);
    }
    println!(
        "  Retention: {} minutes",
        server.hub().settings().horizon.as_secs() / 60
    );

    println!("\nPress Ctrl+C to stop the relay");
    tokio::signal::ctrl_c().await?;

    println!("\nStopping relay...");
    server.shutdown().await
}

async fn handle_send(
    server: SocketAddr,
    user: String,
    message: String,
    timeout: Duration,
) -> Result<()> {
    let mut client = ChatClient::connect(server).await?;
    client.send_message(&user, &message).await?;

    // The broadcast back to us is the only confirmation there is
    let confirmed = tokio::time::timeout(timeout, async {
        while let Some(event) = client.recv().await? {
            if let ServerEvent::ChatMessage(payload) = event {
                if payload.user == user && payload.text == message {
                    return Ok::<_, anyhow::Error>(Some(payload));
                }
            }
        }
        Ok(None)
    })
    .await
    .context("Timed out waiting for the relay to broadcast the message")??;

    match confirmed {
        Some(payload) => {
            println!("✓ Sent at {} ({})", payload.time, payload.id);
            Ok(())
        }
        None => anyhow::bail!("Relay closed the connection before confirming the message"),
    }
}

async fn handle_listen(server: SocketAddr, no_history: bool) -> Result<()> {
    let mut client = ChatClient::connect(server).await?;
    println!("Connected to {} (Ctrl+C to stop)\n", server);

    loop {
        tokio::select! {
            event = client.recv() => match event? {
                Some(ServerEvent::History(messages)) => {
                    if !no_history {
                        for payload in &messages {
                            print_message(payload);
                        }
                    }
                }
                Some(ServerEvent::ChatMessage(payload)) => print_message(&payload),
                None => {
                    println!("Relay closed the connection");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

fn print_message(payload: &ChatPayload) {
    println!("[{}] {}: {}", payload.time, payload.user, payload.text);
}

async fn handle_clear(admin: SocketAddr) -> Result<()> {
    let removed = AdminClient::new(admin).clear_messages().await?;
    println!("✓ Cleared {} message(s)", removed);
    Ok(())
}

async fn handle_status(admin: SocketAddr) -> Result<()> {
    let status = AdminClient::new(admin).status().await?;

    println!("Relay status:");
    println!("  Messages: {}", status["messages"]);
    println!("  Connections: {}", status["connections"]);
    println!("  Retention: {}s", status["horizonSecs"]);

    Ok(())
}
