// Newline-delimited JSON transport over any byte stream

use crate::chat::hub::ChatHub;
use crate::chat::message::{ClientEvent, ServerEvent};
use crate::chat::session::{ChatSession, ReplayGate, SessionState};
use futures::{future, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

/// Longest accepted line, in bytes
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Serve one client connection until it closes
///
/// Works for TCP, Unix sockets or in-process duplex pipes alike.
pub async fn serve_connection<S>(
    stream: S,
    hub: Arc<ChatHub>,
    shutdown: CancellationToken,
) -> SessionState
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let settings = hub.settings();

    let (outgoing_tx, outgoing_rx) = mpsc::channel(settings.outbound_buffer.max(1));

    // Spawn task to handle outgoing events
    let mut write_task = tokio::spawn(write_events(
        FramedWrite::new(write_half, LinesCodec::new()),
        outgoing_rx,
    ));

    let inbound = Box::pin(read_events(FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
    )));

    let session = ChatSession::new(hub, outgoing_tx);
    let id = session.id();
    let state = session.run(inbound, shutdown).await;

    // The writer ends once every sender is gone; give queued events a chance
    // to flush, but never wait on a peer that stopped reading
    if tokio::time::timeout(settings.delivery_timeout, &mut write_task)
        .await
        .is_err()
    {
        tracing::debug!("Abandoning unflushed output for connection {}", id);
        write_task.abort();
    }

    state
}

/// Decode inbound lines into events; ends on EOF or a read error
fn read_events<R>(lines: FramedRead<R, LinesCodec>) -> impl Stream<Item = ClientEvent>
where
    R: AsyncRead,
{
    lines
        .take_while(|line| {
            future::ready(match line {
                Ok(_) => true,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!("Inbound line exceeds {} bytes, closing", MAX_LINE_LENGTH);
                    false
                }
                Err(LinesCodecError::Io(e)) => {
                    tracing::debug!("Error reading from client: {}", e);
                    false
                }
            })
        })
        .filter_map(|line| {
            future::ready(match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => match ClientEvent::from_line(line.trim()) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!("Failed to parse client event: {}", e);
                        None
                    }
                },
                Err(_) => None,
            })
        })
}

async fn write_events<W>(
    mut sink: FramedWrite<W, LinesCodec>,
    mut outgoing_rx: mpsc::Receiver<ServerEvent>,
) where
    W: AsyncWrite + Unpin,
{
    let mut gate = ReplayGate::default();

    'outgoing: while let Some(event) = outgoing_rx.recv().await {
        for event in gate.admit(event) {
            let line = match event.to_line() {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to encode {} event: {}", event.name(), e);
                    continue;
                }
            };

            if let Err(e) = sink.send(line).await {
                tracing::debug!("Error writing to client: {}", e);
                break 'outgoing;
            }
        }
    }
}
