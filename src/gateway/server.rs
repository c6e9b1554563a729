use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::gateway::reactor::Event;
use crate::protocol::{self, ClientMessage, ConnectionId, ServerMessage, PROTOCOL_VERSION};

/// TCP front door: one task per connection, all feeding the reactor queue.
pub struct GatewayServer {
    listener: TcpListener,
    max_frame_bytes: usize,
}

impl GatewayServer {
    pub async fn bind(addr: SocketAddr, max_frame_bytes: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown is requested.
    pub async fn run(self, events: mpsc::Sender<Event>, shutdown: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(addr = %addr, "Gateway listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Gateway shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = Uuid::new_v4();
                        tracing::info!(connection_id = %id, peer = %peer, "Connection accepted");
                        tokio::spawn(serve_connection(
                            stream,
                            id,
                            events.clone(),
                            self.max_frame_bytes,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }
}

/// Pump frames between one socket and the reactor.
///
/// Writes happen on a separate task fed by an unbounded channel, so the
/// reactor never waits on a slow peer.
async fn serve_connection(
    stream: TcpStream,
    id: ConnectionId,
    events: mpsc::Sender<Event>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(max_frame_bytes));
    let (mut sink, mut frames) = framed.split::<String>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    if events
        .send(Event::Connected {
            id,
            outbound: outbound_tx.clone(),
        })
        .await
        .is_err()
    {
        tracing::warn!(connection_id = %id, "Reactor unavailable, dropping connection");
        return;
    }

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let line = match protocol::encode(&message) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(connection_id = %id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                tracing::debug!(connection_id = %id, error = %e, "Write failed, closing writer");
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };

        let line = match frame {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::warn!(connection_id = %id, error = %e, "Unreadable frame, closing connection");
                let _ = outbound_tx.send(ServerMessage::protocol_error(e.to_string()));
                break;
            }
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match protocol::decode::<ClientMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Malformed frame");
                let _ = outbound_tx.send(ServerMessage::protocol_error(e.to_string()));
                continue;
            }
        };

        if let ClientMessage::Hello { version, role } = &message {
            if *version != PROTOCOL_VERSION {
                tracing::warn!(connection_id = %id, version, "Unsupported protocol version");
                let _ = outbound_tx.send(ServerMessage::protocol_error(format!(
                    "unsupported protocol version {version}, expected {PROTOCOL_VERSION}"
                )));
                break;
            }
            tracing::debug!(connection_id = %id, role = ?role, "Hello received");
        }

        if events.send(Event::Message { id, message }).await.is_err() {
            break;
        }
    }

    let _ = events.send(Event::Disconnected { id }).await;
    tracing::info!(connection_id = %id, "Connection finished");
}
