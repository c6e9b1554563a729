use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::{BrokerError, Result};
use crate::protocol::{self, ClientMessage, ConnectionId, Role, ServerMessage, PROTOCOL_VERSION};

/// Default frame limit for client connections, matching the broker's.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 100_000_000;

/// One line-delimited JSON connection to the broker.
pub struct BrokerClient {
    framed: Framed<TcpStream, LinesCodec>,
    connection_id: ConnectionId,
}

impl BrokerClient {
    /// Connect and complete the hello/welcome handshake.
    pub async fn connect(addr: SocketAddr, role: Role) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = Framed::new(
            stream,
            LinesCodec::new_with_max_length(DEFAULT_MAX_FRAME_BYTES),
        );

        let hello = ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            role,
        };
        framed.send(protocol::encode(&hello)?).await?;

        let connection_id = match Self::next_frame(&mut framed).await? {
            Some(ServerMessage::Welcome(welcome)) => welcome.connection_id,
            Some(ServerMessage::ProtocolError(e)) => return Err(BrokerError::Protocol(e.message)),
            Some(other) => {
                return Err(BrokerError::Protocol(format!(
                    "expected welcome, got {other:?}"
                )))
            }
            None => {
                return Err(BrokerError::Protocol(
                    "connection closed during handshake".into(),
                ))
            }
        };

        tracing::debug!(addr = %addr, connection_id = %connection_id, role = ?role, "Connected to broker");
        Ok(Self {
            framed,
            connection_id,
        })
    }

    /// The identity the broker assigned to this connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.framed.send(protocol::encode(message)?).await?;
        Ok(())
    }

    /// Next frame from the broker, or `None` once the connection closes.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        Self::next_frame(&mut self.framed).await
    }

    async fn next_frame(
        framed: &mut Framed<TcpStream, LinesCodec>,
    ) -> Result<Option<ServerMessage>> {
        loop {
            match framed.next().await {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => return protocol::decode(&line).map(Some),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    /// Split into independent read and write halves.
    pub fn split(self) -> (ClientSink, ClientStream) {
        let (sink, stream) = self.framed.split::<String>();
        (ClientSink { sink }, ClientStream { stream })
    }
}

pub struct ClientSink {
    sink: futures::stream::SplitSink<Framed<TcpStream, LinesCodec>, String>,
}

impl ClientSink {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.sink.send(protocol::encode(message)?).await?;
        Ok(())
    }
}

pub struct ClientStream {
    stream: futures::stream::SplitStream<Framed<TcpStream, LinesCodec>>,
}

impl ClientStream {
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => return protocol::decode(&line).map(Some),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}
