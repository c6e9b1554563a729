use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    ClientMessage, ConnectionId, HeartbeatAck, Role, ServerMessage, SystemStatus, Welcome,
    PROTOCOL_VERSION,
};
use crate::scheduler::{JobOrchestrator, JobProgress, Outbox, Worker};

/// Inputs to the reactor, produced by connection tasks and the dashboard.
#[derive(Debug)]
pub enum Event {
    /// A connection opened; `outbound` delivers frames back to it.
    Connected {
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    },
    /// A decoded frame from a connection.
    Message {
        id: ConnectionId,
        message: ClientMessage,
    },
    /// The connection closed, cleanly or not.
    Disconnected { id: ConnectionId },
    /// Read-only view of scheduler state.
    Snapshot {
        response_tx: oneshot::Sender<BrokerSnapshot>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSnapshot {
    pub status: SystemStatus,
    pub workers: Vec<Worker>,
    pub jobs: Vec<JobProgress>,
}

/// Outbound channels of every open connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl ConnectionRegistry {
    pub fn insert(&mut self, id: ConnectionId, outbound: mpsc::UnboundedSender<ServerMessage>) {
        self.connections.insert(id, outbound);
    }

    pub fn remove(&mut self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Outbox for ConnectionRegistry {
    fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        match self.connections.get(&to) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    tracing::debug!(connection_id = %to, "Connection writer gone, message dropped");
                }
            }
            None => {
                tracing::debug!(connection_id = %to, "Unknown connection, message dropped");
            }
        }
    }
}

/// Single-threaded event loop that owns the orchestrator.
///
/// Every event is applied to completion before the next one is taken from the
/// queue, so orchestrator state never needs locking.
pub struct Reactor {
    orchestrator: JobOrchestrator,
    connections: ConnectionRegistry,
}

impl Reactor {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self {
            orchestrator,
            connections: ConnectionRegistry::default(),
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    /// Apply one event.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Connected { id, outbound } => {
                tracing::debug!(connection_id = %id, "Connection opened");
                self.connections.insert(id, outbound);
            }
            Event::Message { id, message } => self.handle_message(id, message),
            Event::Disconnected { id } => {
                tracing::debug!(connection_id = %id, "Connection closed");
                self.orchestrator.handle_disconnect(&mut self.connections, id);
                self.connections.remove(&id);
            }
            Event::Snapshot { response_tx } => {
                let snapshot = BrokerSnapshot {
                    status: self.orchestrator.status(),
                    workers: self
                        .orchestrator
                        .pool()
                        .workers()
                        .into_iter()
                        .cloned()
                        .collect(),
                    jobs: self.orchestrator.active_jobs(),
                };
                // Requester may have given up waiting
                let _ = response_tx.send(snapshot);
            }
        }
    }

    fn handle_message(&mut self, id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Hello { role, .. } => {
                // Must precede any task dispatched on registration
                self.connections.send(
                    id,
                    ServerMessage::Welcome(Welcome {
                        connection_id: id,
                        version: PROTOCOL_VERSION,
                    }),
                );
                if role == Role::Worker {
                    self.orchestrator.register_worker(&mut self.connections, id);
                }
            }
            ClientMessage::SubmitJob(request) => {
                let job_id = request.job_id.clone();
                if let Err(e) = self
                    .orchestrator
                    .submit_job(&mut self.connections, id, request)
                {
                    tracing::warn!(job_id = %job_id, requester = %id, error = %e, "Job rejected");
                    self.connections
                        .send(id, ServerMessage::job_error(job_id, e.to_string()));
                }
            }
            ClientMessage::ChunkResult(result) => {
                self.orchestrator
                    .handle_chunk_result(&mut self.connections, id, result);
            }
            ClientMessage::StatusQuery => {
                let status = self.orchestrator.status();
                self.connections.send(id, ServerMessage::StatusReply(status));
            }
            ClientMessage::Heartbeat => {
                self.orchestrator.heartbeat(&id);
                self.connections.send(
                    id,
                    ServerMessage::HeartbeatAck(HeartbeatAck {
                        timestamp: Utc::now(),
                    }),
                );
            }
        }
    }

    /// Drain events until the queue closes or shutdown is requested.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>, shutdown: CancellationToken) {
        tracing::info!("Reactor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Reactor shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        tracing::info!(
            open_connections = self.connections.len(),
            status = ?self.orchestrator.status(),
            "Reactor stopped"
        );
    }
}
