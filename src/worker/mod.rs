//! Volunteer worker process.
//!
//! A worker connects to the broker, announces itself with the `worker` role and
//! then serves `compute_task` frames until it is told to stop:
//! - **Execution**: [`ChunkExecutor`] multiplies the row slice by matrix B
//! - **Heartbeat**: [`heartbeat::HeartbeatSender`] keeps `lastSeen` fresh
//!
//! Frames to the broker go through a single writer task, so results and
//! heartbeats never interleave mid-line.

pub mod executor;
pub mod heartbeat;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::BrokerClient;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::protocol::{ClientMessage, Role, ServerMessage};

pub use executor::ChunkExecutor;
pub use heartbeat::HeartbeatSender;

/// Why a worker stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Completed `max_tasks` tasks.
    TaskLimit,
    /// The broker closed the connection.
    BrokerClosed,
    /// Local shutdown was requested.
    Shutdown,
    /// A task could not be computed; leaving lets the broker re-queue it.
    TaskFailed,
}

/// Summary of one worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub tasks_completed: u64,
    pub exit: WorkerExit,
}

pub struct WorkerAgent {
    config: WorkerConfig,
    executor: ChunkExecutor,
}

impl WorkerAgent {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            executor: ChunkExecutor::new(),
        }
    }

    /// Serve compute tasks until the task limit, a failed task, broker close
    /// or shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> Result<WorkerReport> {
        let client = BrokerClient::connect(self.config.broker_addr, Role::Worker).await?;
        let worker_id = client.connection_id();
        tracing::info!(worker_id = %worker_id, broker = %self.config.broker_addr, "Worker registered");

        let (mut sink, mut frames) = client.split();
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(32);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                sink.send(&message).await?;
            }
            Ok::<_, crate::error::BrokerError>(())
        });

        let heartbeat = {
            let sender = HeartbeatSender::new(self.config.heartbeat_interval_ms);
            let tx = tx.clone();
            tokio::spawn(async move { sender.run(tx).await })
        };

        let mut tasks_completed = 0u64;
        let exit = loop {
            if self
                .config
                .max_tasks
                .is_some_and(|limit| tasks_completed >= limit)
            {
                break WorkerExit::TaskLimit;
            }

            let frame = tokio::select! {
                _ = shutdown.cancelled() => break WorkerExit::Shutdown,
                frame = frames.recv() => frame,
            };

            match frame {
                Ok(Some(ServerMessage::ComputeTask(task))) => {
                    let executor = self.executor.clone();
                    let computed =
                        tokio::task::spawn_blocking(move || executor.compute(&task)).await;
                    let result = match computed {
                        Ok(Ok(result)) => result,
                        // The broker keeps us busy on this chunk until we disconnect
                        Ok(Err(e)) => {
                            tracing::error!(worker_id = %worker_id, error = %e, "Task rejected");
                            break WorkerExit::TaskFailed;
                        }
                        Err(e) => {
                            tracing::error!(worker_id = %worker_id, error = %e, "Compute task panicked");
                            break WorkerExit::TaskFailed;
                        }
                    };
                    tracing::info!(
                        worker_id = %worker_id,
                        job_id = %result.job_id,
                        chunk_id = result.chunk_id,
                        compute_time_ms = result.compute_time_ms,
                        "Chunk completed"
                    );
                    if tx.send(ClientMessage::ChunkResult(result)).await.is_err() {
                        break WorkerExit::BrokerClosed;
                    }
                    tasks_completed += 1;
                }
                Ok(Some(ServerMessage::HeartbeatAck(_))) => {}
                Ok(Some(ServerMessage::ProtocolError(e))) => {
                    tracing::warn!(worker_id = %worker_id, message = %e.message, "Broker reported protocol error");
                }
                Ok(Some(other)) => {
                    tracing::debug!(worker_id = %worker_id, frame = ?other, "Ignoring frame");
                }
                Ok(None) => break WorkerExit::BrokerClosed,
                Err(e) => {
                    tracing::warn!(worker_id = %worker_id, error = %e, "Connection error");
                    break WorkerExit::BrokerClosed;
                }
            }
        };

        heartbeat.abort();
        drop(tx);
        // Flush queued results before the socket closes
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(worker_id = %worker_id, error = %e, "Writer stopped"),
            Err(e) => tracing::debug!(worker_id = %worker_id, error = %e, "Writer task failed"),
        }

        tracing::info!(worker_id = %worker_id, tasks_completed, exit = ?exit, "Worker disconnected");
        Ok(WorkerReport {
            tasks_completed,
            exit,
        })
    }
}
