use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
        }
    }
}

/// The chunk a busy worker is computing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub job_id: String,
    pub chunk_id: usize,
}

/// Worker state tracking
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: ConnectionId,
    pub status: WorkerStatus,
    /// Present exactly when `status` is `Busy`.
    pub assignment: Option<Assignment>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_compute_ms: f64,
    pub tasks_completed: u64,
}

impl Worker {
    pub fn new(id: ConnectionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: WorkerStatus::Idle,
            assignment: None,
            registered_at: now,
            last_seen: now,
            total_compute_ms: 0.0,
            tasks_completed: 0,
        }
    }

    fn transition(&mut self, status: WorkerStatus, assignment: Option<Assignment>) {
        self.status = status;
        self.assignment = assignment;
        self.last_seen = Utc::now();
    }
}

/// Registry of connected workers.
///
/// Pure state: it answers which workers are idle, in registration order, and
/// records transitions. Every mutator ignores unknown ids. Disconnecting a
/// worker removes it, so later messages naming it fall into that case and
/// the registry only ever holds live connections.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: HashMap<ConnectionId, Worker>,
    order: Vec<ConnectionId>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new worker. Re-registering a known id does nothing.
    pub fn register(&mut self, id: ConnectionId) -> bool {
        if self.workers.contains_key(&id) {
            return false;
        }
        self.workers.insert(id, Worker::new(id));
        self.order.push(id);
        tracing::info!(worker_id = %id, "Worker registered");
        true
    }

    pub fn mark_busy(&mut self, id: &ConnectionId, job_id: &str, chunk_id: usize) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.transition(
                WorkerStatus::Busy,
                Some(Assignment {
                    job_id: job_id.to_string(),
                    chunk_id,
                }),
            );
        }
    }

    pub fn mark_idle(&mut self, id: &ConnectionId) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.transition(WorkerStatus::Idle, None);
        }
    }

    /// Drop a worker, returning its state from just before the disconnect
    /// so an in-flight chunk can be recovered.
    pub fn mark_disconnected(&mut self, id: &ConnectionId) -> Option<Worker> {
        let previous = self.workers.remove(id)?;
        self.order.retain(|other| other != id);
        tracing::info!(
            worker_id = %id,
            tasks_completed = previous.tasks_completed,
            "Worker disconnected"
        );
        Some(previous)
    }

    /// Add one finished task to a worker's cumulative counters.
    pub fn record_completion(&mut self, id: &ConnectionId, compute_ms: f64) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.total_compute_ms += compute_ms.max(0.0);
            worker.tasks_completed += 1;
            worker.last_seen = Utc::now();
        }
    }

    /// Update a worker's last-seen timestamp without changing its status.
    pub fn touch(&mut self, id: &ConnectionId) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.last_seen = Utc::now();
        }
    }

    /// Idle worker ids in registration order.
    pub fn list_idle(&self) -> Vec<ConnectionId> {
        self.order
            .iter()
            .filter(|id| {
                self.workers
                    .get(id)
                    .is_some_and(|w| w.status == WorkerStatus::Idle)
            })
            .copied()
            .collect()
    }

    pub fn idle_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle)
            .count()
    }

    /// Number of connected workers.
    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Worker> {
        self.workers.get(id)
    }

    /// All workers, in registration order.
    pub fn workers(&self) -> Vec<&Worker> {
        self.order
            .iter()
            .filter_map(|id| self.workers.get(id))
            .collect()
    }
}
