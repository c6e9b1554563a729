use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::protocol::{ComputeTask, ConnectionId};
use crate::scheduler::partitioner::RowBlock;

/// Validated dimensions of `A (rows_a x cols_a) * B (cols_a x cols_b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub rows_a: usize,
    pub cols_a: usize,
    pub cols_b: usize,
}

impl Dimensions {
    pub fn output_cells(&self) -> usize {
        self.rows_a * self.cols_b
    }

    /// Multiply-add count of the full product, counting each as two ops.
    pub fn operations(&self) -> f64 {
        2.0 * self.rows_a as f64 * self.cols_a as f64 * self.cols_b as f64
    }
}

/// A row slice of matrix A plus the context a worker needs to multiply it.
/// Immutable once created; re-sent verbatim after a disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub job_id: String,
    pub chunk_id: usize,
    pub row_offset: usize,
    pub row_count: usize,
    pub cols_a: usize,
    pub cols_b: usize,
    pub values: Vec<f64>,
}

impl Chunk {
    pub fn from_block(job_id: &str, dims: Dimensions, block: RowBlock) -> Self {
        Self {
            job_id: job_id.to_string(),
            chunk_id: block.chunk_id,
            row_offset: block.row_offset,
            row_count: block.row_count,
            cols_a: dims.cols_a,
            cols_b: dims.cols_b,
            values: block.values,
        }
    }

    /// Build the wire task for this chunk; the worker needs all of B.
    pub fn to_task(&self, matrix_b: &[f64]) -> ComputeTask {
        ComputeTask {
            job_id: self.job_id.clone(),
            chunk_id: self.chunk_id,
            row_offset: self.row_offset,
            row_count: self.row_count,
            cols_a: self.cols_a,
            cols_b: self.cols_b,
            matrix_a_chunk: self.values.clone(),
            matrix_b_full: matrix_b.to_vec(),
        }
    }
}

/// One delivered chunk result.
#[derive(Debug, Clone)]
pub struct ReceivedChunk {
    pub worker_id: ConnectionId,
    pub values: Vec<f64>,
    pub compute_ms: f64,
}

/// An in-flight job owned by the orchestrator.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub requester: ConnectionId,
    pub dims: Dimensions,
    pub matrix_a: Vec<f64>,
    pub matrix_b: Vec<f64>,
    /// Indexed by chunk id.
    pub chunks: Vec<Arc<Chunk>>,
    pub workers_used: usize,
    pub received: HashMap<usize, ReceivedChunk>,
    pub redispatches: HashMap<usize, u32>,
    pub started_at: Instant,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: String,
        requester: ConnectionId,
        dims: Dimensions,
        matrix_a: Vec<f64>,
        matrix_b: Vec<f64>,
        chunks: Vec<Arc<Chunk>>,
    ) -> Self {
        Self {
            id,
            requester,
            dims,
            matrix_a,
            matrix_b,
            workers_used: chunks.len(),
            chunks,
            received: HashMap::new(),
            redispatches: HashMap::new(),
            started_at: Instant::now(),
            created_at: Utc::now(),
        }
    }

    pub fn chunks_expected(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, chunk_id: usize) -> Option<&Arc<Chunk>> {
        self.chunks.get(chunk_id)
    }

    pub fn has_result(&self, chunk_id: usize) -> bool {
        self.received.contains_key(&chunk_id)
    }

    /// Record a chunk result. A repeated delivery for the same chunk replaces
    /// the earlier one.
    pub fn record_result(&mut self, chunk_id: usize, received: ReceivedChunk) {
        self.received.insert(chunk_id, received);
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.chunks_expected()
    }

    /// Count one more re-dispatch of `chunk_id` and return the new total.
    pub fn note_redispatch(&mut self, chunk_id: usize) -> u32 {
        let count = self.redispatches.entry(chunk_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn total_compute_ms(&self) -> f64 {
        self.received.values().map(|r| r.compute_ms).sum()
    }
}

/// Fill a `rows x cols` matrix with uniform values in `[0, 1)`.
pub fn generate_matrix(rows: usize, cols: usize) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    (0..rows * cols).map(|_| rng.gen::<f64>()).collect()
}
