use std::time::Instant;

use crate::error::{BrokerError, Result};
use crate::protocol::{ChunkResult, ComputeTask};

/// Multiplies a row slice of matrix A by the full matrix B.
#[derive(Debug, Clone, Default)]
pub struct ChunkExecutor;

impl ChunkExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Compute one chunk and time it.
    ///
    /// The result holds `row_count * cols_b` values in row-major order,
    /// ready to be spliced into the job's product at `row_offset`.
    pub fn compute(&self, task: &ComputeTask) -> Result<ChunkResult> {
        let ComputeTask {
            row_count,
            cols_a,
            cols_b,
            ..
        } = *task;

        if task.matrix_a_chunk.len() != row_count * cols_a {
            return Err(BrokerError::InvalidInput(format!(
                "matrixAChunk has {} values, expected {}",
                task.matrix_a_chunk.len(),
                row_count * cols_a
            )));
        }
        if task.matrix_b_full.len() != cols_a * cols_b {
            return Err(BrokerError::InvalidInput(format!(
                "matrixBFull has {} values, expected {}",
                task.matrix_b_full.len(),
                cols_a * cols_b
            )));
        }

        let started = Instant::now();
        let mut result = vec![0.0; row_count * cols_b];
        for (row, out) in result.chunks_mut(cols_b).enumerate() {
            let a_row = &task.matrix_a_chunk[row * cols_a..(row + 1) * cols_a];
            for (k, a) in a_row.iter().enumerate() {
                let b_row = &task.matrix_b_full[k * cols_b..(k + 1) * cols_b];
                for (cell, b) in out.iter_mut().zip(b_row) {
                    *cell += a * b;
                }
            }
        }
        let compute_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            job_id = %task.job_id,
            chunk_id = task.chunk_id,
            rows = row_count,
            compute_time_ms,
            "Chunk computed"
        );

        Ok(ChunkResult {
            job_id: task.job_id.clone(),
            chunk_id: task.chunk_id,
            result,
            compute_time_ms,
        })
    }
}
