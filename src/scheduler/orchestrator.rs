use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::error::{BrokerError, Result};
use crate::protocol::{
    ChunkResult, ConnectionId, JobComplete, ServerMessage, SubmitJobRequest, SystemStatus,
};
use crate::scheduler::aggregator::merge_chunks;
use crate::scheduler::job::{generate_matrix, Chunk, Job, ReceivedChunk};
use crate::scheduler::partitioner::split_rows;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::verify::verify_product;
use crate::stats::{JobSummary, StatsRecorder};

/// Destination for messages the orchestrator emits.
///
/// Sending never blocks and never fails from the orchestrator's point of view;
/// messages for connections that are gone are dropped by the implementation.
pub trait Outbox {
    fn send(&mut self, to: ConnectionId, message: ServerMessage);
}

impl Outbox for Vec<(ConnectionId, ServerMessage)> {
    fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        self.push((to, message));
    }
}

/// Progress of an active job, for read-only views.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub requester: ConnectionId,
    pub rows_a: usize,
    pub cols_a: usize,
    pub cols_b: usize,
    pub chunks_expected: usize,
    pub chunks_received: usize,
    pub elapsed_ms: f64,
}

/// Owns job lifecycle, the pending-chunk queue and dispatch policy.
///
/// Every handler runs to completion without yielding, so a single owner
/// (the gateway reactor) can drive it from one event at a time.
pub struct JobOrchestrator {
    config: SchedulerConfig,
    pool: WorkerPool,
    active_jobs: HashMap<String, Job>,
    /// FIFO of chunks awaiting a worker; recovered chunks go to the front.
    pending: VecDeque<Arc<Chunk>>,
    completed_jobs: u64,
    stats: Arc<dyn StatsRecorder>,
}

impl JobOrchestrator {
    pub fn new(config: SchedulerConfig, stats: Arc<dyn StatsRecorder>) -> Self {
        Self {
            config,
            pool: WorkerPool::new(),
            active_jobs: HashMap::new(),
            pending: VecDeque::new(),
            completed_jobs: 0,
            stats,
        }
    }

    /// Add a worker to the pool and give it any queued work.
    pub fn register_worker(&mut self, out: &mut dyn Outbox, worker_id: ConnectionId) {
        if self.pool.register(worker_id) {
            self.stats.record_worker_session(worker_id);
            self.dispatch(out);
        }
    }

    pub fn heartbeat(&mut self, worker_id: &ConnectionId) {
        self.pool.touch(worker_id);
    }

    /// Validate, partition and enqueue a job, then dispatch.
    ///
    /// On error nothing is left behind; the caller reports the error to the
    /// requester.
    pub fn submit_job(
        &mut self,
        out: &mut dyn Outbox,
        requester: ConnectionId,
        request: SubmitJobRequest,
    ) -> Result<()> {
        let dims = request.validate(self.config.max_matrix_cells)?;
        if self.active_jobs.contains_key(&request.job_id) {
            return Err(BrokerError::InvalidInput(format!(
                "job {} is already active",
                request.job_id
            )));
        }

        let idle = self.pool.idle_count();
        if idle == 0 {
            return Err(BrokerError::NoCapacity);
        }
        let chunk_count = idle.min(dims.rows_a);

        let SubmitJobRequest {
            job_id,
            matrix_a,
            matrix_b,
            ..
        } = request;
        let matrix_a = matrix_a.unwrap_or_else(|| generate_matrix(dims.rows_a, dims.cols_a));
        let matrix_b = matrix_b.unwrap_or_else(|| generate_matrix(dims.cols_a, dims.cols_b));

        let blocks = split_rows(&matrix_a, dims.rows_a, dims.cols_a, chunk_count);
        if blocks.is_empty() {
            tracing::error!(job_id = %job_id, chunk_count, "Partitioning produced no chunks");
            return Err(BrokerError::PartitionFailure(format!(
                "failed to split job {job_id} into {chunk_count} chunks"
            )));
        }

        let chunks: Vec<Arc<Chunk>> = blocks
            .into_iter()
            .map(|block| Arc::new(Chunk::from_block(&job_id, dims, block)))
            .collect();
        self.pending.extend(chunks.iter().cloned());

        tracing::info!(
            job_id = %job_id,
            requester = %requester,
            rows_a = dims.rows_a,
            cols_a = dims.cols_a,
            cols_b = dims.cols_b,
            chunks = chunks.len(),
            "Job submitted"
        );

        self.active_jobs.insert(
            job_id.clone(),
            Job::new(job_id, requester, dims, matrix_a, matrix_b, chunks),
        );
        self.dispatch(out);
        Ok(())
    }

    /// Assign pending chunks to idle workers until either runs out.
    pub fn dispatch(&mut self, out: &mut dyn Outbox) {
        let mut idle = self.pool.list_idle().into_iter().peekable();

        while idle.peek().is_some() {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            let Some(job) = self.active_jobs.get(&chunk.job_id) else {
                tracing::debug!(job_id = %chunk.job_id, chunk_id = chunk.chunk_id, "Dropping chunk of inactive job");
                continue;
            };
            let Some(worker_id) = idle.next() else {
                break;
            };

            self.pool.mark_busy(&worker_id, &chunk.job_id, chunk.chunk_id);
            tracing::debug!(
                job_id = %chunk.job_id,
                chunk_id = chunk.chunk_id,
                worker_id = %worker_id,
                "Chunk dispatched"
            );
            out.send(
                worker_id,
                ServerMessage::ComputeTask(chunk.to_task(&job.matrix_b)),
            );
        }
    }

    /// Record a worker's result and complete the job once every chunk is in.
    pub fn handle_chunk_result(
        &mut self,
        out: &mut dyn Outbox,
        worker_id: ConnectionId,
        result: ChunkResult,
    ) {
        let ChunkResult {
            job_id,
            chunk_id,
            result,
            compute_time_ms,
        } = result;

        let Some(job) = self.active_jobs.get_mut(&job_id) else {
            tracing::debug!(job_id = %job_id, chunk_id, worker_id = %worker_id, "Ignoring result for inactive job");
            return;
        };
        if chunk_id >= job.chunks_expected() {
            tracing::warn!(job_id = %job_id, chunk_id, worker_id = %worker_id, "Ignoring result for unknown chunk");
            return;
        }

        job.record_result(
            chunk_id,
            ReceivedChunk {
                worker_id,
                values: result,
                compute_ms: compute_time_ms,
            },
        );
        let complete = job.is_complete();

        self.pool.mark_idle(&worker_id);
        self.pool.record_completion(&worker_id, compute_time_ms);
        self.stats
            .record_worker_contribution(worker_id, compute_time_ms, 1);
        self.dispatch(out);

        if complete {
            self.complete_job(out, &job_id);
        }
    }

    /// Mark a worker gone and put its in-flight chunk back at the front of
    /// the queue.
    pub fn handle_disconnect(&mut self, out: &mut dyn Outbox, worker_id: ConnectionId) {
        let Some(previous) = self.pool.mark_disconnected(&worker_id) else {
            return;
        };
        let Some(assignment) = previous.assignment else {
            return;
        };

        let Some(job) = self.active_jobs.get_mut(&assignment.job_id) else {
            tracing::debug!(job_id = %assignment.job_id, chunk_id = assignment.chunk_id, "Discarding chunk of inactive job");
            return;
        };
        if job.has_result(assignment.chunk_id) {
            return;
        }
        let Some(chunk) = job.chunk(assignment.chunk_id).cloned() else {
            return;
        };

        let attempts = job.note_redispatch(chunk.chunk_id);
        if let Some(limit) = self.config.max_chunk_redispatches {
            if attempts > limit {
                let reason = format!(
                    "chunk {} lost its worker {} times, giving up",
                    chunk.chunk_id, attempts
                );
                self.abort_job(out, &assignment.job_id, reason);
                return;
            }
        }

        tracing::info!(
            job_id = %chunk.job_id,
            chunk_id = chunk.chunk_id,
            worker_id = %worker_id,
            attempts,
            "Re-queueing chunk after worker disconnect"
        );
        self.pending.push_front(chunk);
        self.dispatch(out);
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            active_workers: self.pool.active_count(),
            pending_queue_length: self.pending.len(),
            completed_job_count: self.completed_jobs,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active_jobs.contains_key(job_id)
    }

    /// Active jobs ordered by submission time.
    pub fn active_jobs(&self) -> Vec<JobProgress> {
        let mut jobs: Vec<&Job> = self.active_jobs.values().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs.into_iter()
            .map(|job| JobProgress {
                job_id: job.id.clone(),
                requester: job.requester,
                rows_a: job.dims.rows_a,
                cols_a: job.dims.cols_a,
                cols_b: job.dims.cols_b,
                chunks_expected: job.chunks_expected(),
                chunks_received: job.received.len(),
                elapsed_ms: job.started_at.elapsed().as_secs_f64() * 1000.0,
            })
            .collect()
    }

    fn complete_job(&mut self, out: &mut dyn Outbox, job_id: &str) {
        let Some(job) = self.active_jobs.remove(job_id) else {
            return;
        };

        let merged = merge_chunks(
            job.received
                .iter()
                .map(|(chunk_id, r)| (*chunk_id, r.values.as_slice())),
            job.dims.rows_a,
            job.dims.cols_b,
        );
        let result = match merged {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to assemble job result");
                out.send(job.requester, ServerMessage::job_error(&job.id, e.to_string()));
                return;
            }
        };

        let total_time_ms = job.started_at.elapsed().as_secs_f64() * 1000.0;
        let verification = self
            .config
            .verification
            .applies_to(job.dims.output_cells())
            .then(|| verify_product(&job.matrix_a, &job.matrix_b, job.dims, &result));
        if let Some(v) = verification.as_ref().filter(|v| !v.verified) {
            tracing::warn!(job_id = %job.id, reason = ?v.error, "Job result failed verification");
        }

        let summary = summarize(&job, total_time_ms);
        out.send(
            job.requester,
            ServerMessage::JobComplete(JobComplete {
                job_id: job.id.clone(),
                result,
                rows_a: job.dims.rows_a,
                cols_b: job.dims.cols_b,
                total_time_ms,
                workers_used: job.workers_used,
                chunks_count: job.chunks_expected(),
                verified: verification.as_ref().map(|v| v.verified),
                verification_error: verification.and_then(|v| v.error),
            }),
        );
        self.completed_jobs += 1;
        self.stats.record_job(&summary);

        tracing::info!(
            job_id = %job.id,
            total_time_ms,
            chunks = job.chunks_expected(),
            "Job completed"
        );
    }

    fn abort_job(&mut self, out: &mut dyn Outbox, job_id: &str, reason: String) {
        let Some(job) = self.active_jobs.remove(job_id) else {
            return;
        };
        self.pending.retain(|chunk| chunk.job_id != job_id);

        let stuck: Vec<ConnectionId> = self
            .pool
            .workers()
            .into_iter()
            .filter(|w| w.assignment.as_ref().is_some_and(|a| a.job_id == job_id))
            .map(|w| w.id)
            .collect();
        for worker_id in &stuck {
            self.pool.mark_idle(worker_id);
        }

        tracing::warn!(job_id = %job.id, reason = %reason, "Job aborted");
        out.send(job.requester, ServerMessage::job_error(&job.id, reason));
        self.dispatch(out);
    }
}

fn summarize(job: &Job, total_time_ms: f64) -> JobSummary {
    let compute_ms = job.total_compute_ms();
    let received = job.received.len();
    let (throughput_mops, efficiency_ratio) = if total_time_ms > 0.0 {
        (
            job.dims.operations() / (total_time_ms * 1000.0),
            compute_ms / (total_time_ms * job.workers_used.max(1) as f64),
        )
    } else {
        (0.0, 0.0)
    };

    JobSummary {
        id: job.id.clone(),
        rows_a: job.dims.rows_a,
        cols_a: job.dims.cols_a,
        cols_b: job.dims.cols_b,
        workers_used: job.workers_used,
        chunks_count: job.chunks_expected(),
        total_time_ms,
        avg_chunk_time_ms: if received == 0 {
            0.0
        } else {
            compute_ms / received as f64
        },
        throughput_mops,
        efficiency_ratio,
        created_at: job.created_at,
    }
}
