//! Contribution and job-history bookkeeping.
//!
//! The orchestrator reports worker sessions, chunk contributions and finished
//! jobs through [`StatsRecorder`]. Recording is fire-and-forget: nothing in the
//! scheduling path depends on it succeeding.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::ConnectionId;

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Metrics for one completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub rows_a: usize,
    pub cols_a: usize,
    pub cols_b: usize,
    pub workers_used: usize,
    pub chunks_count: usize,
    pub total_time_ms: f64,
    pub avg_chunk_time_ms: f64,
    /// Million floating point operations per second, end to end.
    pub throughput_mops: f64,
    /// Share of the wall-clock budget (`total_time_ms * workers_used`) that
    /// workers reported spending on computation.
    pub efficiency_ratio: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub worker_id: ConnectionId,
    pub total_compute_ms: f64,
    pub tasks_completed: u64,
    pub sessions_joined: u64,
    pub last_seen: DateTime<Utc>,
}

impl LeaderboardEntry {
    fn new(worker_id: ConnectionId) -> Self {
        Self {
            worker_id,
            total_compute_ms: 0.0,
            tasks_completed: 0,
            sessions_joined: 0,
            last_seen: Utc::now(),
        }
    }
}

pub trait StatsRecorder: Send + Sync {
    fn record_worker_session(&self, worker_id: ConnectionId);

    fn record_worker_contribution(&self, worker_id: ConnectionId, compute_ms: f64, tasks: u64);

    fn record_job(&self, summary: &JobSummary);
}

/// Process-local leaderboard and bounded job history.
#[derive(Debug)]
pub struct InMemoryStats {
    inner: Mutex<StatsInner>,
    history_limit: usize,
}

#[derive(Debug, Default)]
struct StatsInner {
    leaderboard: HashMap<ConnectionId, LeaderboardEntry>,
    history: VecDeque<JobSummary>,
}

impl Default for InMemoryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
            history_limit,
        }
    }

    /// Workers ordered by total compute time, highest first.
    pub fn top_workers(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut entries: Vec<LeaderboardEntry> = inner.leaderboard.values().cloned().collect();
        entries.sort_by(|a, b| b.total_compute_ms.total_cmp(&a.total_compute_ms));
        entries.truncate(limit);
        entries
    }

    /// Most recently completed jobs, newest first.
    pub fn recent_jobs(&self, limit: usize) -> Vec<JobSummary> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    fn with_entry(&self, worker_id: ConnectionId, update: impl FnOnce(&mut LeaderboardEntry)) {
        match self.inner.lock() {
            Ok(mut inner) => {
                let entry = inner
                    .leaderboard
                    .entry(worker_id)
                    .or_insert_with(|| LeaderboardEntry::new(worker_id));
                update(entry);
                entry.last_seen = Utc::now();
            }
            Err(e) => tracing::warn!(worker_id = %worker_id, error = %e, "Stats store poisoned"),
        }
    }
}

impl StatsRecorder for InMemoryStats {
    fn record_worker_session(&self, worker_id: ConnectionId) {
        self.with_entry(worker_id, |e| e.sessions_joined += 1);
    }

    fn record_worker_contribution(&self, worker_id: ConnectionId, compute_ms: f64, tasks: u64) {
        self.with_entry(worker_id, |e| {
            e.total_compute_ms += compute_ms.max(0.0);
            e.tasks_completed += tasks;
        });
    }

    fn record_job(&self, summary: &JobSummary) {
        match self.inner.lock() {
            Ok(mut inner) => {
                inner.history.push_back(summary.clone());
                while inner.history.len() > self.history_limit {
                    inner.history.pop_front();
                }
            }
            Err(e) => tracing::warn!(job_id = %summary.id, error = %e, "Stats store poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn summary(id: &str) -> JobSummary {
        JobSummary {
            id: id.to_string(),
            rows_a: 2,
            cols_a: 2,
            cols_b: 2,
            workers_used: 1,
            chunks_count: 1,
            total_time_ms: 10.0,
            avg_chunk_time_ms: 5.0,
            throughput_mops: 0.0016,
            efficiency_ratio: 0.5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn contributions_accumulate_per_worker() {
        let stats = InMemoryStats::new();
        let w = Uuid::new_v4();
        stats.record_worker_session(w);
        stats.record_worker_contribution(w, 100.0, 1);
        stats.record_worker_contribution(w, 50.0, 1);

        let top = stats.top_workers(10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].worker_id, w);
        assert_eq!(top[0].total_compute_ms, 150.0);
        assert_eq!(top[0].tasks_completed, 2);
        assert_eq!(top[0].sessions_joined, 1);
    }

    #[test]
    fn leaderboard_sorted_by_compute_and_limited() {
        let stats = InMemoryStats::new();
        let (slow, fast, idle) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        stats.record_worker_contribution(slow, 10.0, 1);
        stats.record_worker_contribution(fast, 500.0, 3);
        stats.record_worker_session(idle);

        let top = stats.top_workers(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].worker_id, fast);
        assert_eq!(top[1].worker_id, slow);
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let stats = InMemoryStats::with_history_limit(2);
        stats.record_job(&summary("a"));
        stats.record_job(&summary("b"));
        stats.record_job(&summary("c"));

        let recent: Vec<String> = stats.recent_jobs(10).into_iter().map(|j| j.id).collect();
        assert_eq!(recent, vec!["c".to_string(), "b".to_string()]);
    }
}
