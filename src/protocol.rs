//! Wire contract between the broker and its connections.
//!
//! Every frame is one JSON object on its own line, tagged by a `type` field
//! with camelCase payload fields. Connections open with [`ClientMessage::Hello`]
//! carrying [`PROTOCOL_VERSION`]; a mismatched version is refused.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BrokerError, Result};
use crate::scheduler::job::Dimensions;

pub const PROTOCOL_VERSION: u32 = 1;

/// Identity the transport assigns to each connection. A worker's identity is
/// the identity of its current connection.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Receives compute tasks.
    Worker,
    /// Only submits jobs and queries status.
    Client,
}

/// Frames sent to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello { version: u32, role: Role },
    SubmitJob(SubmitJobRequest),
    ChunkResult(ChunkResult),
    StatusQuery,
    Heartbeat,
}

/// Frames sent by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(Welcome),
    ComputeTask(ComputeTask),
    JobComplete(JobComplete),
    JobError(JobError),
    StatusReply(SystemStatus),
    HeartbeatAck(HeartbeatAck),
    ProtocolError(ProtocolError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: ConnectionId,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub job_id: String,
    pub rows_a: i64,
    pub cols_a: i64,
    pub cols_b: i64,
    /// Optional row-major operand; generated by the broker when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix_a: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix_b: Option<Vec<f64>>,
}

impl SubmitJobRequest {
    pub fn new(job_id: impl Into<String>, rows_a: i64, cols_a: i64, cols_b: i64) -> Self {
        Self {
            job_id: job_id.into(),
            rows_a,
            cols_a,
            cols_b,
            matrix_a: None,
            matrix_b: None,
        }
    }

    pub fn with_operands(mut self, matrix_a: Vec<f64>, matrix_b: Vec<f64>) -> Self {
        self.matrix_a = Some(matrix_a);
        self.matrix_b = Some(matrix_b);
        self
    }

    /// Check the job id, dimensions and any supplied operands.
    ///
    /// Each of A, B and the product must fit in `max_cells` values.
    pub fn validate(&self, max_cells: usize) -> Result<Dimensions> {
        if self.job_id.trim().is_empty() {
            return Err(BrokerError::InvalidInput("jobId must not be empty".into()));
        }

        let dim = |name: &str, value: i64| -> Result<usize> {
            usize::try_from(value)
                .ok()
                .filter(|v| *v >= 1)
                .ok_or_else(|| BrokerError::InvalidInput(format!("{name} must be >= 1, got {value}")))
        };
        let dims = Dimensions {
            rows_a: dim("rowsA", self.rows_a)?,
            cols_a: dim("colsA", self.cols_a)?,
            cols_b: dim("colsB", self.cols_b)?,
        };

        let cells = |name: &str, rows: usize, cols: usize| -> Result<usize> {
            rows.checked_mul(cols)
                .filter(|n| *n <= max_cells)
                .ok_or_else(|| {
                    BrokerError::InvalidInput(format!(
                        "{name} ({rows}x{cols}) exceeds the {max_cells} cell limit"
                    ))
                })
        };
        let a_cells = cells("matrixA", dims.rows_a, dims.cols_a)?;
        let b_cells = cells("matrixB", dims.cols_a, dims.cols_b)?;
        cells("result", dims.rows_a, dims.cols_b)?;

        let check_len = |name: &str, values: &Option<Vec<f64>>, expected: usize| -> Result<()> {
            match values {
                Some(v) if v.len() != expected => Err(BrokerError::InvalidInput(format!(
                    "{name} has {} values, expected {expected}",
                    v.len()
                ))),
                _ => Ok(()),
            }
        };
        check_len("matrixA", &self.matrix_a, a_cells)?;
        check_len("matrixB", &self.matrix_b, b_cells)?;

        Ok(dims)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeTask {
    pub job_id: String,
    pub chunk_id: usize,
    pub row_offset: usize,
    pub row_count: usize,
    pub cols_a: usize,
    pub cols_b: usize,
    pub matrix_a_chunk: Vec<f64>,
    pub matrix_b_full: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub job_id: String,
    pub chunk_id: usize,
    pub result: Vec<f64>,
    pub compute_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobComplete {
    pub job_id: String,
    pub result: Vec<f64>,
    pub rows_a: usize,
    pub cols_b: usize,
    pub total_time_ms: f64,
    pub workers_used: usize,
    pub chunks_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub active_workers: usize,
    pub pending_queue_length: usize,
    pub completed_job_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub message: String,
}

impl ServerMessage {
    pub fn job_error(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::JobError(JobError {
            job_id: job_id.into(),
            message: message.into(),
        })
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        ServerMessage::ProtocolError(ProtocolError {
            message: message.into(),
        })
    }
}

/// Encode one frame (without the trailing newline).
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one frame.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line)?)
}
