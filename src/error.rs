use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No available workers")]
    NoCapacity,

    #[error("Partition failure: {0}")]
    PartitionFailure(String),

    #[error("Result size mismatch: expected {expected} values, got {actual}")]
    ResultSizeMismatch { expected: usize, actual: usize },

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
