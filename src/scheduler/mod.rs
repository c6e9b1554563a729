pub mod aggregator;
pub mod job;
pub mod orchestrator;
pub mod partitioner;
pub mod pool;
pub mod verify;

pub use job::{Chunk, Dimensions, Job};
pub use orchestrator::{JobOrchestrator, JobProgress, Outbox};
pub use pool::{Worker, WorkerPool, WorkerStatus};
