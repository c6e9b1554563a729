pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod stats;
pub mod worker;
