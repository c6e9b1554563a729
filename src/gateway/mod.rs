//! Transport adapter between network connections and the orchestrator.
//!
//! - [`GatewayServer`] accepts TCP connections and speaks the line-delimited
//!   JSON protocol from [`crate::protocol`]
//! - [`Reactor`] applies connection events to the [`JobOrchestrator`] one at a
//!   time and routes emitted messages back to the right connection
//!
//! [`JobOrchestrator`]: crate::scheduler::JobOrchestrator

pub mod reactor;
pub mod server;

pub use reactor::{BrokerSnapshot, ConnectionRegistry, Event, Reactor};
pub use server::GatewayServer;
