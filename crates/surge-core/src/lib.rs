//! SURGE Core - Fundamental types shared by the coordinator and its workers
//!
//! This crate defines:
//! - Node identifiers (NodeId)
//! - The line-delimited JSON wire protocol (Outbound, Inbound)
//! - Telemetry report views and per-node resource figures
//! - Cluster snapshots and report records handed to sinks
//! - The error taxonomy

pub mod id;
pub mod error;
pub mod protocol;
pub mod telemetry;
pub mod snapshot;

pub use id::*;
pub use error::*;
pub use protocol::*;
pub use telemetry::*;
pub use snapshot::*;
