//! Consumer side of the replication pipeline.
//!
//! Inbound webhook payloads are validated, routed through the replicated
//! type registry and applied idempotently into the local replica store.

pub mod processor;
pub mod registry;
pub mod store;

pub use processor::{DeletePolicy, ProcessError, Processor};
pub use registry::ReplicatedRegistry;
pub use store::{ApplyOutcome, InMemoryReplicaStore, ReplicaRecord, ReplicaStore};
