// Event-Sourcing Replication Pipeline
//
// This crate captures every mutation of registered entity types as an
// immutable history record, matches it against webhook subscriptions,
// serializes it through the subscriber's authorized read view and delivers
// it with backoff-based retry. The consumer side applies delivered payloads
// idempotently into a local replica store with version-gated upserts.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
