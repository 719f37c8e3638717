//! Asynchronous webhook delivery.
//!
//! Matching enqueues small reference-only tasks; the worker re-fetches the
//! subscription and history record at delivery time, serializes through the
//! authorized view and POSTs with backoff-based retry.

pub mod queue;
pub mod task;
pub mod transport;
pub mod worker;

pub use queue::{DeliveryQueue, InMemoryDeliveryQueue};
pub use task::DeliveryTask;
pub use transport::{DeliveryError, HttpWebhookTransport, WebhookTransport};
pub use worker::{DeliveryStatus, DeliveryWorker, DeliveryWorkerConfig, RetryPolicy};
