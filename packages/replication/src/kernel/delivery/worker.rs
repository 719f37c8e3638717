//! Delivery worker service.
//!
//! The `DeliveryWorker` is a background service that:
//! - Polls the delivery queue for ready tasks
//! - Re-fetches the subscription and history record per task
//! - Serializes through the owner's authorized view
//! - POSTs to the subscriber's webhook, retrying with backoff
//!
//! # Architecture
//!
//! ```text
//! DeliveryWorker
//!     │
//!     ├─► Poll queue (claim_ready)
//!     ├─► Look up subscription (gone => terminal not_subscribed)
//!     ├─► Serialize via AuthorizedView (failure => retry)
//!     └─► WebhookTransport::deliver (non-200 => retry)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::eventsourcing::serializer::{serialize, AuthorizedView};
use crate::domains::eventsourcing::store::{HistoryStore, SubscriptionStore};

use super::queue::DeliveryQueue;
use super::task::DeliveryTask;
use super::transport::WebhookTransport;

/// Backoff policy for failed deliveries.
///
/// The ceiling is explicit: `max_attempts: None` retries indefinitely
/// (bounded-infinite delivery), `Some(n)` dead-letters the task after `n`
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(600),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given number of attempts already made.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(32);
        let delay = self
            .base
            .checked_mul(2u32.saturating_pow(exp))
            .unwrap_or(self.cap);
        delay.min(self.cap)
    }

    /// Whether a task that has made `attempts` attempts may try again.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

/// Terminal or intermediate outcome of processing one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Webhook answered 200
    Delivered,
    /// Subscription was removed concurrently; task dropped without retry
    NotSubscribed,
    /// History record is gone; task dropped without retry
    RecordMissing,
    /// Transient failure, rescheduled with backoff
    Retrying,
    /// Attempt ceiling reached
    DeadLettered,
}

/// Configuration for the delivery worker.
#[derive(Debug, Clone)]
pub struct DeliveryWorkerConfig {
    /// Maximum number of tasks to claim at once
    pub batch_size: usize,
    /// How long to wait when no tasks are ready
    pub poll_interval: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for DeliveryWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(250),
            worker_id: format!("delivery-{}", Uuid::new_v4()),
        }
    }
}

/// Background service that drains the delivery queue.
pub struct DeliveryWorker {
    queue: Arc<dyn DeliveryQueue>,
    subscriptions: Arc<dyn SubscriptionStore>,
    history: Arc<dyn HistoryStore>,
    view: Arc<dyn AuthorizedView>,
    transport: Arc<dyn WebhookTransport>,
    policy: RetryPolicy,
    config: DeliveryWorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<dyn DeliveryQueue>,
        subscriptions: Arc<dyn SubscriptionStore>,
        history: Arc<dyn HistoryStore>,
        view: Arc<dyn AuthorizedView>,
        transport: Arc<dyn WebhookTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            subscriptions,
            history,
            view,
            transport,
            policy,
            config: DeliveryWorkerConfig::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(mut self, config: DeliveryWorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a shutdown handle for graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Process one claimed task end to end.
    ///
    /// Idempotent with respect to repeated invocation with the same
    /// `(subscription, history record)` pair: the payload is re-rendered
    /// every time and the consumer's version gate absorbs duplicates.
    pub async fn process_task(&self, task: DeliveryTask) -> DeliveryStatus {
        let subscription = match self.subscriptions.get(task.subscription_id).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                warn!(task = %task, "subscription does not exist, dropping task");
                return DeliveryStatus::NotSubscribed;
            }
            Err(e) => {
                error!(task = %task, error = %e, "subscription lookup failed");
                return self.retry_or_dead_letter(task).await;
            }
        };

        let record = match self.history.get(&task.entity_type, task.history_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(task = %task, "history record does not exist, dropping task");
                return DeliveryStatus::RecordMissing;
            }
            Err(e) => {
                error!(task = %task, error = %e, "history lookup failed");
                return self.retry_or_dead_letter(task).await;
            }
        };

        info!(
            name = %subscription.name,
            event = %format!("{}.{}.{}", record.entity_type, record.history_type, record.uid),
            version = record.version,
            attempt = task.attempt,
            "webhook delivery"
        );

        // Serialization failures are transient by policy: a permission grant
        // race heals on a later attempt.
        let payload = match serialize(
            self.view.as_ref(),
            &subscription.owner,
            &subscription.settings,
            &record,
        )
        .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(name = %subscription.name, error = %e, attempt = task.attempt,
                    "serialize error, retrying");
                return self.retry_or_dead_letter(task).await;
            }
        };

        match self
            .transport
            .deliver(&subscription.settings, &payload)
            .await
        {
            Ok(()) => {
                debug!(name = %subscription.name, task = %task, "delivered");
                DeliveryStatus::Delivered
            }
            Err(e) => {
                warn!(name = %subscription.name, error = %e, attempt = task.attempt,
                    "delivery error, retrying");
                self.retry_or_dead_letter(task).await
            }
        }
    }

    async fn retry_or_dead_letter(&self, task: DeliveryTask) -> DeliveryStatus {
        let attempts_made = task.attempt + 1;
        if !self.policy.allows_retry(attempts_made) {
            error!(task = %task, attempts = attempts_made, "attempt ceiling reached, dead-lettering");
            return DeliveryStatus::DeadLettered;
        }

        let delay = self.policy.delay_for(task.attempt);
        if let Err(e) = self.queue.schedule_retry(task, delay).await {
            error!(error = %e, "failed to reschedule task");
            return DeliveryStatus::DeadLettered;
        }
        DeliveryStatus::Retrying
    }

    /// Run the worker until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "delivery worker starting"
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            let tasks = match self
                .queue
                .claim_ready(Utc::now(), self.config.batch_size)
                .await
            {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(error = %e, "failed to claim tasks");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if tasks.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            debug!(count = tasks.len(), "claimed tasks");

            // Deliveries to different subscribers are independent; run the
            // whole batch concurrently.
            let handles = tasks.into_iter().map(|task| self.process_task(task));
            futures::future::join_all(handles).await;
        }

        info!(worker_id = %self.config.worker_id, "delivery worker stopped");
        Ok(())
    }

    /// Drain the queue until it is empty and no task is pending a retry.
    ///
    /// Test helper: runs the same claim/process loop as [`run`] but without
    /// sleeping on the poll interval, advancing claims past future `run_at`
    /// values so backoff does not slow the suite down.
    pub async fn drain(&self) -> Result<Vec<DeliveryStatus>> {
        let mut statuses = Vec::new();
        loop {
            let horizon = Utc::now() + chrono::Duration::days(365);
            let tasks = self.queue.claim_ready(horizon, self.config.batch_size).await?;
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                statuses.push(self.process_task(task).await);
            }
        }
        Ok(statuses)
    }
}
