//! Delivery task queue.
//!
//! The trait is the seam between synchronous event matching and the
//! asynchronous worker. The in-memory implementation orders tasks by
//! `run_at` so retry scheduling and fresh enqueues share one path.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::Mutex;

use super::task::DeliveryTask;

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Add a fresh task. Must not block on network I/O; matching calls this
    /// inline with the triggering mutation.
    async fn enqueue(&self, task: DeliveryTask) -> Result<()>;

    /// Claim up to `limit` tasks whose `run_at` has passed.
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryTask>>;

    /// Put a failed task back with its attempt counter bumped.
    async fn schedule_retry(&self, task: DeliveryTask, delay: Duration) -> Result<()>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Unbounded in-memory queue, ordered by `run_at`.
#[derive(Default)]
pub struct InMemoryDeliveryQueue {
    tasks: Mutex<Vec<DeliveryTask>>,
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn enqueue(&self, task: DeliveryTask) -> Result<()> {
        self.tasks.lock().await.push(task);
        Ok(())
    }

    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryTask>> {
        let mut tasks = self.tasks.lock().await;
        tasks.sort_by_key(|t| t.run_at);

        let mut claimed = Vec::new();
        let mut index = 0;
        while index < tasks.len() && claimed.len() < limit {
            if tasks[index].run_at <= now {
                claimed.push(tasks.remove(index));
            } else {
                break;
            }
        }
        Ok(claimed)
    }

    async fn schedule_retry(&self, mut task: DeliveryTask, delay: Duration) -> Result<()> {
        task.attempt += 1;
        task.run_at = Utc::now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(1));
        self.tasks.lock().await.push(task);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}
