use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppResult;
use crate::tasks::{Queue, TaskMessage};

/// Counters of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue: Queue,
    /// Waiting to be picked up
    pub pending: u64,
    /// Leased by a worker
    pub active: u64,
    /// Waiting for their retry time
    pub scheduled: u64,
    /// Permanently failed
    pub archived: u64,
}

/// Durable store behind the task queues
///
/// A dequeued message is leased: it stays on the broker until it is acked,
/// rescheduled or archived. Leases that run out are handed back to the
/// queue by [`Broker::recover_expired`], so delivery is at least once.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, message: &TaskMessage) -> AppResult<()>;

    /// Pops the oldest pending message of `queue` and leases it for `lease`
    async fn dequeue(&self, queue: Queue, lease: Duration) -> AppResult<Option<TaskMessage>>;

    /// Completes a leased message
    async fn ack(&self, message: &TaskMessage) -> AppResult<()>;

    /// Stores the updated message and makes it pending again at `run_at`
    async fn retry(&self, message: &TaskMessage, run_at: DateTime<Utc>) -> AppResult<()>;

    /// Moves the updated message to the archive
    async fn archive(&self, message: &TaskMessage) -> AppResult<()>;

    /// Moves retries due at `now` back to their queue, returns how many moved
    async fn forward_due(&self, now: DateTime<Utc>) -> AppResult<usize>;

    /// Re-queues messages whose lease ended before `now`, returns how many moved
    async fn recover_expired(&self, now: DateTime<Utc>) -> AppResult<usize>;

    async fn queue_stats(&self) -> AppResult<Vec<QueueStats>>;

    /// Claims `key` for `ttl`; false if another process holds it
    async fn claim_slot(&self, key: &str, ttl: Duration) -> AppResult<bool>;
}
