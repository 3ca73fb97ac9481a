//! Periodic enqueueing of the fan-out tasks
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::tasks::{Broker, Task, TaskQueue};

/// A task enqueued once per `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub task: Task,
    pub interval: Duration,
}

impl ScheduleEntry {
    pub fn new(task: Task, interval: Duration) -> Self {
        Self { task, interval }
    }

    /// Broker key of the slot covering `now`. Every scheduler process
    /// computes the same key for the same period.
    pub fn slot_key(&self, now: chrono::DateTime<Utc>) -> String {
        let period = self.interval.as_secs().max(1) as i64;
        format!("{}:{}", self.task.type_name(), now.timestamp().div_euclid(period))
    }
}

/// Enqueues each [`ScheduleEntry`] on its interval.
///
/// Several scheduler processes may run side by side: a period's slot is
/// claimed on the broker first, so each task is enqueued once per period.
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    broker: Arc<dyn Broker>,
    queue: Arc<dyn TaskQueue>,
}

pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) -> AppResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| AppError::Internal("Failed to send shutdown signal".to_string()))?;
        self.join
            .await
            .map_err(|e| AppError::Internal(format!("Scheduler task failed: {}", e)))
    }
}

impl Scheduler {
    pub fn new(broker: Arc<dyn Broker>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            entries: Vec::new(),
            broker,
            queue,
        }
    }

    /// Scheduler with the feed and user sync entries from `config`
    pub fn from_config(config: &Config, broker: Arc<dyn Broker>, queue: Arc<dyn TaskQueue>) -> Self {
        Self::new(broker, queue)
            .with_entry(ScheduleEntry::new(
                Task::SyncData,
                Duration::from_secs(config.sync_data_interval_secs),
            ))
            .with_entry(ScheduleEntry::new(
                Task::SyncUser,
                Duration::from_secs(config.sync_user_interval_secs),
            ))
    }

    pub fn with_entry(mut self, entry: ScheduleEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticks = tokio::task::JoinSet::new();
        for entry in self.entries.iter().copied() {
            if entry.interval.is_zero() {
                tracing::warn!(task_type = entry.task.type_name(), "Skipping schedule entry without interval");
                continue;
            }
            tracing::info!(
                task_type = entry.task.type_name(),
                interval_secs = entry.interval.as_secs(),
                "Scheduled periodic task"
            );

            let broker = Arc::clone(&self.broker);
            let queue = Arc::clone(&self.queue);
            ticks.spawn(async move {
                let mut interval = interval_at(Instant::now() + entry.interval, entry.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if let Err(e) = fire(broker.as_ref(), queue.as_ref(), &entry).await {
                        tracing::error!(task_type = entry.task.type_name(), error = %e, "Failed to enqueue periodic task");
                    }
                }
            });
        }

        let _ = shutdown_rx.recv().await;
        ticks.shutdown().await;
        tracing::info!("Scheduler stopped");
    }
}

/// Claims the current slot of `entry` and enqueues its task when the claim
/// succeeds. Returns whether the task was enqueued.
pub async fn fire(
    broker: &dyn Broker,
    queue: &dyn TaskQueue,
    entry: &ScheduleEntry,
) -> AppResult<bool> {
    let key = entry.slot_key(Utc::now());
    if !broker.claim_slot(&key, entry.interval).await? {
        tracing::debug!(slot = %key, "Slot already claimed");
        return Ok(false);
    }

    let info = queue.enqueue(entry.task).await?;
    tracing::info!(
        task_id = %info.id,
        task_type = entry.task.type_name(),
        queue = %info.queue,
        "Enqueued periodic task"
    );
    Ok(true)
}
