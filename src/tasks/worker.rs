//! Task worker: pulls leased messages from the broker in strict queue
//! priority and runs them through a [`TaskProcessor`].
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, QueueConfig};
use crate::error::{AppError, AppResult};
use crate::tasks::handlers::TaskProcessor;
use crate::tasks::{Broker, Queue, Task, TaskMessage};

/// Extra lease time past the task deadline before a message counts as abandoned
const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Exponential backoff between attempts of a failing task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt of a task that already failed `retried` times
    pub fn delay(&self, retried: u32) -> Duration {
        2u32.checked_pow(retried)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queues: QueueConfig,
    /// Sleep between polls when no queue yields work
    pub poll_interval: Duration,
    /// Deadline of a single task run
    pub task_timeout: Duration,
    /// How often due retries are forwarded and expired leases recovered
    pub maintenance_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            poll_interval: Duration::from_millis(500),
            task_timeout: Duration::from_secs(1800),
            maintenance_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queues: config.queues(),
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
            retry: config.retry_policy(),
            ..Default::default()
        }
    }

    pub fn with_queues(mut self, queues: QueueConfig) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// What happened to a message after one run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Retried { run_at: DateTime<Utc> },
    Archived,
}

/// Handle for controlling a running worker
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops pulling new work and waits for in-flight tasks to finish
    pub async fn shutdown(self) -> AppResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| AppError::Internal("Failed to send shutdown signal".to_string()))?;
        self.join
            .await
            .map_err(|e| AppError::Internal(format!("Worker task failed: {}", e)))
    }
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    processor: Arc<dyn TaskProcessor>,
    config: WorkerConfig,
    /// Queues with a non-zero concurrency, highest priority first
    queues: Vec<Queue>,
    /// Worker slots shared by every queue
    slots: Arc<Semaphore>,
    size: usize,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        processor: Arc<dyn TaskProcessor>,
        config: WorkerConfig,
    ) -> Self {
        let queues = Queue::ALL
            .into_iter()
            .filter(|queue| {
                let count = match queue {
                    Queue::Critical => config.queues.critical,
                    Queue::Default => config.queues.default,
                    Queue::Low => config.queues.low,
                };
                count > 0
            })
            .collect();
        let size = config.queues.total();

        Self {
            broker,
            processor,
            config,
            queues,
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Start the worker and return a handle for control
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = Arc::new(self);
        let join = tokio::spawn(worker.run(shutdown_rx));
        WorkerHandle { shutdown_tx, join }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            critical = self.config.queues.critical,
            default = self.config.queues.default,
            low = self.config.queues.low,
            slots = self.size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Task worker started"
        );

        let mut last_maintenance: Option<Instant> = None;
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            if last_maintenance.map_or(true, |at| at.elapsed() >= self.config.maintenance_interval) {
                self.maintain().await;
                last_maintenance = Some(Instant::now());
            }

            match self.next_message().await {
                Ok(Some((message, permit))) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let task_id = message.id;
                        if let Err(e) = worker.process_message(message).await {
                            error!(task_id = %task_id, error = %e, "Failed to settle task");
                        }
                    });
                    // More work may be waiting; poll again right away
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to dequeue task"),
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        info!("Task worker received shutdown signal, waiting for running tasks");
        self.drain().await;
        info!("Task worker stopped");
    }

    /// Waits until every worker slot is free again
    async fn drain(&self) {
        if self.slots.acquire_many(self.size as u32).await.is_err() {
            warn!("Worker slots closed while draining");
        }
    }

    /// Leases the next message for a free worker slot.
    ///
    /// Queues are visited in strict priority order on every poll, so a lower
    /// queue is only served while every higher queue is empty.
    pub async fn next_message(&self) -> AppResult<Option<(TaskMessage, OwnedSemaphorePermit)>> {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            return Ok(None);
        };
        let lease = self.config.task_timeout + LEASE_MARGIN;
        for queue in &self.queues {
            if let Some(message) = self.broker.dequeue(*queue, lease).await? {
                return Ok(Some((message, permit)));
            }
        }
        Ok(None)
    }

    /// Runs one leased message and settles it on the broker
    #[instrument(skip(self, message), fields(task_id = %message.id, task_type = %message.task_type, queue = %message.queue))]
    pub async fn process_message(&self, mut message: TaskMessage) -> AppResult<Outcome> {
        let started = Instant::now();
        let result = match Task::decode(&message.task_type, &message.payload) {
            Ok(task) => {
                match tokio::time::timeout(self.config.task_timeout, self.processor.process(task))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Internal(format!(
                        "Task exceeded timeout of {}s",
                        self.config.task_timeout.as_secs()
                    ))),
                }
            }
            Err(e) => Err(e),
        };

        let err = match result {
            Ok(()) => {
                self.broker.ack(&message).await?;
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Task completed");
                return Ok(Outcome::Completed);
            }
            Err(e) => e,
        };

        message.last_error = Some(err.to_string());

        if !err.is_retryable() || message.retried >= message.max_retry {
            self.broker.archive(&message).await?;
            error!(
                error = %err,
                retried = message.retried,
                retryable = err.is_retryable(),
                "Task failed permanently"
            );
            return Ok(Outcome::Archived);
        }

        let delay = self.config.retry.delay(message.retried);
        message.retried += 1;
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.broker.retry(&message, run_at).await?;
        warn!(
            error = %err,
            retried = message.retried,
            max_retry = message.max_retry,
            delay_secs = delay.as_secs(),
            "Task failed, scheduled retry"
        );
        Ok(Outcome::Retried { run_at })
    }

    /// Forwards due retries and recovers abandoned leases
    pub async fn maintain(&self) {
        let now = Utc::now();
        match self.broker.forward_due(now).await {
            Ok(0) => {}
            Ok(moved) => debug!(moved, "Forwarded due retries"),
            Err(e) => error!(error = %e, "Failed to forward due retries"),
        }
        if let Err(e) = self.broker.recover_expired(now).await {
            error!(error = %e, "Failed to recover expired leases");
        }
    }
}
