//! Task names, payloads and queues of the content pipeline
//!
//! A task travels as a [`TaskMessage`]: its type name, a JSON payload and
//! delivery bookkeeping. Workers decode messages into the [`Task`] enum in
//! one place, [`Task::decode`], so handlers only ever see typed payloads.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod broker;
pub mod handlers;
pub mod scheduler;
pub mod worker;

pub use broker::{Broker, QueueStats};
pub use handlers::{TaskHandler, TaskProcessor};
pub use scheduler::{ScheduleEntry, Scheduler, SchedulerHandle};
pub use worker::{Outcome, RetryPolicy, Worker, WorkerConfig, WorkerHandle};

pub const TYPE_SYNC_DATA: &str = "sync:data";
pub const TYPE_SYNC_FEED: &str = "sync:feed";
pub const TYPE_EMBED_ITEM: &str = "embed:item";
pub const TYPE_EMBED_USER: &str = "embed:user";
pub const TYPE_CACHE_USER: &str = "cache:user";
pub const TYPE_SYNC_USER: &str = "sync:user";

/// Priority queues, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Queue {
    Critical,
    Default,
    Low,
}

impl Queue {
    /// All queues in strict service order
    pub const ALL: [Queue; 3] = [Queue::Critical, Queue::Default, Queue::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Critical => "critical",
            Queue::Default => "default",
            Queue::Low => "low",
        }
    }
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Queue {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Queue::Critical),
            "default" => Ok(Queue::Default),
            "low" => Ok(Queue::Low),
            other => Err(AppError::InvalidPayload(format!("unknown queue '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFeedPayload {
    pub feed_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedItemPayload {
    pub item_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    pub user_id: Uuid,
}

/// A unit of pipeline work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Fan out one feed sync per stored feed
    SyncData,
    SyncFeed { feed_id: Uuid },
    EmbedItem { item_id: Uuid },
    /// Recluster a user's liked-item embeddings
    EmbedUser { user_id: Uuid },
    /// Refresh a user's cached suggestions
    CacheUser { user_id: Uuid },
    /// Fan out one cache refresh per user
    SyncUser,
}

impl Task {
    pub fn type_name(&self) -> &'static str {
        match self {
            Task::SyncData => TYPE_SYNC_DATA,
            Task::SyncFeed { .. } => TYPE_SYNC_FEED,
            Task::EmbedItem { .. } => TYPE_EMBED_ITEM,
            Task::EmbedUser { .. } => TYPE_EMBED_USER,
            Task::CacheUser { .. } => TYPE_CACHE_USER,
            Task::SyncUser => TYPE_SYNC_USER,
        }
    }

    /// Queue a task is enqueued on
    pub fn queue(&self) -> Queue {
        match self {
            Task::SyncData | Task::SyncFeed { .. } | Task::SyncUser => Queue::Critical,
            Task::EmbedItem { .. } | Task::EmbedUser { .. } | Task::CacheUser { .. } => {
                Queue::Default
            }
        }
    }

    pub fn payload(&self) -> AppResult<Value> {
        let value = match *self {
            Task::SyncData | Task::SyncUser => Value::Null,
            Task::SyncFeed { feed_id } => serde_json::to_value(SyncFeedPayload { feed_id })?,
            Task::EmbedItem { item_id } => serde_json::to_value(EmbedItemPayload { item_id })?,
            Task::EmbedUser { user_id } | Task::CacheUser { user_id } => {
                serde_json::to_value(UserPayload { user_id })?
            }
        };
        Ok(value)
    }

    /// Decodes a task from its type name and payload.
    ///
    /// Unknown names and malformed payloads are [`AppError::InvalidPayload`].
    pub fn decode(type_name: &str, payload: &Value) -> AppResult<Task> {
        fn parse<T: serde::de::DeserializeOwned>(type_name: &str, payload: &Value) -> AppResult<T> {
            T::deserialize(payload).map_err(|e| {
                AppError::InvalidPayload(format!("{} payload: {}", type_name, e))
            })
        }

        match type_name {
            TYPE_SYNC_DATA => Ok(Task::SyncData),
            TYPE_SYNC_USER => Ok(Task::SyncUser),
            TYPE_SYNC_FEED => {
                let p: SyncFeedPayload = parse(type_name, payload)?;
                Ok(Task::SyncFeed { feed_id: p.feed_id })
            }
            TYPE_EMBED_ITEM => {
                let p: EmbedItemPayload = parse(type_name, payload)?;
                Ok(Task::EmbedItem { item_id: p.item_id })
            }
            TYPE_EMBED_USER => {
                let p: UserPayload = parse(type_name, payload)?;
                Ok(Task::EmbedUser { user_id: p.user_id })
            }
            TYPE_CACHE_USER => {
                let p: UserPayload = parse(type_name, payload)?;
                Ok(Task::CacheUser { user_id: p.user_id })
            }
            other => Err(AppError::InvalidPayload(format!("unknown task type '{}'", other))),
        }
    }
}

/// A task as stored by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    pub queue: Queue,
    /// Attempts that already failed
    #[serde(default)]
    pub retried: u32,
    pub max_retry: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(task: &Task, max_retry: u32) -> AppResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            task_type: task.type_name().to_string(),
            payload: task.payload()?,
            queue: task.queue(),
            retried: 0,
            max_retry,
            last_error: None,
            enqueued_at: Utc::now(),
        })
    }
}

/// Identity of an enqueued task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: Uuid,
    pub queue: Queue,
}

/// Enqueue side of the task queue, as seen by stages and user actions
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> AppResult<TaskInfo>;
}

/// [`TaskQueue`] over a [`Broker`]
#[derive(Clone)]
pub struct TaskClient {
    broker: Arc<dyn Broker>,
    max_retry: u32,
}

impl TaskClient {
    pub fn new(broker: Arc<dyn Broker>, max_retry: u32) -> Self {
        Self { broker, max_retry }
    }
}

#[async_trait::async_trait]
impl TaskQueue for TaskClient {
    async fn enqueue(&self, task: Task) -> AppResult<TaskInfo> {
        let message = TaskMessage::new(&task, self.max_retry)?;
        let info = TaskInfo {
            id: message.id,
            queue: message.queue,
        };
        self.broker.enqueue(&message).await?;
        tracing::debug!(task_id = %info.id, task_type = task.type_name(), queue = %info.queue, "Enqueued task");
        Ok(info)
    }
}
