use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;

use crate::error::AppResult;
use crate::tasks::broker::{Broker, QueueStats};
use crate::tasks::{Queue, TaskMessage};

const KEY_PREFIX: &str = "gazette";

/// Upper bound of messages moved by one forward or recovery pass per queue
const MOVE_BATCH: usize = 100;

/// Archived tasks kept per queue
const ARCHIVE_MAX_SIZE: usize = 10_000;

/// Age after which an archived task is dropped
const ARCHIVE_MAX_AGE: Duration = Duration::from_secs(90 * 24 * 3600);

/// KEYS: pending list, active list, lease zset
/// ARGV: lease deadline (ms), task key prefix
const DEQUEUE_SCRIPT: &str = r#"
local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if not id then
    return false
end
local msg = redis.call('HGET', ARGV[2] .. id, 'msg')
if not msg then
    redis.call('LREM', KEYS[2], 1, id)
    return false
end
redis.call('ZADD', KEYS[3], ARGV[1], id)
return {id, msg}
"#;

/// KEYS: active list, lease zset, archive zset
/// ARGV: task id, message body, now (ms), oldest kept (ms), max size, task key prefix
const ARCHIVE_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', ARGV[6] .. ARGV[1], 'msg', ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', '(' .. ARGV[4])
for _, id in ipairs(expired) do
    redis.call('DEL', ARGV[6] .. id)
end
redis.call('ZREMRANGEBYSCORE', KEYS[3], '-inf', '(' .. ARGV[4])
local overflow = redis.call('ZRANGE', KEYS[3], 0, -(tonumber(ARGV[5]) + 1))
for _, id in ipairs(overflow) do
    redis.call('DEL', ARGV[6] .. id)
end
redis.call('ZREMRANGEBYRANK', KEYS[3], 0, -(tonumber(ARGV[5]) + 1))
return #expired + #overflow
"#;

/// KEYS: source zset, pending list, optional active list
/// ARGV: max score (ms), batch size
const MOVE_DUE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    if KEYS[3] then
        redis.call('LREM', KEYS[3], 1, id)
        redis.call('RPUSH', KEYS[2], id)
    else
        redis.call('LPUSH', KEYS[2], id)
    end
end
return #ids
"#;

enum QueueKey {
    Pending(Queue),
    Active(Queue),
    Lease(Queue),
    Retry(Queue),
    Archived(Queue),
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKey::Pending(q) => write!(f, "{}:queue:{}", KEY_PREFIX, q),
            QueueKey::Active(q) => write!(f, "{}:active:{}", KEY_PREFIX, q),
            QueueKey::Lease(q) => write!(f, "{}:lease:{}", KEY_PREFIX, q),
            QueueKey::Retry(q) => write!(f, "{}:retry:{}", KEY_PREFIX, q),
            QueueKey::Archived(q) => write!(f, "{}:archived:{}", KEY_PREFIX, q),
        }
    }
}

fn task_key_prefix() -> String {
    format!("{}:task:", KEY_PREFIX)
}

fn task_key(message: &TaskMessage) -> String {
    format!("{}{}", task_key_prefix(), message.id)
}

/// Score below which archived tasks are dropped
fn archive_cutoff(now: DateTime<Utc>, max_age: Duration) -> i64 {
    now.timestamp_millis() - max_age.as_millis() as i64
}

/// Reliable task queues on Redis lists and sorted sets
///
/// Pending ids are LPUSHed and RPOPLPUSHed into an active list, so each
/// queue is FIFO. The message body lives in a per-task hash. Archives are
/// trimmed by age and size whenever a task is archived.
#[derive(Clone)]
pub struct RedisBroker {
    connection: ConnectionManager,
    dequeue_script: Script,
    move_due_script: Script,
    archive_script: Script,
    archive_max_size: usize,
    archive_max_age: Duration,
}

impl RedisBroker {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            move_due_script: Script::new(MOVE_DUE_SCRIPT),
            archive_script: Script::new(ARCHIVE_SCRIPT),
            archive_max_size: ARCHIVE_MAX_SIZE,
            archive_max_age: ARCHIVE_MAX_AGE,
        }
    }

    pub fn with_archive_limits(mut self, max_size: usize, max_age: Duration) -> Self {
        self.archive_max_size = max_size.max(1);
        self.archive_max_age = max_age;
        self
    }

    /// Moves a leased id into the archive with `body`, then trims the archive
    async fn archive_raw(&self, queue: Queue, id: &str, body: &str) -> AppResult<()> {
        let now = Utc::now();
        let mut conn = self.connection.clone();
        let trimmed: usize = self
            .archive_script
            .key(QueueKey::Active(queue).to_string())
            .key(QueueKey::Lease(queue).to_string())
            .key(QueueKey::Archived(queue).to_string())
            .arg(id)
            .arg(body)
            .arg(now.timestamp_millis())
            .arg(archive_cutoff(now, self.archive_max_age))
            .arg(self.archive_max_size)
            .arg(task_key_prefix())
            .invoke_async(&mut conn)
            .await?;
        if trimmed > 0 {
            tracing::debug!(queue = %queue, trimmed, "Trimmed archived tasks");
        }
        Ok(())
    }

    /// Stores the message body and detaches the id from the active set
    fn settle(pipe: &mut redis::Pipeline, message: &TaskMessage) -> AppResult<()> {
        let id = message.id.to_string();
        pipe.lrem(QueueKey::Active(message.queue).to_string(), 1, &id)
            .ignore()
            .zrem(QueueKey::Lease(message.queue).to_string(), &id)
            .ignore()
            .hset(task_key(message), "msg", serde_json::to_string(message)?)
            .ignore();
        Ok(())
    }
}

#[async_trait::async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, message: &TaskMessage) -> AppResult<()> {
        let body = serde_json::to_string(message)?;
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(task_key(message), "msg", body)
            .ignore()
            .lpush(QueueKey::Pending(message.queue).to_string(), message.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, queue: Queue, lease: Duration) -> AppResult<Option<TaskMessage>> {
        let mut conn = self.connection.clone();
        loop {
            let deadline = Utc::now().timestamp_millis() + lease.as_millis() as i64;
            let leased: Option<(String, String)> = self
                .dequeue_script
                .key(QueueKey::Pending(queue).to_string())
                .key(QueueKey::Active(queue).to_string())
                .key(QueueKey::Lease(queue).to_string())
                .arg(deadline)
                .arg(task_key_prefix())
                .invoke_async(&mut conn)
                .await?;

            let Some((id, body)) = leased else {
                return Ok(None);
            };
            match serde_json::from_str::<TaskMessage>(&body) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    // Left leased, it would return on every lease recovery
                    tracing::error!(queue = %queue, task_id = %id, error = %e, "Archiving undecodable task envelope");
                    self.archive_raw(queue, &id, &body).await?;
                }
            }
        }
    }

    async fn ack(&self, message: &TaskMessage) -> AppResult<()> {
        let id = message.id.to_string();
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .lrem(QueueKey::Active(message.queue).to_string(), 1, &id)
            .ignore()
            .zrem(QueueKey::Lease(message.queue).to_string(), &id)
            .ignore()
            .del(task_key(message))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(&self, message: &TaskMessage, run_at: DateTime<Utc>) -> AppResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::settle(&mut pipe, message)?;
        pipe.zadd(
            QueueKey::Retry(message.queue).to_string(),
            message.id.to_string(),
            run_at.timestamp_millis(),
        )
        .ignore();

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn archive(&self, message: &TaskMessage) -> AppResult<()> {
        let body = serde_json::to_string(message)?;
        self.archive_raw(message.queue, &message.id.to_string(), &body)
            .await
    }

    async fn forward_due(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.connection.clone();
        let mut moved = 0;
        for queue in Queue::ALL {
            let count: usize = self
                .move_due_script
                .key(QueueKey::Retry(queue).to_string())
                .key(QueueKey::Pending(queue).to_string())
                .arg(now.timestamp_millis())
                .arg(MOVE_BATCH)
                .invoke_async(&mut conn)
                .await?;
            moved += count;
        }
        Ok(moved)
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.connection.clone();
        let mut moved = 0;
        for queue in Queue::ALL {
            let count: usize = self
                .move_due_script
                .key(QueueKey::Lease(queue).to_string())
                .key(QueueKey::Pending(queue).to_string())
                .key(QueueKey::Active(queue).to_string())
                .arg(now.timestamp_millis())
                .arg(MOVE_BATCH)
                .invoke_async(&mut conn)
                .await?;
            if count > 0 {
                tracing::warn!(queue = %queue, count, "Recovered tasks with expired leases");
            }
            moved += count;
        }
        Ok(moved)
    }

    async fn queue_stats(&self) -> AppResult<Vec<QueueStats>> {
        let mut pipe = redis::pipe();
        for queue in Queue::ALL {
            pipe.llen(QueueKey::Pending(queue).to_string())
                .llen(QueueKey::Active(queue).to_string())
                .zcard(QueueKey::Retry(queue).to_string())
                .zcard(QueueKey::Archived(queue).to_string());
        }

        let mut conn = self.connection.clone();
        let counts: Vec<u64> = pipe.query_async(&mut conn).await?;

        let stats = Queue::ALL
            .iter()
            .zip(counts.chunks(4))
            .map(|(queue, c)| QueueStats {
                queue: *queue,
                pending: c.first().copied().unwrap_or_default(),
                active: c.get(1).copied().unwrap_or_default(),
                scheduled: c.get(2).copied().unwrap_or_default(),
                archived: c.get(3).copied().unwrap_or_default(),
            })
            .collect();
        Ok(stats)
    }

    async fn claim_slot(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let key = format!("{}:slot:{}", KEY_PREFIX, key);
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::redis::cache::create_redis_connection;
    use crate::tasks::Task;
    use uuid::Uuid;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[test]
    fn test_queue_keys() {
        assert_eq!(QueueKey::Pending(Queue::Critical).to_string(), "gazette:queue:critical");
        assert_eq!(QueueKey::Active(Queue::Default).to_string(), "gazette:active:default");
        assert_eq!(QueueKey::Lease(Queue::Low).to_string(), "gazette:lease:low");
        assert_eq!(QueueKey::Retry(Queue::Low).to_string(), "gazette:retry:low");
        assert_eq!(QueueKey::Archived(Queue::Low).to_string(), "gazette:archived:low");
    }

    #[test]
    fn test_task_key() {
        let message = TaskMessage::new(&Task::SyncData, 3).unwrap();
        assert_eq!(task_key(&message), format!("gazette:task:{}", message.id));
    }

    #[test]
    fn test_archive_cutoff() {
        let now = Utc::now();
        let cutoff = archive_cutoff(now, Duration::from_secs(60));
        assert_eq!(now.timestamp_millis() - cutoff, 60_000);
        assert_eq!(archive_cutoff(now, Duration::ZERO), now.timestamp_millis());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_enqueue_dequeue_ack() {
        let broker = RedisBroker::new(create_redis_connection(&redis_url()).await.unwrap());
        let message = TaskMessage::new(&Task::EmbedItem { item_id: Uuid::new_v4() }, 3).unwrap();

        broker.enqueue(&message).await.unwrap();
        let leased = broker
            .dequeue(Queue::Default, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.id, message.id);

        broker.ack(&leased).await.unwrap();
        let next = broker.dequeue(Queue::Default, Duration::from_secs(30)).await.unwrap();
        assert!(next.map(|m| m.id != message.id).unwrap_or(true));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_claim_slot_is_exclusive() {
        let broker = RedisBroker::new(create_redis_connection(&redis_url()).await.unwrap());
        let key = format!("test:{}", Uuid::new_v4());
        assert!(broker.claim_slot(&key, Duration::from_secs(5)).await.unwrap());
        assert!(!broker.claim_slot(&key, Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_undecodable_envelope_is_archived() {
        let mut conn = create_redis_connection(&redis_url()).await.unwrap();
        let broker = RedisBroker::new(conn.clone());
        let id = Uuid::new_v4().to_string();

        let _: () = redis::pipe()
            .hset(format!("{}{}", task_key_prefix(), id), "msg", "{not json")
            .ignore()
            .lpush(QueueKey::Pending(Queue::Low).to_string(), &id)
            .ignore()
            .query_async(&mut conn)
            .await
            .unwrap();

        while let Some(message) = broker.dequeue(Queue::Low, Duration::from_secs(30)).await.unwrap() {
            assert_ne!(message.id.to_string(), id);
            broker.ack(&message).await.unwrap();
        }

        let archived: Option<f64> = redis::cmd("ZSCORE")
            .arg(QueueKey::Archived(Queue::Low).to_string())
            .arg(&id)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(archived.is_some());
        let leased: Option<f64> = redis::cmd("ZSCORE")
            .arg(QueueKey::Lease(Queue::Low).to_string())
            .arg(&id)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(leased.is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_archive_is_trimmed_to_max_size() {
        let mut conn = create_redis_connection(&redis_url()).await.unwrap();
        let broker = RedisBroker::new(conn.clone()).with_archive_limits(2, ARCHIVE_MAX_AGE);

        let mut archived = Vec::new();
        for _ in 0..3 {
            let mut message = TaskMessage::new(&Task::SyncUser, 3).unwrap();
            message.queue = Queue::Low;
            broker.archive(&message).await.unwrap();
            archived.push(message);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let size: usize = redis::cmd("ZCARD")
            .arg(QueueKey::Archived(Queue::Low).to_string())
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(size, 2);
        let oldest_body: Option<String> = redis::cmd("HGET")
            .arg(task_key(&archived[0]))
            .arg("msg")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(oldest_body.is_none());
    }
}
