//! In-memory stand-ins for Postgres, Redis and the remote services
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::types::Json;
use uuid::Uuid;

use gazette::config::PipelineSettings;
use gazette::db::{Repository, SuggestionStore};
use gazette::error::{AppError, AppResult};
use gazette::models::{
    Centroid, Feed, Item, ItemEmbeddingChunk, NewItem, RemoteFeed, SuggestedItem,
    UserEmbeddingCluster, UserLike,
};
use gazette::services::{EmbeddingProvider, FeedFetcher};
use gazette::tasks::{
    Broker, Queue, QueueStats, Task, TaskClient, TaskHandler, TaskInfo, TaskMessage, TaskQueue,
};

#[derive(Default)]
pub struct RepositoryState {
    pub feeds: Vec<Feed>,
    pub items: Vec<Item>,
    pub embeddings: BTreeMap<(Uuid, i32), Vector>,
    pub likes: Vec<UserLike>,
    pub clusters: HashMap<Uuid, Vec<UserEmbeddingCluster>>,
    pub users: Vec<Uuid>,
    /// Ranked candidates returned for a user, best first
    pub suggestions: HashMap<Uuid, Vec<SuggestedItem>>,
}

#[derive(Default)]
pub struct MemoryRepository {
    pub state: Mutex<RepositoryState>,
}

impl MemoryRepository {
    pub fn add_feed(&self, feed_link: &str) -> Feed {
        let feed = Feed {
            id: Uuid::new_v4(),
            feed_link: feed_link.to_string(),
            title: None,
            image: None,
        };
        self.state.lock().unwrap().feeds.push(feed.clone());
        feed
    }

    pub fn add_item(&self, new: NewItem) -> Item {
        let item = item_from(new);
        self.state.lock().unwrap().items.push(item.clone());
        item
    }

    pub fn add_user(&self) -> Uuid {
        let user_id = Uuid::new_v4();
        self.state.lock().unwrap().users.push(user_id);
        user_id
    }

    pub fn items_of(&self, feed_id: Uuid) -> Vec<Item> {
        let state = self.state.lock().unwrap();
        state.items.iter().filter(|i| i.feed_id == feed_id).cloned().collect()
    }

    pub fn chunk_indices(&self, item_id: Uuid) -> Vec<i32> {
        let state = self.state.lock().unwrap();
        state
            .embeddings
            .keys()
            .filter(|(id, _)| *id == item_id)
            .map(|(_, index)| *index)
            .collect()
    }

    pub fn clusters_of(&self, user_id: Uuid) -> Vec<UserEmbeddingCluster> {
        let state = self.state.lock().unwrap();
        state.clusters.get(&user_id).cloned().unwrap_or_default()
    }
}

pub fn new_item(feed_id: Uuid, guid: &str, published: Option<DateTime<Utc>>) -> NewItem {
    NewItem {
        feed_id,
        title: Some(guid.to_string()),
        description: None,
        content: None,
        link: None,
        links: vec![],
        updated_parsed: None,
        published_parsed: published,
        authors: vec![],
        guid: Some(guid.to_string()),
        image: None,
        categories: vec![],
    }
}

fn item_from(new: NewItem) -> Item {
    Item {
        id: Uuid::new_v4(),
        feed_id: new.feed_id,
        title: new.title,
        description: new.description,
        content: new.content,
        link: new.link,
        links: new.links,
        updated_parsed: new.updated_parsed,
        published_parsed: new.published_parsed,
        authors: Json(new.authors),
        guid: new.guid,
        image: new.image,
        categories: new.categories,
    }
}

fn page<T: Clone>(rows: &[T], limit: i64, offset: i64) -> Vec<T> {
    rows.iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    async fn count_feeds(&self) -> AppResult<i64> {
        Ok(self.state.lock().unwrap().feeds.len() as i64)
    }

    async fn list_feeds(&self, limit: i64, offset: i64) -> AppResult<Vec<Feed>> {
        Ok(page(&self.state.lock().unwrap().feeds, limit, offset))
    }

    async fn get_feed(&self, feed_id: Uuid) -> AppResult<Feed> {
        let state = self.state.lock().unwrap();
        state
            .feeds
            .iter()
            .find(|f| f.id == feed_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("feed {}", feed_id)))
    }

    async fn get_last_item(&self, feed_id: Uuid) -> AppResult<Option<Item>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|i| i.feed_id == feed_id && i.cursor().is_some())
            .max_by_key(|i| i.cursor())
            .cloned())
    }

    async fn create_item(&self, new: NewItem) -> AppResult<Option<Item>> {
        let mut state = self.state.lock().unwrap();
        if state
            .items
            .iter()
            .any(|i| i.feed_id == new.feed_id && i.guid.is_some() && i.guid == new.guid)
        {
            return Ok(None);
        }
        let item = item_from(new);
        state.items.push(item.clone());
        Ok(Some(item))
    }

    async fn get_item(&self, item_id: Uuid) -> AppResult<Item> {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("item {}", item_id)))
    }

    async fn upsert_item_embedding(
        &self,
        item_id: Uuid,
        chunk_index: i32,
        embedding: Vector,
    ) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state.embeddings.insert((item_id, chunk_index), embedding);
        Ok(())
    }

    async fn delete_item_embeddings_from(&self, item_id: Uuid, from_index: i32) -> AppResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.embeddings.len();
        state
            .embeddings
            .retain(|(id, index), _| *id != item_id || *index < from_index);
        Ok((before - state.embeddings.len()) as u64)
    }

    async fn get_item_embeddings(&self, item_id: Uuid) -> AppResult<Vec<ItemEmbeddingChunk>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .embeddings
            .iter()
            .filter(|((id, _), _)| *id == item_id)
            .map(|((id, index), embedding)| ItemEmbeddingChunk {
                item_id: *id,
                chunk_index: *index,
                embedding: embedding.clone(),
            })
            .collect())
    }

    async fn count_liked_items(&self, user_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.likes.iter().filter(|l| l.user_id == user_id).count() as i64)
    }

    async fn list_liked_item_ids(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        let ids: Vec<Uuid> = state
            .likes
            .iter()
            .filter(|l| l.user_id == user_id)
            .map(|l| l.item_id)
            .collect();
        Ok(page(&ids, limit, offset))
    }

    async fn replace_user_clusters(&self, user_id: Uuid, centroids: &[Centroid]) -> AppResult<()> {
        let clusters = centroids
            .iter()
            .enumerate()
            .map(|(cluster_id, c)| UserEmbeddingCluster {
                user_id,
                cluster_id: cluster_id as i32,
                centroid: Vector::from(c.vector.clone()),
                member_count: c.member_count as i32,
            })
            .collect();
        self.state.lock().unwrap().clusters.insert(user_id, clusters);
        Ok(())
    }

    async fn count_users(&self) -> AppResult<i64> {
        Ok(self.state.lock().unwrap().users.len() as i64)
    }

    async fn list_user_ids(&self, limit: i64, offset: i64) -> AppResult<Vec<Uuid>> {
        Ok(page(&self.state.lock().unwrap().users, limit, offset))
    }

    async fn list_suggested_items_for_cache(&self, user_id: Uuid) -> AppResult<Vec<SuggestedItem>> {
        let state = self.state.lock().unwrap();
        Ok(state.suggestions.get(&user_id).cloned().unwrap_or_default())
    }

    async fn count_suggested_items(&self, user_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.suggestions.get(&user_id).map_or(0, Vec::len) as i64)
    }

    async fn list_suggested_items(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<SuggestedItem>> {
        let state = self.state.lock().unwrap();
        let ranked = state.suggestions.get(&user_id).cloned().unwrap_or_default();
        Ok(page(&ranked, limit, offset))
    }

    async fn create_user_like(&self, user_id: Uuid, item_id: Uuid) -> AppResult<UserLike> {
        let mut state = self.state.lock().unwrap();
        if state
            .likes
            .iter()
            .any(|l| l.user_id == user_id && l.item_id == item_id)
        {
            return Err(AppError::Conflict(format!("already liked item {}", item_id)));
        }
        let like = UserLike {
            user_id,
            item_id,
            liked_at: Utc::now(),
        };
        state.likes.push(like.clone());
        Ok(like)
    }

    async fn delete_user_like(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.likes.len();
        state
            .likes
            .retain(|l| !(l.user_id == user_id && l.item_id == item_id));
        if state.likes.len() == before {
            return Err(AppError::NotFound(format!("like for item {}", item_id)));
        }
        Ok(())
    }
}

/// Suggestion cache keyed by user, with the expiry recorded but not enforced
#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<Uuid, (Vec<SuggestedItem>, Duration)>>,
    /// When each entry was last given its expiry
    pub expiry_set_at: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    pub fail_reads: Mutex<bool>,
}

impl MemoryCache {
    /// TTL of a user's entry and the moment it was applied
    pub fn expiry_of(&self, user_id: Uuid) -> Option<(Duration, DateTime<Utc>)> {
        let ttl = self.entries.lock().unwrap().get(&user_id).map(|(_, ttl)| *ttl)?;
        let set_at = *self.expiry_set_at.lock().unwrap().get(&user_id)?;
        Some((ttl, set_at))
    }
}

#[async_trait::async_trait]
impl SuggestionStore for MemoryCache {
    async fn store_user_suggestions(
        &self,
        user_id: Uuid,
        items: &[SuggestedItem],
        ttl: Duration,
    ) -> AppResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let mut expiry_set_at = self.expiry_set_at.lock().unwrap();
        if items.is_empty() {
            entries.remove(&user_id);
            expiry_set_at.remove(&user_id);
        } else {
            entries.insert(user_id, (items.to_vec(), ttl));
            expiry_set_at.insert(user_id, Utc::now());
        }
        Ok(())
    }

    async fn get_user_suggestions(&self, user_id: Uuid) -> AppResult<Vec<SuggestedItem>> {
        if *self.fail_reads.lock().unwrap() {
            return Err(AppError::Internal("cache unreachable".to_string()));
        }
        let entries = self.entries.lock().unwrap();
        let mut items = entries
            .get(&user_id)
            .map(|(items, _)| items.clone())
            .unwrap_or_default();
        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(items)
    }

    async fn remove_user_suggestion(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some((items, _)) = entries.get_mut(&user_id) {
            items.retain(|i| i.id != item_id);
        }
        Ok(())
    }
}

/// Queue that only records what was enqueued
#[derive(Default)]
pub struct RecordingQueue {
    pub tasks: Mutex<Vec<Task>>,
}

impl RecordingQueue {
    pub fn recorded(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: Task) -> AppResult<TaskInfo> {
        self.tasks.lock().unwrap().push(task);
        Ok(TaskInfo {
            id: Uuid::new_v4(),
            queue: task.queue(),
        })
    }
}

#[derive(Default)]
pub struct BrokerState {
    pub pending: HashMap<Queue, VecDeque<TaskMessage>>,
    pub active: HashMap<Uuid, (TaskMessage, DateTime<Utc>)>,
    pub scheduled: Vec<(TaskMessage, DateTime<Utc>)>,
    pub archived: Vec<TaskMessage>,
    pub completed: Vec<TaskMessage>,
    pub slots: HashSet<String>,
}

/// Broker with the same lease, retry and archive semantics as the Redis one
#[derive(Default)]
pub struct MemoryBroker {
    pub state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.active.is_empty() && state.pending.values().all(VecDeque::is_empty)
    }

    pub fn completed_types(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.completed.iter().map(|m| m.task_type.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, message: &TaskMessage) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .pending
            .entry(message.queue)
            .or_default()
            .push_back(message.clone());
        Ok(())
    }

    async fn dequeue(&self, queue: Queue, lease: Duration) -> AppResult<Option<TaskMessage>> {
        let mut state = self.state.lock().unwrap();
        let Some(message) = state.pending.get_mut(&queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        let deadline = Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
        state.active.insert(message.id, (message.clone(), deadline));
        Ok(Some(message))
    }

    async fn ack(&self, message: &TaskMessage) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state.active.remove(&message.id);
        state.completed.push(message.clone());
        Ok(())
    }

    async fn retry(&self, message: &TaskMessage, run_at: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state.active.remove(&message.id);
        state.scheduled.push((message.clone(), run_at));
        Ok(())
    }

    async fn archive(&self, message: &TaskMessage) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state.active.remove(&message.id);
        state.archived.push(message.clone());
        Ok(())
    }

    async fn forward_due(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut state = self.state.lock().unwrap();
        let (due, later): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.scheduled).into_iter().partition(|(_, at)| *at <= now);
        state.scheduled = later;
        let moved = due.len();
        for (message, _) in due {
            state.pending.entry(message.queue).or_default().push_back(message);
        }
        Ok(moved)
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut state = self.state.lock().unwrap();
        let expired: Vec<Uuid> = state
            .active
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some((message, _)) = state.active.remove(id) {
                state.pending.entry(message.queue).or_default().push_front(message);
            }
        }
        Ok(expired.len())
    }

    async fn queue_stats(&self) -> AppResult<Vec<QueueStats>> {
        let state = self.state.lock().unwrap();
        Ok(Queue::ALL
            .iter()
            .map(|queue| QueueStats {
                queue: *queue,
                pending: state.pending.get(queue).map_or(0, VecDeque::len) as u64,
                active: state.active.values().filter(|(m, _)| m.queue == *queue).count() as u64,
                scheduled: state.scheduled.iter().filter(|(m, _)| m.queue == *queue).count() as u64,
                archived: state.archived.iter().filter(|m| m.queue == *queue).count() as u64,
            })
            .collect())
    }

    async fn claim_slot(&self, key: &str, _ttl: Duration) -> AppResult<bool> {
        Ok(self.state.lock().unwrap().slots.insert(key.to_string()))
    }
}

/// Embedder mapping text to a small deterministic vector
#[derive(Default)]
pub struct StubEmbedder {
    pub calls: Mutex<Vec<String>>,
    pub fail: Mutex<bool>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, _model: &str, text: &str) -> AppResult<Vec<f32>> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Embedding("service unavailable".to_string()));
        }
        self.calls.lock().unwrap().push(text.to_string());
        let letters = text.chars().filter(|c| c.is_alphabetic()).count() as f32;
        let spaces = text.chars().filter(|c| c.is_whitespace()).count() as f32;
        Ok(vec![letters, spaces, 1.0])
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Fetcher serving fixed documents by URL
#[derive(Default)]
pub struct StubFetcher {
    pub feeds: Mutex<HashMap<String, RemoteFeed>>,
}

impl StubFetcher {
    pub fn serve(&self, url: &str, feed: RemoteFeed) {
        self.feeds.lock().unwrap().insert(url.to_string(), feed);
    }
}

#[async_trait::async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> AppResult<RemoteFeed> {
        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::FeedParse(format!("nothing served at {}", url)))
    }
}

/// Every fake wired together
pub struct Pipeline {
    pub repository: Arc<MemoryRepository>,
    pub broker: Arc<MemoryBroker>,
    pub cache: Arc<MemoryCache>,
    pub embedder: Arc<StubEmbedder>,
    pub fetcher: Arc<StubFetcher>,
    pub client: Arc<TaskClient>,
}

impl Pipeline {
    pub fn new() -> Self {
        let broker = Arc::new(MemoryBroker::default());
        let client = Arc::new(TaskClient::new(broker.clone(), 3));
        Self {
            repository: Arc::new(MemoryRepository::default()),
            broker,
            cache: Arc::new(MemoryCache::default()),
            embedder: Arc::new(StubEmbedder::default()),
            fetcher: Arc::new(StubFetcher::default()),
            client,
        }
    }

    /// Handler that enqueues through `queue`
    pub fn handler_with_queue(&self, queue: Arc<dyn TaskQueue>, settings: PipelineSettings) -> TaskHandler {
        TaskHandler::new(
            self.repository.clone(),
            queue,
            self.cache.clone(),
            self.embedder.clone(),
            self.fetcher.clone(),
            settings,
        )
    }

    /// Handler that enqueues onto the in-memory broker
    pub fn handler(&self) -> TaskHandler {
        self.handler_with_queue(self.client.clone(), PipelineSettings::default())
    }

    /// Polls until the broker has nothing pending or running
    pub async fn wait_until_idle(&self) {
        for _ in 0..250 {
            if self.broker.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("broker did not become idle");
    }
}
