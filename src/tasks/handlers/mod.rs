//! Task handlers, one stage of the content pipeline per task type
use std::sync::Arc;

use crate::config::PipelineSettings;
use crate::db::{Repository, SuggestionStore};
use crate::error::AppResult;
use crate::services::embedding::EmbeddingProvider;
use crate::services::feeds::FeedFetcher;
use crate::tasks::{Task, TaskQueue};

mod cache_user;
mod data_sync;
mod embed_item;
mod embed_user;
mod feed_sync;
mod user_sync;

/// Page size used whenever a stage walks a table
pub const BATCH_SIZE: i64 = 100;

/// Runs a decoded task to completion
#[async_trait::async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: Task) -> AppResult<()>;
}

/// Dispatches every pipeline task to its stage
#[derive(Clone)]
pub struct TaskHandler {
    repository: Arc<dyn Repository>,
    queue: Arc<dyn TaskQueue>,
    cache: Arc<dyn SuggestionStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    fetcher: Arc<dyn FeedFetcher>,
    settings: PipelineSettings,
}

impl TaskHandler {
    pub fn new(
        repository: Arc<dyn Repository>,
        queue: Arc<dyn TaskQueue>,
        cache: Arc<dyn SuggestionStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        fetcher: Arc<dyn FeedFetcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repository,
            queue,
            cache,
            embedder,
            fetcher,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }
}

#[async_trait::async_trait]
impl TaskProcessor for TaskHandler {
    async fn process(&self, task: Task) -> AppResult<()> {
        match task {
            Task::SyncData => self.sync_data().await,
            Task::SyncFeed { feed_id } => self.sync_feed(feed_id).await,
            Task::EmbedItem { item_id } => self.embed_item(item_id).await,
            Task::EmbedUser { user_id } => self.embed_user(user_id).await,
            Task::CacheUser { user_id } => self.cache_user(user_id).await,
            Task::SyncUser => self.sync_users().await,
        }
    }
}
