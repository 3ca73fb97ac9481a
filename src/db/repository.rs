use pgvector::Vector;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Centroid, Feed, Item, ItemEmbeddingChunk, NewItem, SuggestedItem, UserLike},
};

/// Relational store consumed by the pipeline stages
///
/// Feeds, items, likes and users are owned by the surrounding application;
/// the pipeline reads them, appends items and maintains the derived
/// embedding and cluster tables.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn count_feeds(&self) -> AppResult<i64>;

    async fn list_feeds(&self, limit: i64, offset: i64) -> AppResult<Vec<Feed>>;

    async fn get_feed(&self, feed_id: Uuid) -> AppResult<Feed>;

    /// Most recent stored item of a feed by `updated`, else `published`
    async fn get_last_item(&self, feed_id: Uuid) -> AppResult<Option<Item>>;

    /// Inserts an item; `None` when the feed already holds an item with the same guid
    async fn create_item(&self, item: NewItem) -> AppResult<Option<Item>>;

    async fn get_item(&self, item_id: Uuid) -> AppResult<Item>;

    async fn upsert_item_embedding(
        &self,
        item_id: Uuid,
        chunk_index: i32,
        embedding: Vector,
    ) -> AppResult<()>;

    /// Deletes every chunk of the item whose index is `>= from_index`
    async fn delete_item_embeddings_from(&self, item_id: Uuid, from_index: i32) -> AppResult<u64>;

    async fn get_item_embeddings(&self, item_id: Uuid) -> AppResult<Vec<ItemEmbeddingChunk>>;

    async fn count_liked_items(&self, user_id: Uuid) -> AppResult<i64>;

    async fn list_liked_item_ids(&self, user_id: Uuid, limit: i64, offset: i64)
        -> AppResult<Vec<Uuid>>;

    /// Atomically replaces a user's whole cluster set; cluster ids follow slice order
    async fn replace_user_clusters(&self, user_id: Uuid, centroids: &[Centroid]) -> AppResult<()>;

    async fn count_users(&self) -> AppResult<i64>;

    async fn list_user_ids(&self, limit: i64, offset: i64) -> AppResult<Vec<Uuid>>;

    /// Full ranked candidate set used to refresh a user's cache entry
    async fn list_suggested_items_for_cache(&self, user_id: Uuid) -> AppResult<Vec<SuggestedItem>>;

    async fn count_suggested_items(&self, user_id: Uuid) -> AppResult<i64>;

    /// One page of the ranked candidate set, best score first
    async fn list_suggested_items(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<SuggestedItem>>;

    /// Fails with `Conflict` when the like already exists
    async fn create_user_like(&self, user_id: Uuid, item_id: Uuid) -> AppResult<UserLike>;

    /// Fails with `NotFound` when there is no such like
    async fn delete_user_like(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()>;
}
