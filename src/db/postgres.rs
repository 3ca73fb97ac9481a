use pgvector::Vector;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use uuid::Uuid;

use crate::{
    db::Repository,
    error::{AppError, AppResult},
    models::{Centroid, Feed, Item, ItemEmbeddingChunk, NewItem, SuggestedItem, UserLike},
};

/// Freshness decays as exp(-age / FRESHNESS_DECAY_SECS)
const FRESHNESS_DECAY_SECS: f64 = 7.0 * 24.0 * 3600.0;

const ITEM_COLUMNS: &str = "id, feed_id, title, description, content, link, links, \
     updated_parsed, published_parsed, authors, guid, image, categories";

/// Candidate items scored against the user's clusters, excluding liked items.
/// `$1` is the user id, `$2` the freshness decay in seconds.
const SUGGESTION_CANDIDATES: &str = r#"
    WITH similarities AS (
        SELECT e.item_id, MAX(1 - (e.embedding <=> c.centroid)) AS similarity
        FROM item_embeddings e
        CROSS JOIN user_embedding_clusters c
        WHERE c.user_id = $1
        GROUP BY e.item_id
    ),
    scored AS (
        SELECT i.id,
               EXP(-EXTRACT(EPOCH FROM (NOW() - COALESCE(i.updated_parsed, i.published_parsed, i.created_at)))::float8 / $2::float8) AS freshness,
               s.similarity::float8 AS similarity
        FROM items i
        JOIN similarities s ON s.item_id = i.id
        WHERE NOT EXISTS (
            SELECT 1 FROM user_likes l WHERE l.user_id = $1 AND l.item_id = i.id
        )
    )
"#;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// PostgreSQL + pgvector implementation of [`Repository`]
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Repository for PgRepository {
    async fn count_feeds(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feeds")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_feeds(&self, limit: i64, offset: i64) -> AppResult<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT id, feed_link, title, image FROM feeds ORDER BY created_at, id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    async fn get_feed(&self, feed_id: Uuid) -> AppResult<Feed> {
        sqlx::query_as::<_, Feed>("SELECT id, feed_link, title, image FROM feeds WHERE id = $1")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {}", feed_id)))
    }

    async fn get_last_item(&self, feed_id: Uuid) -> AppResult<Option<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = $1 \
             ORDER BY COALESCE(updated_parsed, published_parsed) DESC NULLS LAST LIMIT 1"
        );
        let item = sqlx::query_as::<_, Item>(&query)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn create_item(&self, item: NewItem) -> AppResult<Option<Item>> {
        let query = format!(
            "INSERT INTO items (feed_id, title, description, content, link, links, \
             updated_parsed, published_parsed, authors, guid, image, categories) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (feed_id, guid) DO NOTHING \
             RETURNING {ITEM_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Item>(&query)
            .bind(item.feed_id)
            .bind(item.title)
            .bind(item.description)
            .bind(item.content)
            .bind(item.link)
            .bind(item.links)
            .bind(item.updated_parsed)
            .bind(item.published_parsed)
            .bind(Json(item.authors))
            .bind(item.guid)
            .bind(item.image)
            .bind(item.categories)
            .fetch_optional(&self.pool)
            .await?;
        Ok(created)
    }

    async fn get_item(&self, item_id: Uuid) -> AppResult<Item> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1");
        sqlx::query_as::<_, Item>(&query)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("item {}", item_id)))
    }

    async fn upsert_item_embedding(
        &self,
        item_id: Uuid,
        chunk_index: i32,
        embedding: Vector,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO item_embeddings (item_id, chunk_index, embedding) VALUES ($1, $2, $3) \
             ON CONFLICT (item_id, chunk_index) DO UPDATE SET embedding = EXCLUDED.embedding",
        )
        .bind(item_id)
        .bind(chunk_index)
        .bind(embedding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_item_embeddings_from(&self, item_id: Uuid, from_index: i32) -> AppResult<u64> {
        let result =
            sqlx::query("DELETE FROM item_embeddings WHERE item_id = $1 AND chunk_index >= $2")
                .bind(item_id)
                .bind(from_index)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn get_item_embeddings(&self, item_id: Uuid) -> AppResult<Vec<ItemEmbeddingChunk>> {
        let chunks = sqlx::query_as::<_, ItemEmbeddingChunk>(
            "SELECT item_id, chunk_index, embedding FROM item_embeddings \
             WHERE item_id = $1 ORDER BY chunk_index",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    async fn count_liked_items(&self, user_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_likes WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_liked_item_ids(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT item_id FROM user_likes WHERE user_id = $1 \
             ORDER BY liked_at DESC, item_id LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn replace_user_clusters(&self, user_id: Uuid, centroids: &[Centroid]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_embedding_clusters WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for (cluster_id, centroid) in centroids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO user_embedding_clusters (user_id, cluster_id, centroid, member_count) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(user_id)
            .bind(cluster_id as i32)
            .bind(Vector::from(centroid.vector.clone()))
            .bind(centroid.member_count as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count_users(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_user_ids(&self, limit: i64, offset: i64) -> AppResult<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM users ORDER BY created_at, id LIMIT $1 OFFSET $2")
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn list_suggested_items_for_cache(&self, user_id: Uuid) -> AppResult<Vec<SuggestedItem>> {
        let query = format!(
            "{SUGGESTION_CANDIDATES} \
             SELECT id, freshness, similarity, (freshness * similarity) AS score \
             FROM scored ORDER BY score DESC, id"
        );
        let items = sqlx::query_as::<_, SuggestedItem>(&query)
            .bind(user_id)
            .bind(FRESHNESS_DECAY_SECS)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn count_suggested_items(&self, user_id: Uuid) -> AppResult<i64> {
        let query = format!("{SUGGESTION_CANDIDATES} SELECT COUNT(*) FROM scored");
        let count: i64 = sqlx::query_scalar(&query)
            .bind(user_id)
            .bind(FRESHNESS_DECAY_SECS)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_suggested_items(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<SuggestedItem>> {
        let query = format!(
            "{SUGGESTION_CANDIDATES} \
             SELECT id, freshness, similarity, (freshness * similarity) AS score \
             FROM scored ORDER BY score DESC, id LIMIT $3 OFFSET $4"
        );
        let items = sqlx::query_as::<_, SuggestedItem>(&query)
            .bind(user_id)
            .bind(FRESHNESS_DECAY_SECS)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn create_user_like(&self, user_id: Uuid, item_id: Uuid) -> AppResult<UserLike> {
        let like = sqlx::query_as::<_, UserLike>(
            "INSERT INTO user_likes (user_id, item_id, liked_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (user_id, item_id) DO NOTHING \
             RETURNING user_id, item_id, liked_at",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        like.ok_or_else(|| AppError::Conflict(format!("already liked item {}", item_id)))
    }

    async fn delete_user_like(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM user_likes WHERE user_id = $1 AND item_id = $2")
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("like for item {}", item_id)));
        }
        Ok(())
    }
}
