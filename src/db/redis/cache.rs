use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use crate::db::SuggestionStore;
use crate::error::AppResult;
use crate::models::{SuggestedItem, SuggestionScores};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    UserSuggestions(Uuid),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::UserSuggestions(user_id) => write!(f, "user:suggestions:{}", user_id),
        }
    }
}

/// Opens the shared Redis connection used by the cache and the broker.
///
/// The manager multiplexes every caller over one connection and reconnects
/// after a connection error, so clones are cheap.
pub async fn create_redis_connection(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let connection = ConnectionManager::new(client).await?;
    Ok(connection)
}

/// Suggestion cache backed by one Redis hash per user
///
/// Fields are item ids, values the JSON encoded [`SuggestionScores`].
/// Hashes carry no order, so reads sort by score.
#[derive(Clone)]
pub struct Cache {
    connection: ConnectionManager,
}

impl Cache {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Parses the raw fields of a user's hash, skipping malformed entries
    fn parse_suggestions(key: &str, raw: HashMap<String, String>) -> Vec<SuggestedItem> {
        let mut items: Vec<SuggestedItem> = raw
            .into_iter()
            .filter_map(|(field, value)| {
                let id = match Uuid::parse_str(&field) {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(key = %key, field = %field, error = %e, "Invalid item id in suggestion cache");
                        return None;
                    }
                };
                match serde_json::from_str::<SuggestionScores>(&value) {
                    Ok(scores) => Some(SuggestedItem::from_scores(id, scores)),
                    Err(e) => {
                        tracing::warn!(key = %key, field = %field, error = %e, "Could not parse cached scores");
                        None
                    }
                }
            })
            .collect();

        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        items
    }
}

#[async_trait::async_trait]
impl SuggestionStore for Cache {
    async fn store_user_suggestions(
        &self,
        user_id: Uuid,
        items: &[SuggestedItem],
        ttl: Duration,
    ) -> AppResult<()> {
        let key = CacheKey::UserSuggestions(user_id).to_string();

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        for item in items {
            let value = serde_json::to_string(&item.scores())?;
            pipe.hset(&key, item.id.to_string(), value).ignore();
        }
        if !items.is_empty() && !ttl.is_zero() {
            pipe.expire(&key, ttl.as_secs().max(1) as i64).ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!(
            user_id = %user_id,
            count = items.len(),
            ttl_secs = ttl.as_secs(),
            "Stored user suggestions"
        );
        Ok(())
    }

    async fn get_user_suggestions(&self, user_id: Uuid) -> AppResult<Vec<SuggestedItem>> {
        let key = CacheKey::UserSuggestions(user_id).to_string();
        let mut conn = self.connection.clone();
        let raw: HashMap<String, String> = conn.hgetall(&key).await?;
        Ok(Self::parse_suggestions(&key, raw))
    }

    async fn remove_user_suggestion(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let key = CacheKey::UserSuggestions(user_id).to_string();
        let mut conn = self.connection.clone();
        let _: () = conn.hdel(&key, item_id.to_string()).await?;
        Ok(())
    }
}
