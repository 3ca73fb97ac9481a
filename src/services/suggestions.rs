use std::sync::Arc;

use uuid::Uuid;

use crate::db::{Repository, SuggestionStore};
use crate::error::AppResult;
use crate::models::SuggestionPage;

/// Read path of a user's suggestions
///
/// Pages are cut from the cached ranking. When the cache cannot be read or
/// holds nothing, the ranking is recomputed from the relational store for
/// this request only; the cache is left untouched.
#[derive(Clone)]
pub struct SuggestionService {
    repository: Arc<dyn Repository>,
    cache: Arc<dyn SuggestionStore>,
}

impl SuggestionService {
    pub fn new(repository: Arc<dyn Repository>, cache: Arc<dyn SuggestionStore>) -> Self {
        Self { repository, cache }
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_suggested_items(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> AppResult<SuggestionPage> {
        match self.cache.get_user_suggestions(user_id).await {
            Ok(cached) if !cached.is_empty() => {
                tracing::debug!(user_id = %user_id, cached = cached.len(), "Serving suggestions from cache");
                let total = cached.len();
                let items = cached.into_iter().skip(offset).take(limit).collect();
                return Ok(SuggestionPage { total, items });
            }
            Ok(_) => {
                tracing::debug!(user_id = %user_id, "Suggestion cache miss");
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Suggestion cache unavailable, recomputing");
            }
        }

        let total = self.repository.count_suggested_items(user_id).await?.max(0) as usize;
        let items = if total == 0 || offset >= total {
            Vec::new()
        } else {
            self.repository
                .list_suggested_items(user_id, limit as i64, offset as i64)
                .await?
        };
        Ok(SuggestionPage { total, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::MockSuggestionStore;
    use crate::db::repository::MockRepository;
    use crate::error::AppError;
    use crate::models::SuggestedItem;
    use mockall::predicate::eq;

    fn suggestion(score: f64) -> SuggestedItem {
        SuggestedItem {
            id: Uuid::new_v4(),
            freshness: 1.0,
            similarity: score,
            score,
        }
    }

    #[tokio::test]
    async fn test_pages_from_cache() {
        let ranked = vec![suggestion(0.9), suggestion(0.5), suggestion(0.1)];
        let cached = ranked.clone();

        let mut cache = MockSuggestionStore::new();
        cache
            .expect_get_user_suggestions()
            .returning(move |_| Ok(cached.clone()));

        // The repository must not be consulted on a cache hit
        let service = SuggestionService::new(Arc::new(MockRepository::new()), Arc::new(cache));
        let page = service
            .list_suggested_items(Uuid::new_v4(), 1, 1)
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.items, vec![ranked[1].clone()]);
    }

    #[tokio::test]
    async fn test_falls_back_on_empty_cache() {
        let user_id = Uuid::new_v4();
        let fresh = suggestion(0.7);
        let listed = fresh.clone();

        let mut cache = MockSuggestionStore::new();
        cache.expect_get_user_suggestions().returning(|_| Ok(vec![]));
        cache.expect_store_user_suggestions().never();

        let mut repository = MockRepository::new();
        repository.expect_count_suggested_items().returning(|_| Ok(1));
        repository
            .expect_list_suggested_items()
            .with(eq(user_id), eq(10), eq(0))
            .times(1)
            .returning(move |_, _, _| Ok(vec![listed.clone()]));

        let service = SuggestionService::new(Arc::new(repository), Arc::new(cache));
        let page = service.list_suggested_items(user_id, 10, 0).await.unwrap();

        assert_eq!(page, SuggestionPage { total: 1, items: vec![fresh] });
    }

    #[tokio::test]
    async fn test_falls_back_on_cache_error() {
        let mut cache = MockSuggestionStore::new();
        cache.expect_get_user_suggestions().returning(|_| {
            Err(AppError::Cache(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        });

        let mut repository = MockRepository::new();
        repository.expect_count_suggested_items().returning(|_| Ok(0));

        let service = SuggestionService::new(Arc::new(repository), Arc::new(cache));
        let page = service
            .list_suggested_items(Uuid::new_v4(), 10, 0)
            .await
            .unwrap();

        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }
}
