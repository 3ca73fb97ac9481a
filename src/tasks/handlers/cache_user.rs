use uuid::Uuid;

use super::TaskHandler;
use crate::error::AppResult;

impl TaskHandler {
    /// Overwrites a user's cached suggestions with a freshly ranked list
    #[tracing::instrument(skip(self))]
    pub(crate) async fn cache_user(&self, user_id: Uuid) -> AppResult<()> {
        let suggestions = self
            .repository
            .list_suggested_items_for_cache(user_id)
            .await?;
        self.cache
            .store_user_suggestions(user_id, &suggestions, self.settings.suggestion_ttl)
            .await?;

        tracing::info!(user_id = %user_id, count = suggestions.len(), "Cached user suggestions");
        Ok(())
    }
}
