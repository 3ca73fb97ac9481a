use std::time::Duration;

use uuid::Uuid;

use crate::{error::AppResult, models::SuggestedItem};

/// Per-user store of ranked suggestions
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Replaces the user's entry with `items` and expires it after `ttl`
    async fn store_user_suggestions(
        &self,
        user_id: Uuid,
        items: &[SuggestedItem],
        ttl: Duration,
    ) -> AppResult<()>;

    /// Every cached suggestion of the user, best score first
    async fn get_user_suggestions(&self, user_id: Uuid) -> AppResult<Vec<SuggestedItem>>;

    /// Drops one item from the user's entry, leaving the entry's expiry untouched
    async fn remove_user_suggestion(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()>;
}
