use std::sync::Arc;

use uuid::Uuid;

use crate::db::{Repository, SuggestionStore};
use crate::error::AppResult;
use crate::models::UserLike;
use crate::tasks::{Task, TaskQueue};

/// Like and unlike actions with their pipeline side effects
///
/// Both actions enqueue a reclustering of the user. A like also drops the
/// item from the user's cached suggestions right away. Side effects are best
/// effort: their failures are logged and the action still succeeds.
#[derive(Clone)]
pub struct UserActions {
    repository: Arc<dyn Repository>,
    queue: Arc<dyn TaskQueue>,
    cache: Arc<dyn SuggestionStore>,
}

impl UserActions {
    pub fn new(
        repository: Arc<dyn Repository>,
        queue: Arc<dyn TaskQueue>,
        cache: Arc<dyn SuggestionStore>,
    ) -> Self {
        Self {
            repository,
            queue,
            cache,
        }
    }

    /// Fails with `Conflict` when the user already likes the item
    #[tracing::instrument(skip(self))]
    pub async fn like_item(&self, user_id: Uuid, item_id: Uuid) -> AppResult<UserLike> {
        let like = self.repository.create_user_like(user_id, item_id).await?;

        self.enqueue_reclustering(user_id).await;

        if let Err(e) = self.cache.remove_user_suggestion(user_id, item_id).await {
            tracing::warn!(user_id = %user_id, item_id = %item_id, error = %e, "Failed to remove liked item from suggestion cache");
        }

        Ok(like)
    }

    /// Fails with `NotFound` when there is no such like
    #[tracing::instrument(skip(self))]
    pub async fn unlike_item(&self, user_id: Uuid, item_id: Uuid) -> AppResult<()> {
        self.repository.delete_user_like(user_id, item_id).await?;
        self.enqueue_reclustering(user_id).await;
        Ok(())
    }

    async fn enqueue_reclustering(&self, user_id: Uuid) {
        if let Err(e) = self.queue.enqueue(Task::EmbedUser { user_id }).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to enqueue user embedding");
        }
    }
}
