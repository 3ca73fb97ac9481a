use super::{TaskHandler, BATCH_SIZE};
use crate::error::AppResult;
use crate::tasks::Task;

impl TaskHandler {
    /// Enqueues one suggestion refresh per user
    #[tracing::instrument(skip(self))]
    pub(crate) async fn sync_users(&self) -> AppResult<()> {
        let total = self.repository.count_users().await?;
        let mut offset = 0;
        let mut enqueued = 0usize;

        while offset < total {
            let user_ids = self.repository.list_user_ids(BATCH_SIZE, offset).await?;
            if user_ids.is_empty() {
                break;
            }
            for user_id in user_ids.iter().copied() {
                self.queue.enqueue(Task::CacheUser { user_id }).await?;
                enqueued += 1;
            }
            offset += user_ids.len() as i64;
        }

        tracing::info!(users = enqueued, "Enqueued suggestion refreshes");
        Ok(())
    }
}
