use super::{TaskHandler, BATCH_SIZE};
use crate::error::AppResult;
use crate::tasks::Task;

impl TaskHandler {
    /// Enqueues one feed sync per stored feed.
    ///
    /// A failing page read ends the run; feeds enqueued before it stay queued.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn sync_data(&self) -> AppResult<()> {
        let total = self.repository.count_feeds().await?;
        let mut offset = 0;
        let mut enqueued = 0usize;

        while offset < total {
            let feeds = self.repository.list_feeds(BATCH_SIZE, offset).await?;
            if feeds.is_empty() {
                break;
            }
            for feed in &feeds {
                self.queue.enqueue(Task::SyncFeed { feed_id: feed.id }).await?;
                enqueued += 1;
            }
            offset += feeds.len() as i64;
        }

        tracing::info!(feeds = enqueued, "Enqueued feed syncs");
        Ok(())
    }
}
