use uuid::Uuid;

use super::TaskHandler;
use crate::error::AppResult;
use crate::models::NewItem;
use crate::tasks::Task;

impl TaskHandler {
    /// Stores the entries of a feed newer than its latest stored item and
    /// enqueues an embedding task for each created item.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn sync_feed(&self, feed_id: Uuid) -> AppResult<()> {
        let feed = self.repository.get_feed(feed_id).await?;
        let remote = self.fetcher.fetch(&feed.feed_link).await?;

        let cutoff = self
            .repository
            .get_last_item(feed_id)
            .await?
            .and_then(|item| item.cursor());

        let mut created = 0usize;
        for entry in remote.entries.iter().filter(|e| e.is_newer_than(cutoff)) {
            let new_item = NewItem::from_entry(feed_id, entry, feed.image.clone());
            let Some(item) = self.repository.create_item(new_item).await? else {
                tracing::debug!(feed_id = %feed_id, guid = ?entry.identifier(), "Item already stored");
                continue;
            };

            self.queue.enqueue(Task::EmbedItem { item_id: item.id }).await?;
            tracing::debug!(item_id = %item.id, feed_id = %feed_id, "Synced item");
            created += 1;
        }

        tracing::info!(
            feed_id = %feed_id,
            entries = remote.entries.len(),
            created,
            cutoff = ?cutoff,
            "Synced feed"
        );
        Ok(())
    }
}
