use pgvector::Vector;
use uuid::Uuid;

use super::TaskHandler;
use crate::error::{AppError, AppResult};
use crate::services::{chunker::RecursiveCharacterSplitter, html};

impl TaskHandler {
    /// Embeds every chunk of an item's text.
    ///
    /// Chunks are upserted by index, then indices past the new chunk count
    /// are deleted so a shorter text leaves no stale vectors behind.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn embed_item(&self, item_id: Uuid) -> AppResult<()> {
        let item = self.repository.get_item(item_id).await?;
        let text = html::extract_text(item.embedding_text());

        if text.trim().is_empty() {
            let removed = self.repository.delete_item_embeddings_from(item_id, 0).await?;
            tracing::info!(item_id = %item_id, removed, "Item has no text to embed");
            return Ok(());
        }

        let splitter = RecursiveCharacterSplitter::with_defaults(
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        );
        let chunks = splitter.split(&text);

        for (index, chunk) in chunks.iter().enumerate() {
            let embedding = self
                .embedder
                .embed(&self.settings.embeddings_model, chunk)
                .await?;
            if embedding.is_empty() {
                return Err(AppError::Embedding(format!(
                    "{} returned an empty vector for chunk {} of item {}",
                    self.embedder.name(),
                    index,
                    item_id
                )));
            }
            self.repository
                .upsert_item_embedding(item_id, index as i32, Vector::from(embedding))
                .await?;
        }

        let pruned = self
            .repository
            .delete_item_embeddings_from(item_id, chunks.len() as i32)
            .await?;

        tracing::info!(item_id = %item_id, chunks = chunks.len(), pruned, "Embedded item");
        Ok(())
    }
}
