use uuid::Uuid;

use super::{TaskHandler, BATCH_SIZE};
use crate::error::{AppError, AppResult};
use crate::services::clustering;
use crate::tasks::Task;

impl TaskHandler {
    /// Rebuilds a user's interest clusters from the embeddings of their likes
    /// and enqueues a refresh of their suggestions.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn embed_user(&self, user_id: Uuid) -> AppResult<()> {
        let liked = self.repository.count_liked_items(user_id).await?;
        if liked == 0 {
            tracing::debug!(user_id = %user_id, "User has no likes");
            return Ok(());
        }

        let mut points: Vec<Vec<f32>> = Vec::new();
        let mut offset = 0;
        while offset < liked {
            let item_ids = self
                .repository
                .list_liked_item_ids(user_id, BATCH_SIZE, offset)
                .await?;
            if item_ids.is_empty() {
                break;
            }
            for item_id in &item_ids {
                let chunks = self.repository.get_item_embeddings(*item_id).await?;
                points.extend(chunks.into_iter().map(|c| c.embedding.to_vec()));
            }
            offset += item_ids.len() as i64;
        }

        if points.is_empty() {
            return Err(AppError::Clustering(format!(
                "no embeddings found for the {} items liked by user {}",
                liked, user_id
            )));
        }

        let k = self.settings.cluster_count.min(points.len());
        let centroids = clustering::kmeans(&points, k, self.settings.cluster_max_iter)?;
        self.repository
            .replace_user_clusters(user_id, &centroids)
            .await?;

        self.queue.enqueue(Task::CacheUser { user_id }).await?;

        tracing::info!(
            user_id = %user_id,
            points = points.len(),
            clusters = centroids.len(),
            "Clustered user embeddings"
        );
        Ok(())
    }
}
