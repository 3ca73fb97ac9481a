use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A like placed by a user on an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct UserLike {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub liked_at: DateTime<Utc>,
}

/// One facet of a user's interest profile
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserEmbeddingCluster {
    pub user_id: Uuid,
    pub cluster_id: i32,
    pub centroid: Vector,
    pub member_count: i32,
}

/// Output of one k-means cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub vector: Vec<f32>,
    pub member_count: usize,
}
