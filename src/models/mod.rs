use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod feed;
pub mod item;
pub mod user;

pub use feed::{Feed, RemoteEntry, RemoteFeed};
pub use item::{Item, ItemEmbeddingChunk, NewItem};
pub use user::{Centroid, UserEmbeddingCluster, UserLike};

/// Author or contributor of a feed entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Score components of one cached suggestion, as stored in a cache field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SuggestionScores {
    pub freshness: f64,
    pub similarity: f64,
    pub score: f64,
}

/// A ranked candidate item for a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct SuggestedItem {
    pub id: Uuid,
    pub freshness: f64,
    pub similarity: f64,
    pub score: f64,
}

impl SuggestedItem {
    pub fn scores(&self) -> SuggestionScores {
        SuggestionScores {
            freshness: self.freshness,
            similarity: self.similarity,
            score: self.score,
        }
    }

    pub fn from_scores(id: Uuid, scores: SuggestionScores) -> Self {
        Self {
            id,
            freshness: scores.freshness,
            similarity: scores.similarity,
            score: scores.score,
        }
    }
}

/// A page of suggestions with the size of the full ranked set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestionPage {
    pub total: usize,
    pub items: Vec<SuggestedItem>,
}
