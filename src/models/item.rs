use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::{Person, RemoteEntry};

/// One syndication entry persisted for a feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Item {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub links: Vec<String>,
    pub updated_parsed: Option<DateTime<Utc>>,
    pub published_parsed: Option<DateTime<Utc>>,
    pub authors: Json<Vec<Person>>,
    pub guid: Option<String>,
    pub image: Option<String>,
    pub categories: Vec<String>,
}

impl Item {
    /// Timestamp used as the feed sync cursor: `updated`, else `published`
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.updated_parsed.or(self.published_parsed)
    }

    /// The longest of description, content and title, by character count.
    ///
    /// Ties keep the earlier candidate in that order.
    pub fn embedding_text(&self) -> &str {
        let mut best = self.description.as_deref().unwrap_or_default();
        for candidate in [self.content.as_deref(), self.title.as_deref()] {
            let candidate = candidate.unwrap_or_default();
            if candidate.chars().count() > best.chars().count() {
                best = candidate;
            }
        }
        best
    }
}

/// Insert parameters for an item
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub feed_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub links: Vec<String>,
    pub updated_parsed: Option<DateTime<Utc>>,
    pub published_parsed: Option<DateTime<Utc>>,
    pub authors: Vec<Person>,
    pub guid: Option<String>,
    pub image: Option<String>,
    pub categories: Vec<String>,
}

impl NewItem {
    /// Builds an item from a remote entry.
    ///
    /// `content` always ends up holding the longer of description and content.
    pub fn from_entry(feed_id: Uuid, entry: &RemoteEntry, image: Option<String>) -> Self {
        let mut description = entry.description.clone();
        let mut content = entry.content.clone();
        let len = |s: &Option<String>| s.as_deref().map_or(0, |s| s.chars().count());
        if len(&description) > len(&content) {
            std::mem::swap(&mut description, &mut content);
        }

        Self {
            feed_id,
            title: entry.title.clone(),
            description,
            content,
            link: entry.link.clone(),
            links: entry.links.clone(),
            updated_parsed: entry.updated,
            published_parsed: entry.published,
            authors: entry.authors.clone(),
            guid: entry.identifier().map(str::to_string),
            image,
            categories: entry.categories.clone(),
        }
    }
}

/// One embedded chunk of an item's text
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ItemEmbeddingChunk {
    pub item_id: Uuid,
    pub chunk_index: i32,
    pub embedding: Vector,
}
