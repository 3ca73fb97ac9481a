use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Person;

/// A subscribed syndication source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Feed {
    pub id: Uuid,
    /// Remote URL of the feed document
    pub feed_link: String,
    pub title: Option<String>,
    pub image: Option<String>,
}

/// Parsed remote feed document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteFeed {
    pub title: Option<String>,
    pub entries: Vec<RemoteEntry>,
}

/// One entry of a remote feed document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteEntry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub links: Vec<String>,
    pub authors: Vec<Person>,
    pub categories: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Timestamp compared against the sync cutoff: `updated`, else `published`
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.published)
    }

    /// Stable external identifier: the guid, else the link
    pub fn identifier(&self) -> Option<&str> {
        self.guid
            .as_deref()
            .filter(|g| !g.is_empty())
            .or_else(|| self.link.as_deref().filter(|l| !l.is_empty()))
    }

    /// Whether this entry is strictly newer than `cutoff`.
    ///
    /// Without a cutoff every entry is new. With a cutoff, entries that carry
    /// no timestamp at all are excluded.
    pub fn is_newer_than(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        match (cutoff, self.timestamp()) {
            (None, _) => true,
            (Some(cutoff), Some(ts)) => ts > cutoff,
            (Some(_), None) => false,
        }
    }
}
