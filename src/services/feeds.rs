//! Remote feed retrieval and parsing (RSS 2.0, RSS 1.0/RDF and Atom)
use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use reqwest::Client as HttpClient;

use crate::{
    error::{AppError, AppResult},
    models::{Person, RemoteEntry, RemoteFeed},
};

const USER_AGENT: &str = concat!("gazette/", env!("CARGO_PKG_VERSION"));

/// Fetches and parses remote feed documents
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> AppResult<RemoteFeed>;
}

/// Feed fetcher over HTTP
#[derive(Clone)]
pub struct HttpFeedFetcher {
    http_client: HttpClient,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait::async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> AppResult<RemoteFeed> {
        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(url = %url, status = %status, "Feed request failed");
            return Err(AppError::FeedParse(format!(
                "fetching {} returned status {}",
                url, status
            )));
        }

        let body = response.text().await?;
        let feed = parse_feed(&body)?;
        tracing::debug!(url = %url, entries = feed.entries.len(), "Fetched feed");
        Ok(feed)
    }
}

/// Parses an RSS or Atom document
pub fn parse_feed(xml: &str) -> AppResult<RemoteFeed> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut parser = FeedParser::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                parser.check_root(&name)?;
                parser.open(&name, &e);
                parser.path.push(name);
                parser.text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                parser.check_root(&name)?;
                parser.open(&name, &e);
            }
            Ok(Event::Text(e)) => parser.text.push_str(&unescape_text(&e)),
            Ok(Event::CData(e)) => parser
                .text
                .push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::End(_)) => parser.close(),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::FeedParse(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !parser.saw_root {
        return Err(AppError::FeedParse("document has no root element".to_string()));
    }
    Ok(parser.feed)
}

#[derive(Default)]
struct FeedParser {
    feed: RemoteFeed,
    path: Vec<String>,
    entry: Option<RemoteEntry>,
    author: Option<Person>,
    text: String,
    saw_root: bool,
}

impl FeedParser {
    fn check_root(&mut self, name: &str) -> AppResult<()> {
        if self.saw_root {
            return Ok(());
        }
        match name {
            "rss" | "RDF" | "feed" => {
                self.saw_root = true;
                Ok(())
            }
            other => Err(AppError::FeedParse(format!(
                "unsupported root element <{}>",
                other
            ))),
        }
    }

    fn parent(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Handles an opening (or self-closing) element
    fn open(&mut self, name: &str, element: &BytesStart<'_>) {
        match name {
            "item" | "entry" => self.entry = Some(RemoteEntry::default()),
            "author" if self.entry.is_some() => self.author = Some(Person::default()),
            "link" => {
                if let Some(entry) = self.entry.as_mut() {
                    push_atom_link(entry, element);
                }
            }
            "category" => {
                if let (Some(entry), Some(term)) = (self.entry.as_mut(), attribute(element, "term")) {
                    entry.categories.push(term);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self) {
        let Some(name) = self.path.pop() else {
            return;
        };
        let value = std::mem::take(&mut self.text).trim().to_string();
        let parent = self.parent().map(str::to_string);

        if name == "item" || name == "entry" {
            if let Some(entry) = self.entry.take() {
                self.feed.entries.push(entry);
            }
            return;
        }

        if let Some(author) = self.author.as_mut() {
            match (name.as_str(), parent.as_deref()) {
                ("name", Some("author")) => {
                    author.name = non_empty(value);
                    return;
                }
                ("email", Some("author")) => {
                    author.email = non_empty(value);
                    return;
                }
                ("author", _) => {
                    let mut author = self.author.take().unwrap_or_default();
                    if author.name.is_none() && author.email.is_none() {
                        author = parse_rss_author(&value);
                    }
                    if let Some(entry) = self.entry.as_mut() {
                        if author.name.is_some() || author.email.is_some() {
                            entry.authors.push(author);
                        }
                    }
                    return;
                }
                _ => {}
            }
        }

        let Some(entry) = self.entry.as_mut() else {
            if name == "title" && matches!(parent.as_deref(), Some("channel" | "feed")) {
                self.feed.title = self.feed.title.take().or(non_empty(value));
            }
            return;
        };
        if !matches!(parent.as_deref(), Some("item" | "entry")) {
            return;
        }

        match name.as_str() {
            "title" => entry.title = non_empty(value),
            "description" | "summary" => entry.description = non_empty(value),
            "encoded" | "content" => {
                let current = entry.content.as_deref().map_or(0, |c| c.chars().count());
                if value.chars().count() > current {
                    entry.content = Some(value);
                }
            }
            "link" => {
                if !value.is_empty() {
                    if entry.link.is_none() {
                        entry.link = Some(value.clone());
                    }
                    entry.links.push(value);
                }
            }
            "guid" | "id" => entry.guid = non_empty(value),
            "pubDate" | "published" | "issued" => entry.published = parse_date(&value),
            "updated" | "modified" => entry.updated = parse_date(&value),
            "date" => {
                if entry.published.is_none() {
                    entry.published = parse_date(&value);
                }
            }
            "category" | "subject" => {
                if !value.is_empty() {
                    entry.categories.push(value);
                }
            }
            "creator" => {
                if !value.is_empty() {
                    entry.authors.push(Person {
                        name: Some(value),
                        email: None,
                    });
                }
            }
            _ => {}
        }
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(Cow::into_owned))
}

/// Atom links carry their target in `href`; RSS links are text and handled on close
fn push_atom_link(entry: &mut RemoteEntry, element: &BytesStart<'_>) {
    let Some(href) = attribute(element, "href") else {
        return;
    };
    let rel = attribute(element, "rel").unwrap_or_else(|| "alternate".to_string());
    if rel == "alternate" && entry.link.is_none() {
        entry.link = Some(href.clone());
    }
    entry.links.push(href);
}

/// Unknown entities (`&nbsp;` in RSS bodies) fall back to the raw text
fn unescape_text(text: &BytesText<'_>) -> String {
    match text.unescape() {
        Ok(value) => value.into_owned(),
        Err(_) => String::from_utf8_lossy(text).into_owned(),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// RSS `<author>` is conventionally `email (Name)`
fn parse_rss_author(value: &str) -> Person {
    let value = value.trim();
    if let Some((email, rest)) = value.split_once('(') {
        let name = rest.trim_end_matches(')').trim();
        return Person {
            name: non_empty(name.to_string()),
            email: non_empty(email.trim().to_string()),
        };
    }
    if value.contains('@') {
        Person {
            name: None,
            email: non_empty(value.to_string()),
        }
    } else {
        Person {
            name: non_empty(value.to_string()),
            email: None,
        }
    }
}

/// Parses RFC 2822 (RSS) and RFC 3339 (Atom) timestamps
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
