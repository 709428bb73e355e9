//! Core data structures shared across the crate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::normalize_whitespace;

/// A tracked topic, case-normalized
///
/// Terms are trimmed, lowercased and have inner whitespace collapsed, so
/// `"  Rust  Async "` and `"rust async"` are the same term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Term(String);

impl Term {
    /// Normalize and wrap a raw term name
    pub fn new(raw: &str) -> Self {
        Self(normalize_whitespace(raw).to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Words of the term, in order
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|w| !w.is_empty())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Term {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// One previously observed item: identifier and creation time in epoch seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub created_at: i64,
}

impl Sample {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }
}

/// A content item returned by the remote source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Item {
    /// Source-assigned identifier, globally unique
    pub id: String,

    /// Creation time in epoch seconds
    pub created_at: i64,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub subreddit: Option<String>,

    #[serde(default)]
    pub permalink: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub score: i64,

    #[serde(default)]
    pub num_comments: i64,

    #[serde(default)]
    pub over_18: bool,

    /// Payload exactly as the source returned it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Item {
    /// Minimal item with only identity and timestamp
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The (id, timestamp) view of this item
    pub fn sample(&self) -> Sample {
        Sample::new(self.id.clone(), self.created_at)
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_at, 0)
    }
}

/// Result of one scrape of a term
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutcome {
    /// New items seen before dedup-stop or exhaustion
    pub new_items: usize,

    /// Rows actually inserted (duplicates are ignored by the store)
    pub persisted: usize,

    /// Polls per day computed from fresh samples
    pub polls_per_day: u32,

    /// Interval until the next scrape
    pub interval: std::time::Duration,
}
