use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::State;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub velocity: f64,
    pub website: Option<String>,
    pub state: State,
    pub failure_count: u32,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub crawled: Option<DateTime<Utc>>,
    pub visual_url: Option<String>,
    pub icon_url: Option<String>,
    pub cover_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
}

impl NewFeed {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Channel-level metadata read from a feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub website: Option<String>,
    pub icon_url: Option<String>,
    pub visual_url: Option<String>,
}
