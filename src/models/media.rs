use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Provider, State};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub provider: Provider,
    pub identifier: String,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub artwork_url: Option<String>,
    pub audio_url: Option<String>,
    pub duration: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TrackRecord {
    /// A track known only by its identity, e.g. an embed found in an entry.
    pub fn reference(provider: Provider, identifier: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider,
            identifier: identifier.into(),
            owner_id: None,
            owner_name: None,
            url: url.into(),
            title: String::new(),
            description: None,
            thumbnail_url: None,
            artwork_url: None,
            audio_url: None,
            duration: None,
            published_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub provider: Provider,
    pub identifier: String,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub artwork_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl AlbumRecord {
    pub fn reference(provider: Provider, identifier: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider,
            identifier: identifier.into(),
            owner_id: None,
            owner_name: None,
            url: url.into(),
            title: String::new(),
            description: None,
            thumbnail_url: None,
            artwork_url: None,
            published_at: None,
        }
    }
}

/// Playlists share the album shape; the crawl state lives on [`Playlist`].
pub type PlaylistRecord = AlbumRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub provider: Provider,
    pub identifier: String,
    pub url: String,
    pub name: String,
    pub thumbnail_url: Option<String>,
    pub artwork_url: Option<String>,
}

/// A stored playlist together with its crawl bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub provider: Provider,
    pub identifier: String,
    pub url: String,
    pub title: String,
    pub velocity: f64,
    pub state: State,
    pub failure_count: u32,
    pub last_updated: Option<DateTime<Utc>>,
    pub crawled: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlbumCandidate {
    pub album: AlbumRecord,
    pub artists: Vec<ArtistRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackCandidate {
    pub track: TrackRecord,
    pub artists: Vec<ArtistRecord>,
    pub album: Option<AlbumCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Track,
    Album,
    Playlist,
}

/// A provider link found inside entry content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaReference {
    pub provider: Provider,
    pub kind: MediaKind,
    pub identifier: String,
    pub url: String,
}
