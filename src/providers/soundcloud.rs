use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use super::{decode, decode_items, missing_document, reference, compile_pattern, ParsedPlaylist, ProviderAdapter};
use crate::error::{FetchError, ParseError};
use crate::feed::fetcher::{FetchRequest, FetchedDocument};
use crate::models::{
    ArtistRecord, MediaKind, MediaReference, Playlist, PlaylistRecord, Provider, TrackCandidate,
    TrackRecord,
};

const API_BASE: &str = "https://api.soundcloud.com";

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
    username: String,
    permalink_url: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    id: u64,
    title: String,
    description: Option<String>,
    artwork_url: Option<String>,
    created_at: Option<String>,
    user: Option<User>,
    #[serde(default)]
    tracks: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: u64,
    title: String,
    description: Option<String>,
    artwork_url: Option<String>,
    duration: Option<i64>,
    stream_url: Option<String>,
    created_at: Option<String>,
    user: Option<User>,
}

/// SoundCloud timestamps look like `2015/02/03 04:05:06 +0000`.
fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    DateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S %z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn large_artwork(url: &str) -> String {
    url.replace("-large.", "-t500x500.")
}

pub struct SoundCloud {
    client_id: Option<String>,
    api_base: String,
}

impl SoundCloud {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            client_id,
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| compile_pattern(r"api\.soundcloud\.com/(tracks|playlists)/([a-zA-Z0-9_-]+)"))
    }

    fn artist(&self, user: &User) -> ArtistRecord {
        let identifier = user.id.to_string();
        ArtistRecord {
            provider: Provider::SoundCloud,
            url: user
                .permalink_url
                .clone()
                .unwrap_or_else(|| self.artist_url(&identifier)),
            identifier,
            name: user.username.clone(),
            thumbnail_url: user.avatar_url.clone(),
            artwork_url: user.avatar_url.as_deref().map(large_artwork),
        }
    }

    fn candidate(&self, track: Track) -> TrackCandidate {
        let identifier = track.id.to_string();
        TrackCandidate {
            track: TrackRecord {
                provider: Provider::SoundCloud,
                url: self.track_url(&identifier),
                identifier,
                owner_id: track.user.as_ref().map(|u| u.id.to_string()),
                owner_name: track.user.as_ref().map(|u| u.username.clone()),
                title: track.title,
                description: track.description.filter(|d| !d.is_empty()),
                thumbnail_url: track.artwork_url.clone(),
                artwork_url: track.artwork_url.as_deref().map(large_artwork),
                audio_url: track.stream_url,
                duration: track.duration.map(|ms| ms / 1000),
                published_at: parse_time(track.created_at.as_deref()),
            },
            artists: track.user.iter().map(|u| self.artist(u)).collect(),
            album: None,
        }
    }
}

#[async_trait]
impl ProviderAdapter for SoundCloud {
    fn provider(&self) -> Provider {
        Provider::SoundCloud
    }

    fn track_url(&self, identifier: &str) -> String {
        format!("https://soundcloud.com/tracks/{identifier}")
    }

    fn album_url(&self, identifier: &str) -> String {
        self.playlist_url(identifier)
    }

    fn playlist_url(&self, identifier: &str) -> String {
        format!("https://soundcloud.com/playlists/{identifier}")
    }

    fn artist_url(&self, identifier: &str) -> String {
        format!("https://soundcloud.com/users/{identifier}")
    }

    fn extract_references(&self, text: &str) -> Vec<MediaReference> {
        Self::pattern()
            .captures_iter(text)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .map(|(kind, id)| match kind {
                "tracks" => reference(Provider::SoundCloud, MediaKind::Track, id, self.track_url(id)),
                _ => reference(Provider::SoundCloud, MediaKind::Playlist, id, self.playlist_url(id)),
            })
            .collect()
    }

    fn playlist_requests(
        &self,
        playlist: &Playlist,
        _token: Option<&str>,
    ) -> Result<Vec<FetchRequest>, FetchError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(FetchError::MissingCredentials(Provider::SoundCloud))?;

        Ok(vec![FetchRequest::get(format!(
            "{}/playlists/{}?client_id={}",
            self.api_base,
            urlencoding::encode(&playlist.identifier),
            urlencoding::encode(client_id)
        ))])
    }

    fn parse_playlist(
        &self,
        _playlist: &Playlist,
        documents: &[FetchedDocument],
    ) -> Result<ParsedPlaylist, ParseError> {
        let response: PlaylistResponse =
            decode(documents.first().ok_or_else(|| missing_document(0))?)?;

        let identifier = response.id.to_string();
        let record = PlaylistRecord {
            provider: Provider::SoundCloud,
            url: self.playlist_url(&identifier),
            identifier,
            owner_id: response.user.as_ref().map(|u| u.id.to_string()),
            owner_name: response.user.as_ref().map(|u| u.username.clone()),
            title: response.title,
            description: response.description.filter(|d| !d.is_empty()),
            thumbnail_url: response.artwork_url.clone(),
            artwork_url: response.artwork_url.as_deref().map(large_artwork),
            published_at: parse_time(response.created_at.as_deref()),
        };

        let (tracks, errors) =
            decode_items(response.tracks, |track: Track| Ok(self.candidate(track)));

        Ok(ParsedPlaylist {
            playlist: record,
            tracks,
            errors,
        })
    }

    fn track_request(
        &self,
        track: &MediaReference,
        _token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(FetchError::MissingCredentials(Provider::SoundCloud))?;
        Ok(Some(FetchRequest::get(format!(
            "{}/tracks/{}?client_id={}",
            self.api_base,
            urlencoding::encode(&track.identifier),
            urlencoding::encode(client_id)
        ))))
    }

    fn parse_track(
        &self,
        _track: &MediaReference,
        document: &FetchedDocument,
    ) -> Result<Option<TrackCandidate>, ParseError> {
        let track: Track = decode(document)?;
        Ok(Some(self.candidate(track)))
    }
}
