use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{decode, decode_items, missing_document, reference, compile_pattern, ParsedPlaylist, ProviderAdapter};
use crate::error::{FetchError, ParseError};
use crate::feed::fetcher::{FeedFetcher, FetchRequest, FetchedDocument};
use crate::models::{
    AlbumCandidate, AlbumRecord, ArtistRecord, MediaKind, MediaReference, Playlist, PlaylistRecord,
    Provider, TrackCandidate, TrackRecord,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

// Refresh a little before the server-side expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    id: Option<String>,
    name: String,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    artists: Vec<Artist>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: Option<String>,
    name: String,
    duration_ms: Option<i64>,
    preview_url: Option<String>,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTrack {
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct Page {
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    id: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    images: Vec<Image>,
    owner: Option<Owner>,
    tracks: Page,
}

// Spotify lists images widest first.
fn thumbnail_url(images: &[Image]) -> Option<String> {
    images.last().map(|i| i.url.clone())
}

fn artwork_url(images: &[Image]) -> Option<String> {
    images.first().map(|i| i.url.clone())
}

fn release_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw?, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

pub struct Spotify {
    client_id: Option<String>,
    client_secret: Option<String>,
    api_base: String,
    accounts_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl Spotify {
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id,
            client_secret,
            api_base: API_BASE.to_string(),
            accounts_base: ACCOUNTS_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>, accounts_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.accounts_base = accounts_base.into();
        self
    }

    fn pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            compile_pattern(r"(?:open\.spotify\.com/(?:embed/)?(track|album|playlist)/|spotify:(track|album|playlist):)([a-zA-Z0-9]{22})")
        })
    }

    fn artist(&self, artist: &Artist) -> Option<ArtistRecord> {
        let id = artist.id.as_ref()?;
        Some(ArtistRecord {
            provider: Provider::Spotify,
            identifier: id.clone(),
            url: self.artist_url(id),
            name: artist.name.clone(),
            thumbnail_url: None,
            artwork_url: None,
        })
    }

    fn album(&self, album: &Album) -> Option<AlbumCandidate> {
        let id = album.id.as_ref()?;
        Some(AlbumCandidate {
            album: AlbumRecord {
                provider: Provider::Spotify,
                identifier: id.clone(),
                owner_id: album.artists.first().and_then(|a| a.id.clone()),
                owner_name: album.artists.first().map(|a| a.name.clone()),
                url: self.album_url(id),
                title: album.name.clone(),
                description: None,
                thumbnail_url: thumbnail_url(&album.images),
                artwork_url: artwork_url(&album.images),
                published_at: release_date(album.release_date.as_deref()),
            },
            artists: album.artists.iter().filter_map(|a| self.artist(a)).collect(),
        })
    }

    fn candidate(&self, track: Track) -> Result<TrackCandidate, String> {
        let id = track
            .id
            .clone()
            .ok_or_else(|| format!("local track {} has no id", track.name))?;

        let album = track.album.as_ref().and_then(|a| self.album(a));
        Ok(TrackCandidate {
            track: TrackRecord {
                provider: Provider::Spotify,
                url: self.track_url(&id),
                identifier: id,
                owner_id: track.artists.first().and_then(|a| a.id.clone()),
                owner_name: track.artists.first().map(|a| a.name.clone()),
                title: track.name.clone(),
                description: None,
                thumbnail_url: track.album.as_ref().and_then(|a| thumbnail_url(&a.images)),
                artwork_url: track.album.as_ref().and_then(|a| artwork_url(&a.images)),
                audio_url: track.preview_url.clone(),
                duration: track.duration_ms.map(|ms| ms / 1000),
                published_at: album.as_ref().and_then(|a| a.album.published_at),
            },
            artists: track.artists.iter().filter_map(|a| self.artist(a)).collect(),
            album,
        })
    }

    async fn request_token(&self, fetcher: &FeedFetcher) -> Result<CachedToken, FetchError> {
        let (id, secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(FetchError::MissingCredentials(Provider::Spotify)),
        };
        let url = format!("{}/api/token", self.accounts_base);

        let response = fetcher
            .client()
            .post(&url)
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl ProviderAdapter for Spotify {
    fn provider(&self) -> Provider {
        Provider::Spotify
    }

    fn track_url(&self, identifier: &str) -> String {
        format!("https://open.spotify.com/track/{identifier}")
    }

    fn album_url(&self, identifier: &str) -> String {
        format!("https://open.spotify.com/album/{identifier}")
    }

    fn playlist_url(&self, identifier: &str) -> String {
        format!("https://open.spotify.com/playlist/{identifier}")
    }

    fn artist_url(&self, identifier: &str) -> String {
        format!("https://open.spotify.com/artist/{identifier}")
    }

    fn extract_references(&self, text: &str) -> Vec<MediaReference> {
        Self::pattern()
            .captures_iter(text)
            .filter_map(|c| {
                let kind = c.get(1).or_else(|| c.get(2))?.as_str();
                let id = c.get(3)?.as_str();
                Some(match kind {
                    "track" => reference(Provider::Spotify, MediaKind::Track, id, self.track_url(id)),
                    "album" => reference(Provider::Spotify, MediaKind::Album, id, self.album_url(id)),
                    _ => reference(Provider::Spotify, MediaKind::Playlist, id, self.playlist_url(id)),
                })
            })
            .collect()
    }

    /// Client-credentials token, cached until shortly before it expires.
    async fn authorize(&self, fetcher: &FeedFetcher) -> Result<Option<String>, FetchError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(Some(token.access_token.clone()));
            }
        }

        let token = self.request_token(fetcher).await?;
        tracing::debug!("Obtained Spotify access token");
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(Some(access_token))
    }

    fn playlist_requests(
        &self,
        playlist: &Playlist,
        token: Option<&str>,
    ) -> Result<Vec<FetchRequest>, FetchError> {
        let token = token.ok_or(FetchError::MissingCredentials(Provider::Spotify))?;
        let request = FetchRequest::get(format!(
            "{}/playlists/{}",
            self.api_base,
            urlencoding::encode(&playlist.identifier)
        ))
        .bearer(token)?;
        Ok(vec![request])
    }

    /// Track listings page through `next`, nested under `tracks` on the first page.
    fn next_page(
        &self,
        request: &FetchRequest,
        document: &FetchedDocument,
    ) -> Result<Option<FetchRequest>, ParseError> {
        let value: serde_json::Value = decode(document)?;
        let next = value
            .pointer("/tracks/next")
            .or_else(|| value.get("next"))
            .and_then(|n| n.as_str());
        Ok(next.map(|url| request.follow(url)))
    }

    fn parse_playlist(
        &self,
        _playlist: &Playlist,
        documents: &[FetchedDocument],
    ) -> Result<ParsedPlaylist, ParseError> {
        let response: PlaylistResponse =
            decode(documents.first().ok_or_else(|| missing_document(0))?)?;

        let record = PlaylistRecord {
            provider: Provider::Spotify,
            url: self.playlist_url(&response.id),
            identifier: response.id,
            owner_id: response.owner.as_ref().map(|o| o.id.clone()),
            owner_name: response.owner.as_ref().and_then(|o| o.display_name.clone()),
            title: response.name,
            description: response.description.filter(|d| !d.is_empty()),
            thumbnail_url: thumbnail_url(&response.images),
            artwork_url: artwork_url(&response.images),
            published_at: None,
        };

        let mut items = response.tracks.items;
        for document in &documents[1..] {
            let page: Page = decode(document)?;
            items.extend(page.items);
        }

        let (tracks, errors) = decode_items(items, |item: PlaylistTrack| {
            let track = item
                .track
                .ok_or_else(|| "track is no longer available".to_string())?;
            self.candidate(track)
        });

        Ok(ParsedPlaylist {
            playlist: record,
            tracks,
            errors,
        })
    }

    fn track_request(
        &self,
        track: &MediaReference,
        token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        let token = token.ok_or(FetchError::MissingCredentials(Provider::Spotify))?;
        let url = format!("{}/tracks/{}", self.api_base, urlencoding::encode(&track.identifier));
        Ok(Some(FetchRequest::get(url).bearer(token)?))
    }

    fn parse_track(
        &self,
        _track: &MediaReference,
        document: &FetchedDocument,
    ) -> Result<Option<TrackCandidate>, ParseError> {
        let track: Track = decode(document)?;
        self.candidate(track).map(Some).map_err(ParseError::Document)
    }

    fn album_request(
        &self,
        album: &MediaReference,
        token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        let token = token.ok_or(FetchError::MissingCredentials(Provider::Spotify))?;
        let url = format!("{}/albums/{}", self.api_base, urlencoding::encode(&album.identifier));
        Ok(Some(FetchRequest::get(url).bearer(token)?))
    }

    fn parse_album(
        &self,
        _album: &MediaReference,
        document: &FetchedDocument,
    ) -> Result<Option<AlbumCandidate>, ParseError> {
        let album: Album = decode(document)?;
        Ok(self.album(&album))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_share_urls_and_uris() {
        let spotify = Spotify::new(None, None);
        let refs = spotify.extract_references(
            "https://open.spotify.com/embed/album/1DFixLWuPkv3KT3TnV35m3 \
             spotify:playlist:37i9dQZF1DXcBWIGoYBM5M",
        );
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, MediaKind::Album);
        assert_eq!(refs[0].url, "https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3");
        assert_eq!(refs[1].kind, MediaKind::Playlist);
    }

    #[test]
    fn test_requests_need_a_token() {
        let spotify = Spotify::new(None, None);
        let playlist = Playlist {
            id: uuid::Uuid::new_v4(),
            provider: Provider::Spotify,
            identifier: "37i9dQZF1DXcBWIGoYBM5M".to_string(),
            url: spotify.playlist_url("37i9dQZF1DXcBWIGoYBM5M"),
            title: String::new(),
            velocity: 0.0,
            state: crate::models::State::Alive,
            failure_count: 0,
            last_updated: None,
            crawled: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(
            spotify.playlist_requests(&playlist, None),
            Err(FetchError::MissingCredentials(Provider::Spotify))
        ));
        let requests = spotify.playlist_requests(&playlist, Some("tok")).unwrap();
        assert!(requests[0].url.ends_with("/playlists/37i9dQZF1DXcBWIGoYBM5M"));
    }

    #[test]
    fn test_release_date_parses_full_dates_only() {
        assert!(release_date(Some("2019-05-17")).is_some());
        assert!(release_date(Some("2019")).is_none());
        assert!(release_date(None).is_none());
    }

    fn document(body: &str) -> FetchedDocument {
        FetchedDocument {
            status: 200,
            url: "https://api.spotify.com/v1".to_string(),
            body: body.as_bytes().to_vec(),
            etag: None,
            last_modified: None,
            content_type: Some("application/json".to_string()),
        }
    }

    fn item(id: &str) -> String {
        format!(r#"{{"track":{{"id":"{id}","name":"Song {id}","artists":[{{"id":"ar1","name":"Band"}}]}}}}"#)
    }

    #[test]
    fn test_follows_next_from_first_page_and_later_pages() {
        let spotify = Spotify::new(None, None);
        let request = FetchRequest::get("https://api.spotify.com/v1/playlists/p")
            .bearer("tok")
            .unwrap();

        let first = document(
            r#"{"id":"p","name":"Mix","tracks":{"items":[],
                "next":"https://api.spotify.com/v1/playlists/p/tracks?offset=100"}}"#,
        );
        let next = spotify.next_page(&request, &first).unwrap().unwrap();
        assert_eq!(next.url, "https://api.spotify.com/v1/playlists/p/tracks?offset=100");
        assert_eq!(next.headers, request.headers);

        let last = document(r#"{"items":[],"next":null}"#);
        assert!(spotify.next_page(&next, &last).unwrap().is_none());
    }

    #[test]
    fn test_parse_playlist_joins_pages() {
        let spotify = Spotify::new(None, None);
        let playlist = Playlist {
            id: uuid::Uuid::new_v4(),
            provider: Provider::Spotify,
            identifier: "p".to_string(),
            url: spotify.playlist_url("p"),
            title: String::new(),
            velocity: 0.0,
            state: crate::models::State::Alive,
            failure_count: 0,
            last_updated: None,
            crawled: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let first = document(&format!(
            r#"{{"id":"p","name":"Mix","tracks":{{"items":[{},{{"track":null}}],"next":"x"}}}}"#,
            item("t1")
        ));
        let second = document(&format!(r#"{{"items":[{}],"next":null}}"#, item("t2")));

        let parsed = spotify.parse_playlist(&playlist, &[first, second]).unwrap();
        let ids: Vec<_> = parsed.tracks.iter().map(|t| t.track.identifier.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_track_and_album_lookups() {
        let spotify = Spotify::new(None, None);
        let track = reference(Provider::Spotify, MediaKind::Track, "t1", spotify.track_url("t1"));
        assert!(spotify.track_request(&track, None).is_err());
        let request = spotify.track_request(&track, Some("tok")).unwrap().unwrap();
        assert!(request.url.ends_with("/tracks/t1"));

        let found = spotify
            .parse_track(
                &track,
                &document(
                    r#"{"id":"t1","name":"Song","duration_ms":200000,
                        "artists":[{"id":"ar1","name":"Band"}],
                        "album":{"id":"al1","name":"Record","release_date":"2019-05-17",
                                 "images":[{"url":"big"},{"url":"small"}]}}"#,
                ),
            )
            .unwrap()
            .unwrap();
        assert_eq!(found.track.title, "Song");
        assert_eq!(found.track.duration, Some(200));
        assert_eq!(found.track.thumbnail_url.as_deref(), Some("small"));
        assert_eq!(found.album.unwrap().album.identifier, "al1");

        let album = reference(Provider::Spotify, MediaKind::Album, "al1", spotify.album_url("al1"));
        let found = spotify
            .parse_album(
                &album,
                &document(r#"{"id":"al1","name":"Record","artists":[{"id":"ar1","name":"Band"}]}"#),
            )
            .unwrap()
            .unwrap();
        assert_eq!(found.album.title, "Record");
        assert_eq!(found.album.owner_name.as_deref(), Some("Band"));
        assert_eq!(found.artists.len(), 1);
    }
}
