use std::collections::BTreeMap;
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

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const MAX_RESULTS: u32 = 50;

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

type Thumbnails = BTreeMap<String, Thumbnail>;

fn pick(thumbnails: &Thumbnails, order: &[&str]) -> Option<String> {
    order
        .iter()
        .find_map(|size| thumbnails.get(*size))
        .map(|t| t.url.clone())
}

fn thumbnail_url(thumbnails: &Thumbnails) -> Option<String> {
    pick(thumbnails, &["default", "medium", "high", "standard", "maxres"])
}

fn artwork_url(thumbnails: &Thumbnails) -> Option<String> {
    pick(thumbnails, &["maxres", "standard", "high", "medium", "default"])
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    id: String,
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: String,
    #[serde(default)]
    description: String,
    published_at: Option<DateTime<Utc>>,
    channel_id: Option<String>,
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

// Videos carry the same id and snippet fields as playlists.
type VideoResource = PlaylistResource;

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: String,
    #[serde(default)]
    description: String,
    published_at: Option<DateTime<Utc>>,
    video_owner_channel_id: Option<String>,
    video_owner_channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

pub struct YouTube {
    api_key: Option<String>,
    api_base: String,
}

impl YouTube {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn track_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            compile_pattern(r"(?:youtube(?:-nocookie)?\.com/(?:embed/|v/|watch/?\?(?:[^\s&]*&)*v=)|youtu\.be/)([a-zA-Z0-9_-]{11})")
        })
    }

    fn playlist_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            compile_pattern(r"youtube(?:-nocookie)?\.com/(?:playlist\?|embed/videoseries\?|watch/?\?(?:[^\s&]*&)*)list=([a-zA-Z0-9_-]+)")
        })
    }
}

#[async_trait]
impl ProviderAdapter for YouTube {
    fn provider(&self) -> Provider {
        Provider::YouTube
    }

    fn track_url(&self, identifier: &str) -> String {
        format!("https://www.youtube.com/watch/?v={identifier}")
    }

    fn album_url(&self, identifier: &str) -> String {
        self.playlist_url(identifier)
    }

    fn playlist_url(&self, identifier: &str) -> String {
        format!("https://www.youtube.com/playlist?list={identifier}")
    }

    fn artist_url(&self, identifier: &str) -> String {
        format!("https://www.youtube.com/channel/{identifier}")
    }

    fn extract_references(&self, text: &str) -> Vec<MediaReference> {
        let tracks = Self::track_pattern()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|id| *id != "videoseries")
            .map(|id| reference(Provider::YouTube, MediaKind::Track, id, self.track_url(id)));

        let playlists = Self::playlist_pattern()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .map(|id| reference(Provider::YouTube, MediaKind::Playlist, id, self.playlist_url(id)));

        tracks.chain(playlists).collect()
    }

    fn playlist_requests(
        &self,
        playlist: &Playlist,
        _token: Option<&str>,
    ) -> Result<Vec<FetchRequest>, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::MissingCredentials(Provider::YouTube))?;
        let key = urlencoding::encode(key);
        let id = urlencoding::encode(&playlist.identifier);

        Ok(vec![
            FetchRequest::get(format!(
                "{}/playlists?part=snippet&id={id}&maxResults={MAX_RESULTS}&key={key}",
                self.api_base
            )),
            FetchRequest::get(format!(
                "{}/playlistItems?part=snippet&playlistId={id}&maxResults={MAX_RESULTS}&key={key}",
                self.api_base
            )),
        ])
    }

    fn next_page(
        &self,
        request: &FetchRequest,
        document: &FetchedDocument,
    ) -> Result<Option<FetchRequest>, ParseError> {
        if !request.url.contains("/playlistItems?") {
            return Ok(None);
        }
        let value: serde_json::Value = decode(document)?;
        let Some(token) = value.get("nextPageToken").and_then(|t| t.as_str()) else {
            return Ok(None);
        };
        let base = request.url.split("&pageToken=").next().unwrap_or(&request.url);
        Ok(Some(request.follow(format!(
            "{base}&pageToken={}",
            urlencoding::encode(token)
        ))))
    }

    fn parse_playlist(
        &self,
        playlist: &Playlist,
        documents: &[FetchedDocument],
    ) -> Result<ParsedPlaylist, ParseError> {
        let header: ListResponse<PlaylistResource> =
            decode(documents.first().ok_or_else(|| missing_document(0))?)?;
        if documents.len() < 2 {
            return Err(missing_document(1));
        }
        let mut items: Vec<serde_json::Value> = Vec::new();
        for page in &documents[1..] {
            let page: ListResponse<serde_json::Value> = decode(page)?;
            items.extend(page.items);
        }

        let resource = header
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ParseError::Document(format!("playlist {} not found", playlist.identifier)))?;
        let snippet = resource.snippet;

        let record = PlaylistRecord {
            provider: Provider::YouTube,
            url: self.playlist_url(&resource.id),
            identifier: resource.id,
            owner_id: snippet.channel_id,
            owner_name: snippet.channel_title,
            title: snippet.title,
            description: Some(snippet.description).filter(|d| !d.is_empty()),
            thumbnail_url: thumbnail_url(&snippet.thumbnails),
            artwork_url: artwork_url(&snippet.thumbnails),
            published_at: snippet.published_at,
        };

        let (tracks, errors) = decode_items(items, |item: PlaylistItem| {
            let snippet = item.snippet;
            let video_id = snippet
                .resource_id
                .video_id
                .ok_or_else(|| "playlist item has no videoId".to_string())?;

            let artists = match (&snippet.video_owner_channel_id, &snippet.video_owner_channel_title) {
                (Some(id), Some(name)) => vec![ArtistRecord {
                    provider: Provider::YouTube,
                    identifier: id.clone(),
                    url: self.artist_url(id),
                    name: name.clone(),
                    thumbnail_url: None,
                    artwork_url: None,
                }],
                _ => Vec::new(),
            };

            Ok(TrackCandidate {
                track: TrackRecord {
                    provider: Provider::YouTube,
                    url: self.track_url(&video_id),
                    identifier: video_id,
                    owner_id: snippet.video_owner_channel_id,
                    owner_name: snippet.video_owner_channel_title,
                    title: snippet.title,
                    description: Some(snippet.description).filter(|d| !d.is_empty()),
                    thumbnail_url: thumbnail_url(&snippet.thumbnails),
                    artwork_url: artwork_url(&snippet.thumbnails),
                    audio_url: None,
                    duration: None,
                    published_at: snippet.published_at,
                },
                artists,
                album: None,
            })
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
        _token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::MissingCredentials(Provider::YouTube))?;
        Ok(Some(FetchRequest::get(format!(
            "{}/videos?part=snippet&id={}&key={}",
            self.api_base,
            urlencoding::encode(&track.identifier),
            urlencoding::encode(key)
        ))))
    }

    /// An empty `items` list means the video was removed or made private.
    fn parse_track(
        &self,
        _track: &MediaReference,
        document: &FetchedDocument,
    ) -> Result<Option<TrackCandidate>, ParseError> {
        let response: ListResponse<VideoResource> = decode(document)?;
        let Some(video) = response.items.into_iter().next() else {
            return Ok(None);
        };
        let snippet = video.snippet;

        let artists = match (&snippet.channel_id, &snippet.channel_title) {
            (Some(id), Some(name)) => vec![ArtistRecord {
                provider: Provider::YouTube,
                identifier: id.clone(),
                url: self.artist_url(id),
                name: name.clone(),
                thumbnail_url: None,
                artwork_url: None,
            }],
            _ => Vec::new(),
        };

        Ok(Some(TrackCandidate {
            track: TrackRecord {
                provider: Provider::YouTube,
                url: self.track_url(&video.id),
                identifier: video.id,
                owner_id: snippet.channel_id,
                owner_name: snippet.channel_title,
                title: snippet.title,
                description: Some(snippet.description).filter(|d| !d.is_empty()),
                thumbnail_url: thumbnail_url(&snippet.thumbnails),
                artwork_url: artwork_url(&snippet.thumbnails),
                audio_url: None,
                duration: None,
                published_at: snippet.published_at,
            },
            artists,
            album: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::State;
    use uuid::Uuid;

    fn playlist() -> Playlist {
        Playlist {
            id: Uuid::new_v4(),
            provider: Provider::YouTube,
            identifier: "PLabc".to_string(),
            url: "https://www.youtube.com/playlist?list=PLabc".to_string(),
            title: String::new(),
            velocity: 0.0,
            state: State::Alive,
            failure_count: 0,
            last_updated: None,
            crawled: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn document(body: &str) -> FetchedDocument {
        FetchedDocument {
            status: 200,
            url: "https://www.googleapis.com/youtube/v3".to_string(),
            body: body.as_bytes().to_vec(),
            etag: None,
            last_modified: None,
            content_type: Some("application/json".to_string()),
        }
    }

    #[test]
    fn test_extracts_watch_short_and_embed_links() {
        let yt = YouTube::new(None);
        let refs = yt.extract_references(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ https://youtu.be/9bZkp7q19f0 \
             https://www.youtube.com/embed/videoseries?list=PLabc",
        );
        let ids: Vec<_> = refs.iter().map(|r| (r.kind, r.identifier.as_str())).collect();
        assert_eq!(
            ids,
            vec![
                (MediaKind::Track, "dQw4w9WgXcQ"),
                (MediaKind::Track, "9bZkp7q19f0"),
                (MediaKind::Playlist, "PLabc"),
            ]
        );
        assert_eq!(refs[0].url, "https://www.youtube.com/watch/?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_requests_need_an_api_key() {
        let err = YouTube::new(None).playlist_requests(&playlist(), None).unwrap_err();
        assert!(matches!(err, FetchError::MissingCredentials(Provider::YouTube)));

        let requests = YouTube::new(Some("k".to_string()))
            .playlist_requests(&playlist(), None)
            .unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].url.contains("playlistItems"));
        assert!(requests[1].url.contains("playlistId=PLabc"));
    }

    #[test]
    fn test_parse_playlist_keeps_good_items() {
        let header = r#"{"items":[{"id":"PLabc","snippet":{"title":"Mix","description":"",
            "publishedAt":"2024-01-01T00:00:00Z","channelId":"UC1","channelTitle":"Curator",
            "thumbnails":{"default":{"url":"https://i.ytimg.com/s.jpg"},"high":{"url":"https://i.ytimg.com/h.jpg"}}}}]}"#;
        let items = r#"{"items":[
            {"snippet":{"title":"Song","description":"d","publishedAt":"2024-01-02T00:00:00Z",
             "videoOwnerChannelId":"UC2","videoOwnerChannelTitle":"Band",
             "resourceId":{"kind":"youtube#video","videoId":"dQw4w9WgXcQ"}}},
            {"snippet":{"title":"Deleted video","resourceId":{"kind":"youtube#video"}}}
        ]}"#;

        let parsed = YouTube::new(None)
            .parse_playlist(&playlist(), &[document(header), document(items)])
            .unwrap();

        assert_eq!(parsed.playlist.title, "Mix");
        assert_eq!(parsed.playlist.thumbnail_url.as_deref(), Some("https://i.ytimg.com/s.jpg"));
        assert_eq!(parsed.playlist.artwork_url.as_deref(), Some("https://i.ytimg.com/h.jpg"));
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].artists[0].name, "Band");
        assert_eq!(parsed.errors, vec![ParseError::Item {
            index: 1,
            reason: "playlist item has no videoId".to_string()
        }]);
    }

    #[test]
    fn test_item_pages_follow_next_page_token() {
        let yt = YouTube::new(Some("k".to_string()));
        let requests = yt.playlist_requests(&playlist(), None).unwrap();

        let header = document(r#"{"items":[],"nextPageToken":"ignored"}"#);
        assert!(yt.next_page(&requests[0], &header).unwrap().is_none());

        let page = document(r#"{"items":[],"nextPageToken":"CDIQAA"}"#);
        let second = yt.next_page(&requests[1], &page).unwrap().unwrap();
        assert!(second.url.ends_with("&pageToken=CDIQAA"));

        let page = document(r#"{"items":[],"nextPageToken":"CGQQAA"}"#);
        let third = yt.next_page(&second, &page).unwrap().unwrap();
        assert_eq!(third.url.matches("pageToken=").count(), 1);
        assert!(third.url.ends_with("&pageToken=CGQQAA"));

        assert!(yt.next_page(&third, &document(r#"{"items":[]}"#)).unwrap().is_none());
    }

    #[test]
    fn test_parse_playlist_joins_item_pages() {
        let header = r#"{"items":[{"id":"PLabc","snippet":{"title":"Mix"}}]}"#;
        let page = |id: &str| {
            format!(
                r#"{{"items":[{{"snippet":{{"title":"Song {id}","resourceId":{{"videoId":"{id}"}}}}}}]}}"#
            )
        };
        let parsed = YouTube::new(None)
            .parse_playlist(
                &playlist(),
                &[document(header), document(&page("aaaaaaaaaaa")), document(&page("bbbbbbbbbbb"))],
            )
            .unwrap();
        let ids: Vec<_> = parsed.tracks.iter().map(|t| t.track.identifier.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);
    }

    #[test]
    fn test_video_lookup() {
        let yt = YouTube::new(Some("k".to_string()));
        let video = reference(Provider::YouTube, MediaKind::Track, "dQw4w9WgXcQ", yt.track_url("dQw4w9WgXcQ"));
        let request = yt.track_request(&video, None).unwrap().unwrap();
        assert!(request.url.contains("/videos?part=snippet&id=dQw4w9WgXcQ"));
        assert!(yt.album_request(&video, None).unwrap().is_none());

        let found = yt
            .parse_track(
                &video,
                &document(
                    r#"{"items":[{"id":"dQw4w9WgXcQ","snippet":{"title":"Never","channelId":"UC9",
                        "channelTitle":"Rick","thumbnails":{"high":{"url":"https://i.ytimg.com/h.jpg"}}}}]}"#,
                ),
            )
            .unwrap()
            .unwrap();
        assert_eq!(found.track.title, "Never");
        assert_eq!(found.track.owner_name.as_deref(), Some("Rick"));
        assert_eq!(found.artists[0].identifier, "UC9");

        assert!(yt.parse_track(&video, &document(r#"{"items":[]}"#)).unwrap().is_none());
    }
}
