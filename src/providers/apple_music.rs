use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;

use super::{decode, decode_items, missing_document, reference, compile_pattern, ParsedPlaylist, ProviderAdapter};
use crate::error::{FetchError, ParseError};
use crate::feed::fetcher::{FetchRequest, FetchedDocument};
use crate::models::{
    AlbumCandidate, AlbumRecord, ArtistRecord, MediaKind, MediaReference, Playlist, PlaylistRecord,
    Provider, TrackCandidate, TrackRecord,
};

const API_BASE: &str = "https://api.music.apple.com/v1";
const DEFAULT_COUNTRY: &str = "us";
const THUMBNAIL_SIZE: u32 = 300;
const ARTWORK_SIZE: u32 = 640;

#[derive(Debug, Deserialize)]
struct Artwork {
    url: String,
}

impl Artwork {
    fn render(&self, size: u32) -> String {
        self.url
            .replace("{w}", &size.to_string())
            .replace("{h}", &size.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct EditorialNotes {
    standard: Option<String>,
    short: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Preview {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Related {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Relationship<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistAttributes {
    name: String,
    description: Option<EditorialNotes>,
    artwork: Option<Artwork>,
    curator_name: Option<String>,
    last_modified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PlaylistRelationships {
    tracks: Relationship<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    id: String,
    attributes: PlaylistAttributes,
    relationships: PlaylistRelationships,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SongAttributes {
    name: String,
    artist_name: String,
    album_name: Option<String>,
    artwork: Option<Artwork>,
    duration_in_millis: Option<i64>,
    release_date: Option<String>,
    #[serde(default)]
    previews: Vec<Preview>,
}

#[derive(Debug, Default, Deserialize)]
struct SongRelationships {
    artists: Option<Relationship<Related>>,
    albums: Option<Relationship<Related>>,
}

#[derive(Debug, Deserialize)]
struct SongResource {
    id: String,
    attributes: SongAttributes,
    #[serde(default)]
    relationships: SongRelationships,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumAttributes {
    name: String,
    artist_name: String,
    artwork: Option<Artwork>,
    release_date: Option<String>,
    editorial_notes: Option<EditorialNotes>,
}

#[derive(Debug, Default, Deserialize)]
struct AlbumRelationships {
    artists: Option<Relationship<Related>>,
}

#[derive(Debug, Deserialize)]
struct AlbumResource {
    id: String,
    attributes: AlbumAttributes,
    #[serde(default)]
    relationships: AlbumRelationships,
}

fn release_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw?, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Storefront country of a stored URL: `?country=` on embeds, or the path
/// prefix on music.apple.com links.
fn country_of(raw: &str) -> String {
    let Ok(parsed) = url::Url::parse(raw) else {
        return DEFAULT_COUNTRY.to_string();
    };
    if let Some((_, country)) = parsed.query_pairs().find(|(k, _)| k == "country") {
        return country.to_lowercase();
    }
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|s| s.len() == 2)
        .map(str::to_lowercase)
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string())
}

pub struct AppleMusic {
    developer_token: Option<String>,
    api_base: String,
}

impl AppleMusic {
    pub fn new(developer_token: Option<String>) -> Self {
        Self {
            developer_token,
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn embed_url(kind: &str, identifier: &str, country: &str) -> String {
        format!("https://tools.applemusic.com/embed/v1/{kind}/{identifier}?country={country}")
    }

    fn catalog_request(&self, path: &str, media: &MediaReference) -> Result<FetchRequest, FetchError> {
        let token = self
            .developer_token
            .as_deref()
            .ok_or(FetchError::MissingCredentials(Provider::AppleMusic))?;
        FetchRequest::get(format!(
            "{}/catalog/{}/{path}/{}",
            self.api_base,
            urlencoding::encode(&country_of(&media.url)),
            urlencoding::encode(&media.identifier)
        ))
        .bearer(token)
    }

    fn song_candidate(&self, song: SongResource, country: &str) -> TrackCandidate {
        let attributes = song.attributes;
        let artists: Vec<ArtistRecord> = song
            .relationships
            .artists
            .map(|r| r.data)
            .unwrap_or_default()
            .into_iter()
            .map(|artist| ArtistRecord {
                provider: Provider::AppleMusic,
                url: self.artist_url(&artist.id),
                identifier: artist.id,
                name: attributes.artist_name.clone(),
                thumbnail_url: None,
                artwork_url: None,
            })
            .collect();

        let published_at = release_date(attributes.release_date.as_deref());
        let album = song
            .relationships
            .albums
            .and_then(|r| r.data.into_iter().next())
            .map(|related| AlbumCandidate {
                album: AlbumRecord {
                    provider: Provider::AppleMusic,
                    url: Self::embed_url("album", &related.id, country),
                    identifier: related.id,
                    owner_id: artists.first().map(|a| a.identifier.clone()),
                    owner_name: Some(attributes.artist_name.clone()),
                    title: attributes.album_name.clone().unwrap_or_default(),
                    description: None,
                    thumbnail_url: attributes.artwork.as_ref().map(|a| a.render(THUMBNAIL_SIZE)),
                    artwork_url: attributes.artwork.as_ref().map(|a| a.render(ARTWORK_SIZE)),
                    published_at,
                },
                artists: artists.clone(),
            });

        TrackCandidate {
            track: TrackRecord {
                provider: Provider::AppleMusic,
                url: Self::embed_url("song", &song.id, country),
                identifier: song.id,
                owner_id: artists.first().map(|a| a.identifier.clone()),
                owner_name: Some(attributes.artist_name.clone()),
                title: attributes.name,
                description: None,
                thumbnail_url: attributes.artwork.as_ref().map(|a| a.render(THUMBNAIL_SIZE)),
                artwork_url: attributes.artwork.as_ref().map(|a| a.render(ARTWORK_SIZE)),
                audio_url: attributes.previews.first().map(|p| p.url.clone()),
                duration: attributes.duration_in_millis.map(|ms| ms / 1000),
                published_at,
            },
            artists,
            album,
        }
    }

    fn embed_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            compile_pattern(r"tools\.applemusic\.com/embed/v1/(song|album|playlist)/((?:pl\.)?[a-zA-Z0-9_-]+)(?:\?country=([a-z]{2}))?")
        })
    }

    fn store_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            compile_pattern(r"(?:itunes|music)\.apple\.com/([a-z]{2})/(album|playlist)/[^/\s]+/(?:id)?((?:pl\.)?[a-zA-Z0-9_-]+)")
        })
    }
}

#[async_trait]
impl ProviderAdapter for AppleMusic {
    fn provider(&self) -> Provider {
        Provider::AppleMusic
    }

    fn track_url(&self, identifier: &str) -> String {
        Self::embed_url("song", identifier, DEFAULT_COUNTRY)
    }

    fn album_url(&self, identifier: &str) -> String {
        Self::embed_url("album", identifier, DEFAULT_COUNTRY)
    }

    fn playlist_url(&self, identifier: &str) -> String {
        Self::embed_url("playlist", identifier, DEFAULT_COUNTRY)
    }

    fn artist_url(&self, identifier: &str) -> String {
        format!("https://music.apple.com/{DEFAULT_COUNTRY}/artist/{identifier}")
    }

    fn extract_references(&self, text: &str) -> Vec<MediaReference> {
        let embeds = Self::embed_pattern().captures_iter(text).filter_map(|c| {
            let kind = c.get(1)?.as_str();
            let id = c.get(2)?.as_str();
            let country = c.get(3).map_or(DEFAULT_COUNTRY, |m| m.as_str());
            Some((kind.to_string(), id.to_string(), country.to_string()))
        });
        let store = Self::store_pattern().captures_iter(text).filter_map(|c| {
            let country = c.get(1)?.as_str();
            let kind = c.get(2)?.as_str();
            let id = c.get(3)?.as_str();
            Some((kind.to_string(), id.to_string(), country.to_string()))
        });

        embeds
            .chain(store)
            .filter_map(|(kind, id, country)| {
                let media_kind = match kind.as_str() {
                    "song" => MediaKind::Track,
                    "album" => MediaKind::Album,
                    _ if id.starts_with("pl.") => MediaKind::Playlist,
                    _ => return None,
                };
                let url = Self::embed_url(&kind, &id, &country);
                Some(reference(Provider::AppleMusic, media_kind, &id, url))
            })
            .collect()
    }

    fn playlist_requests(
        &self,
        playlist: &Playlist,
        _token: Option<&str>,
    ) -> Result<Vec<FetchRequest>, FetchError> {
        let token = self
            .developer_token
            .as_deref()
            .ok_or(FetchError::MissingCredentials(Provider::AppleMusic))?;
        let country = country_of(&playlist.url);

        let request = FetchRequest::get(format!(
            "{}/catalog/{}/playlists/{}",
            self.api_base,
            urlencoding::encode(&country),
            urlencoding::encode(&playlist.identifier)
        ))
        .bearer(token)?;
        Ok(vec![request])
    }

    fn parse_playlist(
        &self,
        playlist: &Playlist,
        documents: &[FetchedDocument],
    ) -> Result<ParsedPlaylist, ParseError> {
        let response: Response<PlaylistResource> =
            decode(documents.first().ok_or_else(|| missing_document(0))?)?;
        let resource = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ParseError::Document(format!("playlist {} not found", playlist.identifier)))?;

        let country = country_of(&playlist.url);
        let attributes = resource.attributes;
        let record = PlaylistRecord {
            provider: Provider::AppleMusic,
            url: Self::embed_url("playlist", &resource.id, &country),
            identifier: resource.id,
            owner_id: None,
            owner_name: attributes.curator_name,
            title: attributes.name,
            description: attributes
                .description
                .and_then(|notes| notes.standard.or(notes.short)),
            thumbnail_url: attributes.artwork.as_ref().map(|a| a.render(THUMBNAIL_SIZE)),
            artwork_url: attributes.artwork.as_ref().map(|a| a.render(ARTWORK_SIZE)),
            published_at: attributes.last_modified_date,
        };

        let (tracks, errors) = decode_items(resource.relationships.tracks.data, |song: SongResource| {
            Ok(self.song_candidate(song, &country))
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
        self.catalog_request("songs", track).map(Some)
    }

    fn parse_track(
        &self,
        track: &MediaReference,
        document: &FetchedDocument,
    ) -> Result<Option<TrackCandidate>, ParseError> {
        let response: Response<SongResource> = decode(document)?;
        let country = country_of(&track.url);
        Ok(response
            .data
            .into_iter()
            .next()
            .map(|song| self.song_candidate(song, &country)))
    }

    fn album_request(
        &self,
        album: &MediaReference,
        _token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        self.catalog_request("albums", album).map(Some)
    }

    fn parse_album(
        &self,
        album: &MediaReference,
        document: &FetchedDocument,
    ) -> Result<Option<AlbumCandidate>, ParseError> {
        let response: Response<AlbumResource> = decode(document)?;
        let Some(resource) = response.data.into_iter().next() else {
            return Ok(None);
        };
        let country = country_of(&album.url);
        let attributes = resource.attributes;
        let artists: Vec<ArtistRecord> = resource
            .relationships
            .artists
            .map(|r| r.data)
            .unwrap_or_default()
            .into_iter()
            .map(|artist| ArtistRecord {
                provider: Provider::AppleMusic,
                url: self.artist_url(&artist.id),
                identifier: artist.id,
                name: attributes.artist_name.clone(),
                thumbnail_url: None,
                artwork_url: None,
            })
            .collect();

        Ok(Some(AlbumCandidate {
            album: AlbumRecord {
                provider: Provider::AppleMusic,
                url: Self::embed_url("album", &resource.id, &country),
                identifier: resource.id,
                owner_id: artists.first().map(|a| a.identifier.clone()),
                owner_name: Some(attributes.artist_name),
                title: attributes.name,
                description: attributes
                    .editorial_notes
                    .and_then(|notes| notes.standard.or(notes.short)),
                thumbnail_url: attributes.artwork.as_ref().map(|a| a.render(THUMBNAIL_SIZE)),
                artwork_url: attributes.artwork.as_ref().map(|a| a.render(ARTWORK_SIZE)),
                published_at: release_date(attributes.release_date.as_deref()),
            },
            artists,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_comes_from_query_or_path() {
        assert_eq!(country_of("https://tools.applemusic.com/embed/v1/playlist/pl.abc?country=jp"), "jp");
        assert_eq!(country_of("https://music.apple.com/gb/playlist/chill/pl.abc"), "gb");
        assert_eq!(country_of("https://tools.applemusic.com/embed/v1/playlist/pl.abc"), "us");
        assert_eq!(country_of("not a url"), "us");
    }

    #[test]
    fn test_extracts_embeds_with_country() {
        let apple = AppleMusic::new(None);
        let refs = apple.extract_references(
            r#"<iframe src="https://tools.applemusic.com/embed/v1/song/1440857781?country=jp"></iframe>
               <iframe src="https://tools.applemusic.com/embed/v1/playlist/pl.f4d106fed2bd41149aaacabb233eb5eb"></iframe>"#,
        );
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, MediaKind::Track);
        assert_eq!(refs[0].url, "https://tools.applemusic.com/embed/v1/song/1440857781?country=jp");
        assert_eq!(refs[1].kind, MediaKind::Playlist);
        assert_eq!(refs[1].identifier, "pl.f4d106fed2bd41149aaacabb233eb5eb");
    }

    #[test]
    fn test_artwork_template_is_rendered() {
        let artwork = Artwork {
            url: "https://is1-ssl.mzstatic.com/image/{w}x{h}bb.jpg".to_string(),
        };
        assert_eq!(artwork.render(THUMBNAIL_SIZE), "https://is1-ssl.mzstatic.com/image/300x300bb.jpg");
        assert_eq!(artwork.render(ARTWORK_SIZE), "https://is1-ssl.mzstatic.com/image/640x640bb.jpg");
    }

    #[test]
    fn test_album_lookup_uses_storefront_of_reference() {
        let apple = AppleMusic::new(Some("dev".to_string()));
        let album = reference(
            Provider::AppleMusic,
            MediaKind::Album,
            "1440857781",
            AppleMusic::embed_url("album", "1440857781", "jp"),
        );
        let request = apple.album_request(&album, None).unwrap().unwrap();
        assert!(request.url.ends_with("/catalog/jp/albums/1440857781"));
        assert!(AppleMusic::new(None).album_request(&album, None).is_err());

        let document = FetchedDocument {
            status: 200,
            url: request.url.clone(),
            body: br#"{"data":[{"id":"1440857781","attributes":{"name":"Record","artistName":"Band",
                "releaseDate":"2018-11-02","artwork":{"url":"https://a/{w}x{h}.jpg"}},
                "relationships":{"artists":{"data":[{"id":"55"}]}}}]}"#
                .to_vec(),
            etag: None,
            last_modified: None,
            content_type: None,
        };
        let found = apple.parse_album(&album, &document).unwrap().unwrap();
        assert_eq!(found.album.title, "Record");
        assert_eq!(found.album.url, AppleMusic::embed_url("album", "1440857781", "jp"));
        assert_eq!(found.album.thumbnail_url.as_deref(), Some("https://a/300x300.jpg"));
        assert_eq!(found.artists[0].identifier, "55");

        let empty = FetchedDocument {
            body: br#"{"data":[]}"#.to_vec(),
            ..document
        };
        assert!(apple.parse_album(&album, &empty).unwrap().is_none());
    }
}
