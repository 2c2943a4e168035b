//! Provider adapters.
//!
//! Each music provider gets one [`ProviderAdapter`]: canonical URLs, link
//! recognition inside entry content, and the playlist API round trip.

mod apple_music;
mod soundcloud;
mod spotify;
mod youtube;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{FetchError, ParseError};
use crate::feed::fetcher::{FeedFetcher, FetchRequest, FetchedDocument};
use crate::models::{
    AlbumCandidate, MediaKind, MediaReference, Playlist, PlaylistRecord, Provider, TrackCandidate,
};

pub use apple_music::AppleMusic;
pub use soundcloud::SoundCloud;
pub use spotify::Spotify;
pub use youtube::YouTube;

#[derive(Debug, Clone)]
pub struct ParsedPlaylist {
    pub playlist: PlaylistRecord,
    pub tracks: Vec<TrackCandidate>,
    pub errors: Vec<ParseError>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn track_url(&self, identifier: &str) -> String;
    fn album_url(&self, identifier: &str) -> String;
    fn playlist_url(&self, identifier: &str) -> String;
    fn artist_url(&self, identifier: &str) -> String;

    /// Finds this provider's track, album and playlist links in free text.
    fn extract_references(&self, text: &str) -> Vec<MediaReference>;

    /// Obtains a short-lived access token where the provider needs one.
    async fn authorize(&self, _fetcher: &FeedFetcher) -> Result<Option<String>, FetchError> {
        Ok(None)
    }

    fn playlist_requests(
        &self,
        playlist: &Playlist,
        token: Option<&str>,
    ) -> Result<Vec<FetchRequest>, FetchError>;

    /// Request for the page after `document`, when the response was paged.
    fn next_page(
        &self,
        _request: &FetchRequest,
        _document: &FetchedDocument,
    ) -> Result<Option<FetchRequest>, ParseError> {
        Ok(None)
    }

    /// Maps the documents fetched for `playlist_requests`, in the same order.
    /// Follow-up pages come right after the document that announced them.
    fn parse_playlist(
        &self,
        playlist: &Playlist,
        documents: &[FetchedDocument],
    ) -> Result<ParsedPlaylist, ParseError>;

    /// Single-track lookup; `None` where the provider has no such call.
    fn track_request(
        &self,
        _track: &MediaReference,
        _token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        Ok(None)
    }

    /// `Ok(None)` when the provider answered but no longer has the track.
    fn parse_track(
        &self,
        _track: &MediaReference,
        _document: &FetchedDocument,
    ) -> Result<Option<TrackCandidate>, ParseError> {
        Err(unsupported_lookup(self.provider(), MediaKind::Track))
    }

    fn album_request(
        &self,
        _album: &MediaReference,
        _token: Option<&str>,
    ) -> Result<Option<FetchRequest>, FetchError> {
        Ok(None)
    }

    fn parse_album(
        &self,
        _album: &MediaReference,
        _document: &FetchedDocument,
    ) -> Result<Option<AlbumCandidate>, ParseError> {
        Err(unsupported_lookup(self.provider(), MediaKind::Album))
    }
}

pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn from_config(config: &Config) -> Self {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(YouTube::new(config.youtube_api_key.clone())),
            Arc::new(SoundCloud::new(config.soundcloud_client_id.clone())),
            Arc::new(Spotify::new(
                config.spotify_client_id.clone(),
                config.spotify_client_secret.clone(),
            )),
            Arc::new(AppleMusic::new(config.apple_music_developer_token.clone())),
        ];
        Self::new(adapters)
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.provider() == provider)
            .cloned()
    }

    /// References from every provider, first occurrence wins.
    pub fn extract_references(&self, text: &str) -> Vec<MediaReference> {
        let mut seen = HashSet::new();
        self.adapters
            .iter()
            .flat_map(|a| a.extract_references(text))
            .filter(|r| seen.insert((r.provider, r.kind, r.identifier.clone())))
            .collect()
    }

    /// Recognizes a playlist share or embed URL.
    pub fn playlist_reference(&self, url: &str) -> Option<MediaReference> {
        self.extract_references(url)
            .into_iter()
            .find(|r| r.kind == MediaKind::Playlist)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("provider patterns are valid")
}

pub(crate) fn decode<T: DeserializeOwned>(document: &FetchedDocument) -> Result<T, ParseError> {
    serde_json::from_slice(&document.body).map_err(|e| ParseError::Document(e.to_string()))
}

/// Decodes playlist items one at a time so a single bad item stays local.
pub(crate) fn decode_items<T, F, R>(
    items: Vec<serde_json::Value>,
    mut map: F,
) -> (Vec<R>, Vec<ParseError>)
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<R, String>,
{
    let mut ok = Vec::new();
    let mut errors = Vec::new();
    for (index, value) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(value)
            .map_err(|e| e.to_string())
            .and_then(&mut map)
        {
            Ok(item) => ok.push(item),
            Err(reason) => errors.push(ParseError::Item { index, reason }),
        }
    }
    (ok, errors)
}

pub(crate) fn reference(
    provider: Provider,
    kind: MediaKind,
    identifier: &str,
    url: String,
) -> MediaReference {
    MediaReference {
        provider,
        kind,
        identifier: identifier.to_string(),
        url,
    }
}

pub(crate) fn missing_document(index: usize) -> ParseError {
    ParseError::Document(format!("missing response document {index}"))
}

fn unsupported_lookup(provider: Provider, kind: MediaKind) -> ParseError {
    ParseError::Document(format!("{provider} has no {kind:?} lookup"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dedupes_references() {
        let registry = ProviderRegistry::default();
        let text = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC \
                    spotify:track:4uLU6hMCjMI75M1A2tKUQC";
        let refs = registry.extract_references(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].provider, Provider::Spotify);
    }

    #[test]
    fn test_playlist_reference_picks_playlists_only() {
        let registry = ProviderRegistry::default();
        assert!(registry
            .playlist_reference("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .is_none());
        let playlist = registry
            .playlist_reference("https://www.youtube.com/playlist?list=PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG")
            .unwrap();
        assert_eq!(playlist.provider, Provider::YouTube);
        assert_eq!(playlist.identifier, "PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG");
    }

    #[test]
    fn test_every_provider_is_registered() {
        let registry = ProviderRegistry::default();
        for provider in Provider::ALL {
            assert_eq!(registry.get(provider).unwrap().provider(), provider);
        }
    }
}
