mod entry;
mod feed;
mod media;
mod provider;

pub use entry::{Enclosure, EntryCandidate, EntryKey, EntryRecord, Link};
pub use feed::{Feed, FeedMeta, NewFeed};
pub use media::{
    AlbumCandidate, AlbumRecord, ArtistRecord, MediaKind, MediaReference, Playlist, PlaylistRecord,
    TrackCandidate, TrackRecord,
};
pub use provider::{Provider, State};
