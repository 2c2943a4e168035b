pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    language TEXT,
    velocity REAL NOT NULL DEFAULT 0 CHECK (velocity >= 0),
    website TEXT,
    state TEXT NOT NULL DEFAULT 'alive',
    failure_count INTEGER NOT NULL DEFAULT 0,
    etag TEXT,
    last_modified TEXT,
    last_updated TEXT,
    crawled TEXT,
    visual_url TEXT,
    icon_url TEXT,
    cover_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feeds_state ON feeds(state);

-- entries table
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    visual_url TEXT,
    locale TEXT,
    summary TEXT,
    content TEXT,
    author TEXT,
    crawled TEXT NOT NULL,
    published TEXT,
    updated TEXT,
    fingerprint TEXT NOT NULL,
    alternate TEXT NOT NULL DEFAULT '[]',
    enclosure TEXT NOT NULL DEFAULT '[]',
    keywords TEXT NOT NULL DEFAULT '[]',
    origin_id TEXT,
    feed_id TEXT REFERENCES feeds(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_feed_origin ON entries(feed_id, origin_id);
CREATE INDEX IF NOT EXISTS idx_entries_fingerprint ON entries(fingerprint);
CREATE INDEX IF NOT EXISTS idx_entries_published ON entries(published DESC);

-- provider media
CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    identifier TEXT NOT NULL,
    owner_id TEXT,
    owner_name TEXT,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    thumbnail_url TEXT,
    artwork_url TEXT,
    audio_url TEXT,
    duration INTEGER,
    published_at TEXT,
    state TEXT NOT NULL DEFAULT 'alive',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(provider, identifier)
);

CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    identifier TEXT NOT NULL,
    owner_id TEXT,
    owner_name TEXT,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    thumbnail_url TEXT,
    artwork_url TEXT,
    published_at TEXT,
    state TEXT NOT NULL DEFAULT 'alive',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(provider, identifier)
);

CREATE TABLE IF NOT EXISTS playlists (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    identifier TEXT NOT NULL,
    owner_id TEXT,
    owner_name TEXT,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT,
    thumbnail_url TEXT,
    artwork_url TEXT,
    published_at TEXT,
    state TEXT NOT NULL DEFAULT 'alive',
    velocity REAL NOT NULL DEFAULT 0 CHECK (velocity >= 0),
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT,
    crawled TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(provider, identifier)
);

CREATE INDEX IF NOT EXISTS idx_playlists_state ON playlists(state);

CREATE TABLE IF NOT EXISTS artists (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    identifier TEXT NOT NULL,
    url TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    thumbnail_url TEXT,
    artwork_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(provider, identifier)
);

-- junction tables
CREATE TABLE IF NOT EXISTS track_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(track_id, entry_id)
);

CREATE TABLE IF NOT EXISTS album_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(album_id, entry_id)
);

CREATE TABLE IF NOT EXISTS playlist_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    playlist_id TEXT NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(playlist_id, entry_id)
);

CREATE TABLE IF NOT EXISTS track_artists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(track_id, artist_id)
);

CREATE TABLE IF NOT EXISTS album_artists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(album_id, artist_id)
);

CREATE TABLE IF NOT EXISTS album_tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
    track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(album_id, track_id)
);

CREATE TABLE IF NOT EXISTS playlist_tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    playlist_id TEXT NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
    track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(playlist_id, track_id)
);

CREATE INDEX IF NOT EXISTS idx_playlist_tracks_playlist ON playlist_tracks(playlist_id);
"#;
