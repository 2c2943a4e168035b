use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::dedup::{EntryDecision, PlannedEntry};
use crate::error::{CrawlError, Result};
use crate::models::{
    AlbumCandidate, AlbumRecord, ArtistRecord, EntryKey, EntryRecord, Feed, FeedMeta, MediaKind, MediaReference,
    NewFeed, Playlist, PlaylistRecord, Provider, State, TrackCandidate, TrackRecord,
};

use super::schema::SCHEMA;

const FEED_COLUMNS: &str = "id, url, title, description, language, velocity, website, state, \
     failure_count, etag, last_modified, last_updated, crawled, visual_url, icon_url, cover_url, \
     created_at, updated_at";

const PLAYLIST_COLUMNS: &str = "id, provider, identifier, url, title, velocity, state, \
     failure_count, last_updated, crawled, created_at, updated_at";

const ENTRY_COLUMNS: &str = "url, title, summary, content, author, visual_url, locale, published, \
     updated, fingerprint, alternate, enclosure, keywords, origin_id";

/// Tables that can be counted, mostly for run reports and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Feeds,
    Entries,
    Tracks,
    Albums,
    Playlists,
    Artists,
    TrackEntries,
    AlbumEntries,
    PlaylistEntries,
    TrackArtists,
    AlbumArtists,
    AlbumTracks,
    PlaylistTracks,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Feeds => "feeds",
            Table::Entries => "entries",
            Table::Tracks => "tracks",
            Table::Albums => "albums",
            Table::Playlists => "playlists",
            Table::Artists => "artists",
            Table::TrackEntries => "track_entries",
            Table::AlbumEntries => "album_entries",
            Table::PlaylistEntries => "playlist_entries",
            Table::TrackArtists => "track_artists",
            Table::AlbumArtists => "album_artists",
            Table::AlbumTracks => "album_tracks",
            Table::PlaylistTracks => "playlist_tracks",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Junction {
    TrackEntry,
    AlbumEntry,
    PlaylistEntry,
    TrackArtist,
    AlbumArtist,
    AlbumTrack,
    PlaylistTrack,
}

impl Junction {
    fn columns(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Junction::TrackEntry => ("track_entries", "track_id", "entry_id"),
            Junction::AlbumEntry => ("album_entries", "album_id", "entry_id"),
            Junction::PlaylistEntry => ("playlist_entries", "playlist_id", "entry_id"),
            Junction::TrackArtist => ("track_artists", "track_id", "artist_id"),
            Junction::AlbumArtist => ("album_artists", "album_id", "artist_id"),
            Junction::AlbumTrack => ("album_tracks", "album_id", "track_id"),
            Junction::PlaylistTrack => ("playlist_tracks", "playlist_id", "track_id"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub meta: FeedMeta,
    pub velocity: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub crawled: DateTime<Utc>,
}

/// Everything one feed crawl writes, committed in a single transaction.
#[derive(Debug, Clone)]
pub struct FeedBatch {
    pub feed_id: Uuid,
    pub writes: Vec<PlannedEntry>,
    pub update: FeedUpdate,
}

#[derive(Debug, Clone)]
pub struct PlaylistUpdate {
    pub record: PlaylistRecord,
    pub velocity: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub crawled: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PlaylistBatch {
    pub playlist_id: Uuid,
    pub tracks: Vec<TrackCandidate>,
    pub update: PlaylistUpdate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub entries_created: usize,
    pub entries_updated: usize,
    pub links_written: usize,
    pub duplicate_conflicts: usize,
}

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Registers a feed, or refreshes and revives the existing row for the same URL.
    pub async fn insert_feed(&self, feed: NewFeed, now: DateTime<Utc>) -> Result<Feed> {
        let feed = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"INSERT INTO feeds (id, url, title, description, language, website, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                       ON CONFLICT(url) DO UPDATE SET
                           title = CASE WHEN excluded.title = '' THEN feeds.title ELSE excluded.title END,
                           description = COALESCE(excluded.description, feeds.description),
                           language = COALESCE(excluded.language, feeds.language),
                           website = COALESCE(excluded.website, feeds.website),
                           state = 'alive',
                           failure_count = 0,
                           updated_at = excluded.updated_at
                       RETURNING {FEED_COLUMNS}"#
                );
                let feed = conn.query_row(
                    &sql,
                    params![
                        Uuid::new_v4().to_string(),
                        feed.url,
                        feed.title,
                        feed.description,
                        feed.language,
                        feed.website,
                        ts(now),
                    ],
                    feed_from_row,
                )?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn feed(&self, id: Uuid) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                        params![id.to_string()],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    /// Feeds still being crawled, least recently crawled first.
    pub async fn alive_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FEED_COLUMNS} FROM feeds WHERE state = 'alive' ORDER BY crawled ASC, url ASC"
                ))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn entry_keys(&self, feed_id: Uuid) -> Result<Vec<EntryKey>> {
        let keys = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT id, url, origin_id, fingerprint FROM entries WHERE feed_id = ?1")?;
                let keys = stmt
                    .query_map(params![feed_id.to_string()], |row| {
                        Ok(EntryKey {
                            id: uuid_column(row, 0)?,
                            url: row.get(1)?,
                            origin_id: row.get(2)?,
                            fingerprint: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    pub async fn entry(&self, feed_id: Uuid, origin_id: &str) -> Result<Option<EntryRecord>> {
        let origin_id = origin_id.to_string();
        let entry = self
            .conn
            .call(move |conn| {
                let entry = conn
                    .query_row(
                        &format!(
                            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ?1 AND origin_id = ?2"
                        ),
                        params![feed_id.to_string(), origin_id],
                        entry_from_row,
                    )
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    /// Writes planned entries, their media links and the feed row atomically.
    pub async fn commit_feed_batch(&self, batch: FeedBatch) -> Result<PersistStats> {
        let stats = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let feed_id = batch.feed_id.to_string();
                let now = batch.update.crawled;
                let mut stats = PersistStats::default();

                for planned in &batch.writes {
                    let entry = &planned.candidate.entry;
                    let entry_id = match planned.decision {
                        EntryDecision::Insert => write_entry(&tx, &feed_id, entry, now, &mut stats)?,
                        EntryDecision::Update(id) => {
                            let id = id.to_string();
                            update_entry(&tx, &id, entry, now)?;
                            stats.entries_updated += 1;
                            id
                        }
                        EntryDecision::Skip => continue,
                    };

                    for reference in &planned.candidate.references {
                        link_reference(&tx, &entry_id, reference, now)?;
                        stats.links_written += 1;
                    }
                }

                update_feed_row(&tx, &feed_id, &batch.update)?;
                tx.commit()?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }

    /// A 304: the feed was reachable, nothing changed.
    pub async fn record_feed_not_modified(
        &self,
        feed_id: Uuid,
        velocity: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET velocity = ?2, crawled = ?3, failure_count = 0, updated_at = ?3 WHERE id = ?1",
                    params![feed_id.to_string(), velocity, ts(now)],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Counts a failed crawl; the feed dies once `max_failures` is reached.
    pub async fn record_feed_failure(
        &self,
        feed_id: Uuid,
        max_failures: u32,
        now: DateTime<Utc>,
    ) -> Result<State> {
        let state = self
            .conn
            .call(move |conn| Ok(bump_failure(conn, "feeds", &feed_id.to_string(), max_failures, now)?))
            .await?;
        Ok(state)
    }

    // Playlist operations

    /// Registers a playlist reference as a crawl target.
    pub async fn register_playlist(&self, reference: MediaReference, now: DateTime<Utc>) -> Result<Playlist> {
        let playlist = self
            .conn
            .call(move |conn| {
                let record =
                    PlaylistRecord::reference(reference.provider, &reference.identifier, &reference.url);
                let id = upsert_collection(conn, "playlists", &record, now)?;
                conn.execute(
                    "UPDATE playlists SET state = 'alive', failure_count = 0, updated_at = ?2 WHERE id = ?1",
                    params![id, ts(now)],
                )?;
                let playlist = conn.query_row(
                    &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
                    params![id],
                    playlist_from_row,
                )?;
                Ok(playlist)
            })
            .await?;
        Ok(playlist)
    }

    pub async fn playlist(&self, id: Uuid) -> Result<Option<Playlist>> {
        let playlist = self
            .conn
            .call(move |conn| {
                let playlist = conn
                    .query_row(
                        &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
                        params![id.to_string()],
                        playlist_from_row,
                    )
                    .optional()?;
                Ok(playlist)
            })
            .await?;
        Ok(playlist)
    }

    pub async fn alive_playlists(&self) -> Result<Vec<Playlist>> {
        let playlists = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE state = 'alive' ORDER BY crawled ASC, url ASC"
                ))?;
                let playlists = stmt
                    .query_map([], playlist_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(playlists)
            })
            .await?;
        Ok(playlists)
    }

    /// `(provider, identifier)` of every track already linked to the playlist.
    pub async fn playlist_track_keys(&self, playlist_id: Uuid) -> Result<HashSet<(Provider, String)>> {
        let keys = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT t.provider, t.identifier
                       FROM playlist_tracks pt
                       JOIN tracks t ON t.id = pt.track_id
                       WHERE pt.playlist_id = ?1"#,
                )?;
                let keys = stmt
                    .query_map(params![playlist_id.to_string()], |row| {
                        Ok((provider_column(row, 0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    /// Writes tracks, artists, albums, their links and the playlist row atomically.
    pub async fn commit_playlist_batch(&self, batch: PlaylistBatch) -> Result<PersistStats> {
        let stats = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let playlist_id = batch.playlist_id.to_string();
                let now = batch.update.crawled;
                let mut stats = PersistStats::default();

                for candidate in &batch.tracks {
                    let track_id = store_track(&tx, candidate, now)?;
                    link(&tx, Junction::PlaylistTrack, &playlist_id, &track_id, now)?;
                    stats.links_written += 1;
                }

                update_playlist_row(&tx, &playlist_id, &batch.update)?;
                tx.commit()?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }

    pub async fn record_playlist_failure(
        &self,
        playlist_id: Uuid,
        max_failures: u32,
        now: DateTime<Utc>,
    ) -> Result<State> {
        let state = self
            .conn
            .call(move |conn| {
                Ok(bump_failure(conn, "playlists", &playlist_id.to_string(), max_failures, now)?)
            })
            .await?;
        Ok(state)
    }

    /// Alive tracks or albums still known only by a bare reference, newest first.
    pub async fn bare_media(&self, kind: MediaKind, limit: usize) -> Result<Vec<MediaReference>> {
        let Some(table) = media_table(kind) else {
            return Ok(Vec::new());
        };
        let media = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT provider, identifier, url FROM {table}
                     WHERE state = 'alive' AND title = ''
                     ORDER BY created_at DESC, identifier ASC
                     LIMIT ?1"
                ))?;
                let media = stmt
                    .query_map(params![limit as i64], |row| {
                        Ok(MediaReference {
                            provider: provider_column(row, 0)?,
                            kind,
                            identifier: row.get(1)?,
                            url: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(media)
            })
            .await?;
        Ok(media)
    }

    /// Stores provider details for a track, with its artists and album, atomically.
    pub async fn store_track_details(&self, candidate: TrackCandidate, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                store_track(&tx, &candidate, now)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn store_album_details(&self, candidate: AlbumCandidate, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                store_album(&tx, &candidate, now)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The provider no longer has this track or album.
    pub async fn mark_media_dead(&self, media: &MediaReference, now: DateTime<Utc>) -> Result<()> {
        let Some(table) = media_table(media.kind) else {
            return Ok(());
        };
        let (provider, identifier) = (media.provider, media.identifier.clone());
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "UPDATE {table} SET state = 'dead', updated_at = ?3
                         WHERE provider = ?1 AND identifier = ?2"
                    ),
                    params![provider.as_str(), identifier, ts(now)],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn count_rows(&self, table: Table) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table.name()),
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn provider_column(row: &Row, idx: usize) -> rusqlite::Result<Provider> {
    let raw: String = row.get(idx)?;
    raw.parse::<Provider>().map_err(|e| conversion_error(idx, e))
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn required_time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(time_column(row, idx)?.unwrap_or_else(Utc::now))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: uuid_column(row, 0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        language: row.get(4)?,
        velocity: row.get(5)?,
        website: row.get(6)?,
        state: State::from_db(&row.get::<_, String>(7)?),
        failure_count: row.get(8)?,
        etag: row.get(9)?,
        last_modified: row.get(10)?,
        last_updated: time_column(row, 11)?,
        crawled: time_column(row, 12)?,
        visual_url: row.get(13)?,
        icon_url: row.get(14)?,
        cover_url: row.get(15)?,
        created_at: required_time_column(row, 16)?,
        updated_at: required_time_column(row, 17)?,
    })
}

fn playlist_from_row(row: &Row) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: uuid_column(row, 0)?,
        provider: provider_column(row, 1)?,
        identifier: row.get(2)?,
        url: row.get(3)?,
        title: row.get(4)?,
        velocity: row.get(5)?,
        state: State::from_db(&row.get::<_, String>(6)?),
        failure_count: row.get(7)?,
        last_updated: time_column(row, 8)?,
        crawled: time_column(row, 9)?,
        created_at: required_time_column(row, 10)?,
        updated_at: required_time_column(row, 11)?,
    })
}

fn entry_from_row(row: &Row) -> rusqlite::Result<EntryRecord> {
    Ok(EntryRecord {
        url: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        content: row.get(3)?,
        author: row.get(4)?,
        visual_url: row.get(5)?,
        locale: row.get(6)?,
        published: time_column(row, 7)?,
        updated: time_column(row, 8)?,
        fingerprint: row.get(9)?,
        alternate: json_column(row, 10)?,
        enclosure: json_column(row, 11)?,
        keywords: json_column(row, 12)?,
        origin_id: row.get(13)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn insert_entry(
    conn: &rusqlite::Connection,
    feed_id: &str,
    entry: &EntryRecord,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        r#"INSERT INTO entries (id, url, title, visual_url, locale, summary, content, author,
                                crawled, published, updated, fingerprint, alternate, enclosure,
                                keywords, origin_id, feed_id, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?9, ?9)"#,
        params![
            id,
            entry.url,
            entry.title,
            entry.visual_url,
            entry.locale,
            entry.summary,
            entry.content,
            entry.author,
            ts(now),
            entry.published.map(ts),
            entry.updated.map(ts),
            entry.fingerprint,
            serde_json::to_string(&entry.alternate)?,
            serde_json::to_string(&entry.enclosure)?,
            serde_json::to_string(&entry.keywords)?,
            entry.origin_id,
            feed_id,
        ],
    );

    match result {
        Ok(_) => Ok(id),
        Err(e) if is_unique_violation(&e) => Err(CrawlError::DuplicateConflict {
            table: "entries",
            key: entry.origin_id.clone().unwrap_or_else(|| entry.url.clone()),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Inserts an entry; a concurrent duplicate on (feed_id, origin_id) becomes an update.
fn write_entry(
    conn: &rusqlite::Connection,
    feed_id: &str,
    entry: &EntryRecord,
    now: DateTime<Utc>,
    stats: &mut PersistStats,
) -> Result<String> {
    match insert_entry(conn, feed_id, entry, now) {
        Ok(id) => {
            stats.entries_created += 1;
            Ok(id)
        }
        Err(err) if err.is_benign() => {
            tracing::debug!("{}; updating the stored entry instead", err);
            let id: String = conn.query_row(
                "SELECT id FROM entries WHERE feed_id = ?1 AND origin_id = ?2",
                params![feed_id, entry.origin_id],
                |row| row.get(0),
            )?;
            update_entry(conn, &id, entry, now)?;
            stats.entries_updated += 1;
            stats.duplicate_conflicts += 1;
            Ok(id)
        }
        Err(err) => Err(err),
    }
}

fn update_entry(
    conn: &rusqlite::Connection,
    id: &str,
    entry: &EntryRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"UPDATE entries SET
               url = ?2, title = ?3, visual_url = ?4, locale = ?5, summary = ?6, content = ?7,
               author = ?8, published = ?9, updated = ?10, fingerprint = ?11, alternate = ?12,
               enclosure = ?13, keywords = ?14, updated_at = ?15,
               origin_id = COALESCE(?16, origin_id)
           WHERE id = ?1"#,
        params![
            id,
            entry.url,
            entry.title,
            entry.visual_url,
            entry.locale,
            entry.summary,
            entry.content,
            entry.author,
            entry.published.map(ts),
            entry.updated.map(ts),
            entry.fingerprint,
            serde_json::to_string(&entry.alternate)?,
            serde_json::to_string(&entry.enclosure)?,
            serde_json::to_string(&entry.keywords)?,
            ts(now),
            entry.origin_id,
        ],
    )?;
    Ok(())
}

fn update_feed_row(conn: &rusqlite::Connection, feed_id: &str, update: &FeedUpdate) -> Result<()> {
    let meta = &update.meta;
    conn.execute(
        r#"UPDATE feeds SET
               title = COALESCE(?2, title),
               description = COALESCE(?3, description),
               language = COALESCE(?4, language),
               website = COALESCE(?5, website),
               icon_url = COALESCE(?6, icon_url),
               visual_url = COALESCE(?7, visual_url),
               velocity = ?8,
               last_updated = COALESCE(?9, last_updated),
               etag = ?10,
               last_modified = ?11,
               crawled = ?12,
               failure_count = 0,
               updated_at = ?12
           WHERE id = ?1"#,
        params![
            feed_id,
            meta.title.as_deref().filter(|t| !t.is_empty()),
            meta.description,
            meta.language,
            meta.website,
            meta.icon_url,
            meta.visual_url,
            update.velocity,
            update.last_updated.map(ts),
            update.etag,
            update.last_modified,
            ts(update.crawled),
        ],
    )?;
    Ok(())
}

fn update_playlist_row(
    conn: &rusqlite::Connection,
    playlist_id: &str,
    update: &PlaylistUpdate,
) -> Result<()> {
    let record = &update.record;
    conn.execute(
        r#"UPDATE playlists SET
               title = CASE WHEN ?2 = '' THEN title ELSE ?2 END,
               owner_id = COALESCE(?3, owner_id),
               owner_name = COALESCE(?4, owner_name),
               description = COALESCE(?5, description),
               thumbnail_url = COALESCE(?6, thumbnail_url),
               artwork_url = COALESCE(?7, artwork_url),
               published_at = COALESCE(?8, published_at),
               velocity = ?9,
               last_updated = COALESCE(?10, last_updated),
               crawled = ?11,
               failure_count = 0,
               updated_at = ?11
           WHERE id = ?1"#,
        params![
            playlist_id,
            record.title,
            record.owner_id,
            record.owner_name,
            record.description,
            record.thumbnail_url,
            record.artwork_url,
            record.published_at.map(ts),
            update.velocity,
            update.last_updated.map(ts),
            ts(update.crawled),
        ],
    )?;
    Ok(())
}

fn bump_failure(
    conn: &rusqlite::Connection,
    table: &'static str,
    id: &str,
    max_failures: u32,
    now: DateTime<Utc>,
) -> Result<State> {
    let state: String = conn.query_row(
        &format!(
            r#"UPDATE {table} SET
                   failure_count = failure_count + 1,
                   state = CASE WHEN failure_count + 1 >= ?2 THEN 'dead' ELSE state END,
                   updated_at = ?3
               WHERE id = ?1
               RETURNING state"#
        ),
        params![id, max_failures, ts(now)],
        |row| row.get(0),
    )?;
    Ok(State::from_db(&state))
}

// Empty values from a bare reference never overwrite what a provider API filled in.
fn upsert_track(conn: &rusqlite::Connection, track: &TrackRecord, now: DateTime<Utc>) -> Result<String> {
    let id: String = conn.query_row(
        r#"INSERT INTO tracks (id, provider, identifier, owner_id, owner_name, url, title, description,
                               thumbnail_url, artwork_url, audio_url, duration, published_at,
                               created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
           ON CONFLICT(provider, identifier) DO UPDATE SET
               owner_id = COALESCE(excluded.owner_id, tracks.owner_id),
               owner_name = COALESCE(excluded.owner_name, tracks.owner_name),
               url = CASE WHEN excluded.title = '' THEN tracks.url ELSE excluded.url END,
               title = CASE WHEN excluded.title = '' THEN tracks.title ELSE excluded.title END,
               description = COALESCE(excluded.description, tracks.description),
               thumbnail_url = COALESCE(excluded.thumbnail_url, tracks.thumbnail_url),
               artwork_url = COALESCE(excluded.artwork_url, tracks.artwork_url),
               audio_url = COALESCE(excluded.audio_url, tracks.audio_url),
               duration = COALESCE(excluded.duration, tracks.duration),
               published_at = COALESCE(excluded.published_at, tracks.published_at),
               updated_at = excluded.updated_at
           RETURNING id"#,
        params![
            Uuid::new_v4().to_string(),
            track.provider.as_str(),
            track.identifier,
            track.owner_id,
            track.owner_name,
            track.url,
            track.title,
            track.description,
            track.thumbnail_url,
            track.artwork_url,
            track.audio_url,
            track.duration,
            track.published_at.map(ts),
            ts(now),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Albums and playlists share their descriptive columns.
fn upsert_collection(
    conn: &rusqlite::Connection,
    table: &'static str,
    record: &AlbumRecord,
    now: DateTime<Utc>,
) -> Result<String> {
    let id: String = conn.query_row(
        &format!(
            r#"INSERT INTO {table} (id, provider, identifier, owner_id, owner_name, url, title,
                                    description, thumbnail_url, artwork_url, published_at,
                                    created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
               ON CONFLICT(provider, identifier) DO UPDATE SET
                   owner_id = COALESCE(excluded.owner_id, {table}.owner_id),
                   owner_name = COALESCE(excluded.owner_name, {table}.owner_name),
                   url = CASE WHEN excluded.title = '' THEN {table}.url ELSE excluded.url END,
                   title = CASE WHEN excluded.title = '' THEN {table}.title ELSE excluded.title END,
                   description = COALESCE(excluded.description, {table}.description),
                   thumbnail_url = COALESCE(excluded.thumbnail_url, {table}.thumbnail_url),
                   artwork_url = COALESCE(excluded.artwork_url, {table}.artwork_url),
                   published_at = COALESCE(excluded.published_at, {table}.published_at),
                   updated_at = excluded.updated_at
               RETURNING id"#
        ),
        params![
            Uuid::new_v4().to_string(),
            record.provider.as_str(),
            record.identifier,
            record.owner_id,
            record.owner_name,
            record.url,
            record.title,
            record.description,
            record.thumbnail_url,
            record.artwork_url,
            record.published_at.map(ts),
            ts(now),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn upsert_artist(conn: &rusqlite::Connection, artist: &ArtistRecord, now: DateTime<Utc>) -> Result<String> {
    let id: String = conn.query_row(
        r#"INSERT INTO artists (id, provider, identifier, url, name, thumbnail_url, artwork_url,
                                created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
           ON CONFLICT(provider, identifier) DO UPDATE SET
               url = excluded.url,
               name = CASE WHEN excluded.name = '' THEN artists.name ELSE excluded.name END,
               thumbnail_url = COALESCE(excluded.thumbnail_url, artists.thumbnail_url),
               artwork_url = COALESCE(excluded.artwork_url, artists.artwork_url),
               updated_at = excluded.updated_at
           RETURNING id"#,
        params![
            Uuid::new_v4().to_string(),
            artist.provider.as_str(),
            artist.identifier,
            artist.url,
            artist.name,
            artist.thumbnail_url,
            artist.artwork_url,
            ts(now),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn media_table(kind: MediaKind) -> Option<&'static str> {
    match kind {
        MediaKind::Track => Some("tracks"),
        MediaKind::Album => Some("albums"),
        MediaKind::Playlist => None,
    }
}

fn store_track(conn: &rusqlite::Connection, candidate: &TrackCandidate, now: DateTime<Utc>) -> Result<String> {
    let track_id = upsert_track(conn, &candidate.track, now)?;
    for artist in &candidate.artists {
        let artist_id = upsert_artist(conn, artist, now)?;
        link(conn, Junction::TrackArtist, &track_id, &artist_id, now)?;
    }
    if let Some(album) = &candidate.album {
        let album_id = store_album(conn, album, now)?;
        link(conn, Junction::AlbumTrack, &album_id, &track_id, now)?;
    }
    Ok(track_id)
}

fn store_album(conn: &rusqlite::Connection, candidate: &AlbumCandidate, now: DateTime<Utc>) -> Result<String> {
    let album_id = upsert_collection(conn, "albums", &candidate.album, now)?;
    for artist in &candidate.artists {
        let artist_id = upsert_artist(conn, artist, now)?;
        link(conn, Junction::AlbumArtist, &album_id, &artist_id, now)?;
    }
    Ok(album_id)
}

fn link(
    conn: &rusqlite::Connection,
    junction: Junction,
    parent_id: &str,
    child_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let (table, parent, child) = junction.columns();
    conn.execute(
        &format!(
            "INSERT INTO {table} ({parent}, {child}, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT({parent}, {child}) DO UPDATE SET updated_at = excluded.updated_at"
        ),
        params![parent_id, child_id, ts(now)],
    )?;
    Ok(())
}

fn link_reference(
    conn: &rusqlite::Connection,
    entry_id: &str,
    reference: &MediaReference,
    now: DateTime<Utc>,
) -> Result<()> {
    match reference.kind {
        MediaKind::Track => {
            let record = TrackRecord::reference(reference.provider, &reference.identifier, &reference.url);
            let track_id = upsert_track(conn, &record, now)?;
            link(conn, Junction::TrackEntry, &track_id, entry_id, now)
        }
        MediaKind::Album => {
            let record = AlbumRecord::reference(reference.provider, &reference.identifier, &reference.url);
            let album_id = upsert_collection(conn, "albums", &record, now)?;
            link(conn, Junction::AlbumEntry, &album_id, entry_id, now)
        }
        MediaKind::Playlist => {
            let record = PlaylistRecord::reference(reference.provider, &reference.identifier, &reference.url);
            let playlist_id = upsert_collection(conn, "playlists", &record, now)?;
            link(conn, Junction::PlaylistEntry, &playlist_id, entry_id, now)
        }
    }
}
