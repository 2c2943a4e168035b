//! Crawl runs over feeds and playlists.
//!
//! Each feed or playlist is one crawl unit. Units run concurrently up to
//! `crawl_concurrency`; every unit fetches, parses, deduplicates and then
//! commits in one transaction. Fetches still in flight at the run deadline
//! are cancelled without counting against the source.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{FeedBatch, FeedUpdate, PlaylistBatch, PlaylistUpdate, Repository};
use crate::dedup::{count_new_tracks, plan_entries, EntryDecision};
use crate::error::{CrawlError, FetchError, ParseError, Result};
use crate::feed::fetcher::{FeedFetcher, FetchRequest, Fetched, FetchedDocument};
use crate::feed::parser::parse_feed;
use crate::models::{Feed, MediaKind, MediaReference, Playlist, State};
use crate::providers::ProviderRegistry;
use crate::velocity::{spread_arrivals, VelocityPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    Fetching,
    Parsing,
    Deduplicating,
    Persisting,
    Failed,
}

impl CrawlPhase {
    /// `Fetching -> Persisting` covers a 304, where only bookkeeping is written.
    pub fn can_advance_to(self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Fetching, Parsing)
                | (Fetching, Persisting)
                | (Fetching, Failed)
                | (Parsing, Deduplicating)
                | (Parsing, Failed)
                | (Deduplicating, Persisting)
                | (Deduplicating, Failed)
                | (Persisting, Idle)
                | (Persisting, Failed)
                | (Failed, Idle)
        )
    }
}

/// Tracks the phase of one feed or playlist crawl.
#[derive(Debug)]
pub struct CrawlUnit {
    label: String,
    phase: CrawlPhase,
}

impl CrawlUnit {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            phase: CrawlPhase::Idle,
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn advance(&mut self, next: CrawlPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(anyhow::anyhow!(
                "illegal crawl transition {:?} -> {:?} for {}",
                self.phase,
                next,
                self.label
            )
            .into());
        }
        tracing::debug!("{}: {:?} -> {:?}", self.label, self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Moves to `Failed` then back to `Idle` from wherever the unit stopped.
    fn fail(&mut self) {
        if self.phase.can_advance_to(CrawlPhase::Failed) {
            self.phase = CrawlPhase::Failed;
        }
        self.phase = CrawlPhase::Idle;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitReport {
    pub outcome: UnitOutcome,
    pub parse_errors: usize,
    pub entries_created: usize,
    pub entries_updated: usize,
    pub entries_skipped: usize,
    pub tracks_linked: usize,
}

impl UnitReport {
    fn with_outcome(outcome: UnitOutcome) -> Self {
        Self {
            outcome,
            parse_errors: 0,
            entries_created: 0,
            entries_updated: 0,
            entries_skipped: 0,
            tracks_linked: 0,
        }
    }
}

/// Totals for one run, printed by the binaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub parse_errors: usize,
    pub entries_created: usize,
    pub entries_updated: usize,
    pub entries_skipped: usize,
    pub tracks_linked: usize,
    /// Bare tracks and albums filled in from provider lookups.
    pub media_enriched: usize,
    /// Bare tracks and albums the provider no longer has.
    pub media_dead: usize,
}

impl RunSummary {
    pub fn record(&mut self, report: &UnitReport) {
        match report.outcome {
            UnitOutcome::Succeeded => self.succeeded += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Cancelled => self.cancelled += 1,
        }
        self.parse_errors += report.parse_errors;
        self.entries_created += report.entries_created;
        self.entries_updated += report.entries_updated;
        self.entries_skipped += report.entries_skipped;
        self.tracks_linked += report.tracks_linked;
    }

    pub fn units(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

impl FromIterator<UnitReport> for RunSummary {
    fn from_iter<I: IntoIterator<Item = UnitReport>>(iter: I) -> Self {
        let mut summary = RunSummary::default();
        for report in iter {
            summary.record(&report);
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} failed, {} cancelled; entries {} new, {} updated, {} skipped; {} tracks linked; {} parse errors",
            self.succeeded,
            self.failed,
            self.cancelled,
            self.entries_created,
            self.entries_updated,
            self.entries_skipped,
            self.tracks_linked,
            self.parse_errors
        )?;
        if self.media_enriched + self.media_dead > 0 {
            write!(f, "; media {} enriched, {} dead", self.media_enriched, self.media_dead)?;
        }
        Ok(())
    }
}

// Upper bound on follow-up pages per playlist request.
const MAX_PAGES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Filled,
    Dead,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlSettings {
    pub concurrency: usize,
    pub run_deadline: Duration,
    pub max_failures: u32,
    /// Bare tracks, and separately albums, looked up per playlist run.
    pub enrich_limit: usize,
    pub velocity: VelocityPolicy,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.crawl_concurrency.max(1),
            run_deadline: config.run_deadline(),
            max_failures: config.max_consecutive_failures,
            enrich_limit: config.enrich_batch_size,
            velocity: VelocityPolicy::from_config(config),
        }
    }
}

pub struct Crawler {
    repo: Repository,
    fetcher: FeedFetcher,
    providers: Arc<ProviderRegistry>,
    settings: CrawlSettings,
    clock: Arc<dyn Clock>,
}

impl Crawler {
    pub fn new(
        repo: Repository,
        fetcher: FeedFetcher,
        providers: ProviderRegistry,
        settings: CrawlSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            fetcher,
            providers: Arc::new(providers),
            settings,
            clock,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let repo = Repository::open(config.database_path()).await?;
        let fetcher = FeedFetcher::new(config)?;
        Ok(Self::new(
            repo,
            fetcher,
            ProviderRegistry::from_config(config),
            CrawlSettings::from_config(config),
            Arc::new(SystemClock),
        ))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Registers a feed from a feed URL or a page that links to one.
    pub async fn add_feed(&self, url: &str) -> Result<Feed> {
        let new_feed = self.fetcher.discover_feed(url).await?;
        let feed = self.repo.insert_feed(new_feed, self.clock.now()).await?;
        tracing::info!("Registered feed {} ({})", feed.url, feed.title);
        Ok(feed)
    }

    /// Registers a playlist from any share or embed URL a provider recognizes.
    pub async fn add_playlist(&self, url: &str) -> Result<Playlist> {
        let reference = self
            .providers
            .playlist_reference(url)
            .ok_or_else(|| CrawlError::Config(format!("{url} is not a known playlist URL")))?;
        let playlist = self.repo.register_playlist(reference, self.clock.now()).await?;
        tracing::info!("Registered {} playlist {}", playlist.provider, playlist.identifier);
        Ok(playlist)
    }

    pub async fn crawl_feeds(&self) -> Result<RunSummary> {
        let feeds = self.repo.alive_feeds().await?;
        let deadline = Instant::now() + self.settings.run_deadline;
        tracing::info!("Crawling {} feeds", feeds.len());

        let summary: RunSummary = stream::iter(feeds)
            .map(|feed| self.crawl_feed(feed, deadline))
            .buffer_unordered(self.settings.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        tracing::info!("Feed run finished: {}", summary);
        Ok(summary)
    }

    pub async fn crawl_playlists(&self) -> Result<RunSummary> {
        let playlists = self.repo.alive_playlists().await?;
        let deadline = Instant::now() + self.settings.run_deadline;
        tracing::info!("Crawling {} playlists", playlists.len());

        let mut summary: RunSummary = stream::iter(playlists)
            .map(|playlist| self.crawl_playlist(playlist, deadline))
            .buffer_unordered(self.settings.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        match self.enrich_media_until(deadline).await {
            Ok((enriched, dead)) => {
                summary.media_enriched = enriched;
                summary.media_dead = dead;
            }
            Err(e) => tracing::error!("Media lookups failed: {}", e),
        }

        tracing::info!("Playlist run finished: {}", summary);
        Ok(summary)
    }

    async fn crawl_feed(&self, feed: Feed, deadline: Instant) -> UnitReport {
        let mut unit = CrawlUnit::new(feed.url.as_str());
        match self.run_feed(&mut unit, &feed, deadline).await {
            Ok(report) => report,
            Err(err) => {
                unit.fail();
                let report = failure_report(&err);
                if err.counts_as_failure() {
                    match self
                        .repo
                        .record_feed_failure(feed.id, self.settings.max_failures, self.clock.now())
                        .await
                    {
                        Ok(State::Dead) => tracing::warn!("{}: {} (feed is now dead)", feed.url, err),
                        Ok(State::Alive) => tracing::warn!("{}: {}", feed.url, err),
                        Err(e) => tracing::error!("{}: {} (and failed to record it: {})", feed.url, err, e),
                    }
                } else {
                    tracing::warn!("{}: {}", feed.url, err);
                }
                report
            }
        }
    }

    async fn run_feed(&self, unit: &mut CrawlUnit, feed: &Feed, deadline: Instant) -> Result<UnitReport> {
        let policy = &self.settings.velocity;

        unit.advance(CrawlPhase::Fetching)?;
        let request = FetchRequest::get(feed.url.as_str())
            .with_validators(feed.etag.clone(), feed.last_modified.clone());
        let fetched = before_deadline(&feed.url, deadline, self.fetcher.fetch(&request)).await?;
        let now = self.clock.now();

        let document = match fetched {
            Fetched::Modified(document) => document,
            Fetched::NotModified => {
                unit.advance(CrawlPhase::Persisting)?;
                let velocity = policy.estimate(feed.velocity, feed.last_updated, &[], now);
                self.repo.record_feed_not_modified(feed.id, velocity, now).await?;
                unit.advance(CrawlPhase::Idle)?;
                tracing::debug!("{}: not modified", feed.url);
                return Ok(UnitReport::with_outcome(UnitOutcome::Succeeded));
            }
        };

        unit.advance(CrawlPhase::Parsing)?;
        let parsed = parse_feed(&feed.url, &document.body, &self.providers)?;
        for error in &parsed.errors {
            tracing::warn!("{}: {}", feed.url, error);
        }

        unit.advance(CrawlPhase::Deduplicating)?;
        let existing = self.repo.entry_keys(feed.id).await?;
        let plan = plan_entries(parsed.entries, &existing);
        tracing::debug!(
            "{}: HTTP {}, {} to insert, {} to update",
            feed.url,
            document.status,
            plan.inserts(),
            plan.updates()
        );

        let arrivals: Vec<DateTime<Utc>> = plan
            .writes
            .iter()
            .filter(|w| w.decision == EntryDecision::Insert)
            .filter_map(|w| w.candidate.entry.published)
            .collect();
        let velocity = policy.estimate(feed.velocity, feed.last_updated, &arrivals, now);
        let last_updated = arrivals.iter().copied().chain(feed.last_updated).max();
        let tracks_linked = plan
            .writes
            .iter()
            .flat_map(|w| &w.candidate.references)
            .filter(|r| r.kind == MediaKind::Track)
            .count();
        let skipped = plan.skipped;

        unit.advance(CrawlPhase::Persisting)?;
        let stats = self
            .repo
            .commit_feed_batch(FeedBatch {
                feed_id: feed.id,
                writes: plan.writes,
                update: FeedUpdate {
                    meta: parsed.meta,
                    velocity,
                    last_updated,
                    etag: document.etag,
                    last_modified: document.last_modified,
                    crawled: now,
                },
            })
            .await?;
        unit.advance(CrawlPhase::Idle)?;

        tracing::info!(
            "{}: {} new, {} updated, {} skipped",
            feed.url,
            stats.entries_created,
            stats.entries_updated,
            skipped
        );
        Ok(UnitReport {
            outcome: UnitOutcome::Succeeded,
            parse_errors: parsed.errors.len(),
            entries_created: stats.entries_created,
            entries_updated: stats.entries_updated,
            entries_skipped: skipped,
            tracks_linked,
        })
    }

    async fn crawl_playlist(&self, playlist: Playlist, deadline: Instant) -> UnitReport {
        let mut unit = CrawlUnit::new(playlist.url.as_str());
        match self.run_playlist(&mut unit, &playlist, deadline).await {
            Ok(report) => report,
            Err(err) => {
                unit.fail();
                let report = failure_report(&err);
                if err.counts_as_failure() {
                    match self
                        .repo
                        .record_playlist_failure(playlist.id, self.settings.max_failures, self.clock.now())
                        .await
                    {
                        Ok(State::Dead) => {
                            tracing::warn!("{}: {} (playlist is now dead)", playlist.url, err)
                        }
                        Ok(State::Alive) => tracing::warn!("{}: {}", playlist.url, err),
                        Err(e) => tracing::error!(
                            "{}: {} (and failed to record it: {})",
                            playlist.url,
                            err,
                            e
                        ),
                    }
                } else {
                    tracing::warn!("{}: {}", playlist.url, err);
                }
                report
            }
        }
    }

    async fn run_playlist(
        &self,
        unit: &mut CrawlUnit,
        playlist: &Playlist,
        deadline: Instant,
    ) -> Result<UnitReport> {
        let adapter = self
            .providers
            .get(playlist.provider)
            .ok_or_else(|| CrawlError::Config(format!("no adapter for {}", playlist.provider)))?;

        unit.advance(CrawlPhase::Fetching)?;
        let token = before_deadline(&playlist.url, deadline, adapter.authorize(&self.fetcher)).await?;
        let requests = adapter.playlist_requests(playlist, token.as_deref())?;

        let mut documents: Vec<FetchedDocument> = Vec::with_capacity(requests.len());
        for request in requests {
            let mut pages = 0;
            let mut next = Some(request);
            while let Some(request) = next.take() {
                let document = self.fetch_document(&request, deadline).await?;
                pages += 1;
                next = adapter.next_page(&request, &document)?;
                if next.is_some() && pages >= MAX_PAGES {
                    tracing::warn!("{}: stopping after {} pages", playlist.url, MAX_PAGES);
                    next = None;
                }
                documents.push(document);
            }
        }

        unit.advance(CrawlPhase::Parsing)?;
        let parsed = adapter.parse_playlist(playlist, &documents)?;
        for error in &parsed.errors {
            tracing::warn!("{}: {}", playlist.url, error);
        }

        unit.advance(CrawlPhase::Deduplicating)?;
        let linked = self.repo.playlist_track_keys(playlist.id).await?;
        let new_tracks = count_new_tracks(&parsed.tracks, &linked);
        let now = self.clock.now();

        let (velocity, last_updated) = match playlist.crawled {
            // Nothing to measure against yet.
            None => (playlist.velocity, Some(now)),
            Some(previous) => {
                let arrivals = spread_arrivals(previous, now, new_tracks);
                let velocity = self.settings.velocity.estimate(
                    playlist.velocity,
                    playlist.last_updated,
                    &arrivals,
                    now,
                );
                (velocity, arrivals.last().copied().or(playlist.last_updated))
            }
        };

        unit.advance(CrawlPhase::Persisting)?;
        self.repo
            .commit_playlist_batch(PlaylistBatch {
                playlist_id: playlist.id,
                tracks: parsed.tracks,
                update: PlaylistUpdate {
                    record: parsed.playlist,
                    velocity,
                    last_updated,
                    crawled: now,
                },
            })
            .await?;
        unit.advance(CrawlPhase::Idle)?;

        tracing::info!("{}: {} new tracks", playlist.url, new_tracks);
        Ok(UnitReport {
            parse_errors: parsed.errors.len(),
            tracks_linked: new_tracks,
            ..UnitReport::with_outcome(UnitOutcome::Succeeded)
        })
    }

    /// Looks up bare tracks and albums through their providers.
    ///
    /// A lookup the provider answers with "not found" marks the row dead.
    /// Other failures leave it bare for the next run.
    pub async fn enrich_media(&self) -> Result<RunSummary> {
        let deadline = Instant::now() + self.settings.run_deadline;
        let (media_enriched, media_dead) = self.enrich_media_until(deadline).await?;
        Ok(RunSummary {
            media_enriched,
            media_dead,
            ..RunSummary::default()
        })
    }

    async fn enrich_media_until(&self, deadline: Instant) -> Result<(usize, usize)> {
        let limit = self.settings.enrich_limit;
        let mut media = self.repo.bare_media(MediaKind::Track, limit).await?;
        media.extend(self.repo.bare_media(MediaKind::Album, limit).await?);
        if media.is_empty() {
            return Ok((0, 0));
        }
        tracing::info!("Looking up {} bare tracks and albums", media.len());

        let outcomes: Vec<Lookup> = stream::iter(media)
            .map(|media| self.enrich(media, deadline))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let enriched = outcomes.iter().filter(|o| **o == Lookup::Filled).count();
        let dead = outcomes.iter().filter(|o| **o == Lookup::Dead).count();
        Ok((enriched, dead))
    }

    async fn enrich(&self, media: MediaReference, deadline: Instant) -> Lookup {
        match self.look_up(&media, deadline).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("{} {}: {}", media.provider, media.identifier, err);
                Lookup::Skipped
            }
        }
    }

    async fn look_up(&self, media: &MediaReference, deadline: Instant) -> Result<Lookup> {
        let Some(adapter) = self.providers.get(media.provider) else {
            return Ok(Lookup::Skipped);
        };

        let request = before_deadline(&media.url, deadline, adapter.authorize(&self.fetcher))
            .await
            .and_then(|token| match media.kind {
                MediaKind::Track => adapter.track_request(media, token.as_deref()),
                MediaKind::Album => adapter.album_request(media, token.as_deref()),
                MediaKind::Playlist => Ok(None),
            });
        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) | Err(FetchError::MissingCredentials(_)) => return Ok(Lookup::Skipped),
            Err(err) => return Err(err.into()),
        };

        let now = self.clock.now();
        let document = match self.fetch_document(&request, deadline).await {
            Ok(document) => document,
            Err(FetchError::Status { status: 404 | 410, .. }) => {
                self.repo.mark_media_dead(media, now).await?;
                return Ok(Lookup::Dead);
            }
            Err(err) => return Err(err.into()),
        };

        // Stored under the identifier that was looked up, even if the provider relinked it.
        let found = match media.kind {
            MediaKind::Track => match adapter.parse_track(media, &document)? {
                Some(mut candidate) => {
                    candidate.track.identifier = media.identifier.clone();
                    self.repo.store_track_details(candidate, now).await?;
                    true
                }
                None => false,
            },
            MediaKind::Album => match adapter.parse_album(media, &document)? {
                Some(mut candidate) => {
                    candidate.album.identifier = media.identifier.clone();
                    self.repo.store_album_details(candidate, now).await?;
                    true
                }
                None => false,
            },
            MediaKind::Playlist => return Ok(Lookup::Skipped),
        };

        if found {
            Ok(Lookup::Filled)
        } else {
            self.repo.mark_media_dead(media, now).await?;
            Ok(Lookup::Dead)
        }
    }

    async fn fetch_document(
        &self,
        request: &FetchRequest,
        deadline: Instant,
    ) -> std::result::Result<FetchedDocument, FetchError> {
        match before_deadline(&request.url, deadline, self.fetcher.fetch(request)).await? {
            Fetched::Modified(document) => Ok(document),
            Fetched::NotModified => Err(FetchError::Status {
                status: 304,
                url: request.url.clone(),
            }),
        }
    }
}

/// Runs an HTTP step unless the run deadline passes first.
async fn before_deadline<T, F>(url: &str, deadline: Instant, step: F) -> std::result::Result<T, FetchError>
where
    F: Future<Output = std::result::Result<T, FetchError>>,
{
    match tokio::time::timeout_at(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Cancelled {
            url: url.to_string(),
        }),
    }
}

fn failure_report(err: &CrawlError) -> UnitReport {
    let outcome = match err {
        CrawlError::Fetch(FetchError::Cancelled { .. }) => UnitOutcome::Cancelled,
        _ => UnitOutcome::Failed,
    };
    UnitReport {
        parse_errors: usize::from(matches!(err, CrawlError::Parse(ParseError::Document(_)))),
        ..UnitReport::with_outcome(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_walks_the_happy_path() {
        let mut unit = CrawlUnit::new("https://example.com/feed.xml");
        for phase in [
            CrawlPhase::Fetching,
            CrawlPhase::Parsing,
            CrawlPhase::Deduplicating,
            CrawlPhase::Persisting,
            CrawlPhase::Idle,
        ] {
            unit.advance(phase).unwrap();
        }
        assert_eq!(unit.phase(), CrawlPhase::Idle);
    }

    #[test]
    fn test_unit_rejects_skipping_phases() {
        let mut unit = CrawlUnit::new("https://example.com/feed.xml");
        assert!(unit.advance(CrawlPhase::Persisting).is_err());
        assert_eq!(unit.phase(), CrawlPhase::Idle);

        unit.advance(CrawlPhase::Fetching).unwrap();
        assert!(unit.advance(CrawlPhase::Deduplicating).is_err());
        assert!(unit.advance(CrawlPhase::Idle).is_err());
        unit.advance(CrawlPhase::Failed).unwrap();
        unit.advance(CrawlPhase::Idle).unwrap();
    }

    #[test]
    fn test_failed_unit_returns_to_idle() {
        let mut unit = CrawlUnit::new("https://example.com/feed.xml");
        unit.advance(CrawlPhase::Fetching).unwrap();
        unit.fail();
        assert_eq!(unit.phase(), CrawlPhase::Idle);
        unit.advance(CrawlPhase::Fetching).unwrap();
    }

    #[test]
    fn test_summary_adds_up_reports() {
        let reports = vec![
            UnitReport {
                parse_errors: 1,
                entries_created: 9,
                tracks_linked: 2,
                ..UnitReport::with_outcome(UnitOutcome::Succeeded)
            },
            failure_report(&CrawlError::Fetch(FetchError::Timeout {
                url: "https://slow.example.com/rss".to_string(),
            })),
            failure_report(&CrawlError::Fetch(FetchError::Cancelled {
                url: "https://late.example.com/rss".to_string(),
            })),
            failure_report(&CrawlError::Parse(ParseError::Document("eof".to_string()))),
        ];

        let summary: RunSummary = reports.into_iter().collect();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.parse_errors, 2);
        assert_eq!(summary.entries_created, 9);
        assert_eq!(summary.units(), 4);
        assert!(summary.to_string().starts_with("1 ok, 2 failed, 1 cancelled"));
    }
}
