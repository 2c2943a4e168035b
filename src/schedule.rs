//! Built-in run schedule for `--watch` mode: feeds hourly, playlists every
//! three hours. A one-shot invocation bypasses this and calls the crawler directly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::crawler::{Crawler, RunSummary};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlKind {
    Rss,
    Playlist,
}

impl CrawlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlKind::Rss => "rss",
            CrawlKind::Playlist => "playlist",
        }
    }

    pub fn default_schedule(&self) -> CrawlSchedule {
        match self {
            CrawlKind::Rss => CrawlSchedule::every(Duration::hours(1)),
            CrawlKind::Playlist => CrawlSchedule::every(Duration::hours(3)),
        }
    }
}

impl fmt::Display for CrawlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSchedule {
    interval: Duration,
}

impl CrawlSchedule {
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Due when it never ran, or a full interval has passed since the last start.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }

    pub fn next_run(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        match last_run {
            None => now,
            Some(last) => (last + self.interval).max(now),
        }
    }
}

/// Something the scheduler can start: one batch run of a crawler.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    fn kind(&self) -> CrawlKind;

    async fn run(&self) -> Result<RunSummary>;
}

pub struct CrawlTrigger {
    crawler: Arc<Crawler>,
    kind: CrawlKind,
}

impl CrawlTrigger {
    pub fn new(crawler: Arc<Crawler>, kind: CrawlKind) -> Self {
        Self { crawler, kind }
    }
}

#[async_trait]
impl RunTrigger for CrawlTrigger {
    fn kind(&self) -> CrawlKind {
        self.kind
    }

    async fn run(&self) -> Result<RunSummary> {
        match self.kind {
            CrawlKind::Rss => self.crawler.crawl_feeds().await,
            CrawlKind::Playlist => self.crawler.crawl_playlists().await,
        }
    }
}

struct Job {
    trigger: Arc<dyn RunTrigger>,
    schedule: CrawlSchedule,
    last_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
        }
    }

    pub fn add(&mut self, trigger: Arc<dyn RunTrigger>, schedule: CrawlSchedule) {
        self.jobs.push(Job {
            trigger,
            schedule,
            last_run: None,
        });
    }

    /// Runs every due job once, in registration order.
    ///
    /// A job is stamped with its start time, so a run that overruns its
    /// interval is started again on the next tick rather than skipped.
    pub async fn tick(&mut self) -> Vec<(CrawlKind, Result<RunSummary>)> {
        let mut results = Vec::new();
        for job in &mut self.jobs {
            let now = self.clock.now();
            if !job.schedule.is_due(job.last_run, now) {
                continue;
            }
            job.last_run = Some(now);

            let kind = job.trigger.kind();
            tracing::info!("Starting scheduled {} run", kind);
            let result = job.trigger.run().await;
            match &result {
                Ok(summary) => tracing::info!("Scheduled {} run: {}", kind, summary),
                Err(e) => tracing::error!("Scheduled {} run failed: {}", kind, e),
            }
            results.push((kind, result));
        }
        results
    }

    /// Earliest time any job becomes due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.jobs
            .iter()
            .map(|job| job.schedule.next_run(job.last_run, now))
            .min()
    }

    /// Ticks every `poll` until `shutdown` resolves.
    pub async fn run_until<F>(&mut self, poll: std::time::Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            self.tick().await;
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrigger {
        kind: CrawlKind,
        runs: AtomicUsize,
    }

    impl CountingTrigger {
        fn new(kind: CrawlKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                runs: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RunTrigger for CountingTrigger {
        fn kind(&self) -> CrawlKind {
            self.kind
        }

        async fn run(&self) -> Result<RunSummary> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RunSummary::default())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_schedule_due_after_full_interval() {
        let schedule = CrawlKind::Rss.default_schedule();
        assert!(schedule.is_due(None, start()));
        assert!(!schedule.is_due(Some(start()), start() + Duration::minutes(59)));
        assert!(schedule.is_due(Some(start()), start() + Duration::hours(1)));
        assert_eq!(
            schedule.next_run(Some(start()), start() + Duration::minutes(10)),
            start() + Duration::hours(1)
        );
    }

    #[tokio::test]
    async fn test_scheduler_runs_rss_hourly_and_playlists_every_three_hours() {
        let clock = Arc::new(ManualClock::new(start()));
        let rss = CountingTrigger::new(CrawlKind::Rss);
        let playlists = CountingTrigger::new(CrawlKind::Playlist);

        let mut scheduler = Scheduler::new(clock.clone());
        scheduler.add(rss.clone(), CrawlKind::Rss.default_schedule());
        scheduler.add(playlists.clone(), CrawlKind::Playlist.default_schedule());

        let first = scheduler.tick().await;
        assert_eq!(first.len(), 2);

        // Same instant: nothing is due.
        assert!(scheduler.tick().await.is_empty());

        for _ in 0..6 {
            clock.advance(Duration::hours(1));
            scheduler.tick().await;
        }

        assert_eq!(rss.runs(), 7);
        assert_eq!(playlists.runs(), 3);
        assert_eq!(scheduler.next_due(), Some(start() + Duration::hours(7)));
    }
}
