//! Shared entry point of the `rss_crawler` and `playlist_crawler` binaries.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::crawler::Crawler;
use crate::error::{CrawlError, Result};
use crate::schedule::{CrawlKind, CrawlTrigger, RunTrigger, Scheduler};

const WATCH_POLL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RunOnce,
    Add(String),
    Watch,
    Help,
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    match args {
        [] => Ok(Command::RunOnce),
        [flag] if flag == "--watch" => Ok(Command::Watch),
        [flag] if flag == "--help" || flag == "-h" => Ok(Command::Help),
        [flag, url] if flag == "--add" => Ok(Command::Add(url.clone())),
        _ => Err(CrawlError::Config(format!(
            "unrecognized arguments: {}",
            args.join(" ")
        ))),
    }
}

fn usage(kind: CrawlKind) -> String {
    let (binary, target) = match kind {
        CrawlKind::Rss => ("rss_crawler", "feed or website URL"),
        CrawlKind::Playlist => ("playlist_crawler", "playlist URL"),
    };
    format!(
        "Usage: {binary} [--add <{target}> | --watch]\n\n\
         Without arguments, crawls once and prints a summary."
    )
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(kind: CrawlKind) -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", usage(kind));
        return Ok(());
    }

    let config = Config::load()?;
    let crawler = Arc::new(Crawler::from_config(&config).await?);

    match command {
        Command::Add(url) => match kind {
            CrawlKind::Rss => {
                let feed = crawler.add_feed(&url).await?;
                println!("Added feed {} ({})", feed.url, feed.title);
            }
            CrawlKind::Playlist => {
                let playlist = crawler.add_playlist(&url).await?;
                println!("Added {} playlist {}", playlist.provider, playlist.identifier);
            }
        },
        Command::RunOnce => {
            let summary = CrawlTrigger::new(crawler, kind).run().await?;
            println!("{kind}: {summary}");
        }
        Command::Watch => {
            let mut scheduler = Scheduler::new(Arc::new(SystemClock));
            scheduler.add(
                Arc::new(CrawlTrigger::new(crawler, kind)),
                kind.default_schedule(),
            );
            scheduler
                .run_until(WATCH_POLL, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Command::Help => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(&args(&[])).unwrap(), Command::RunOnce);
        assert_eq!(parse_args(&args(&["--watch"])).unwrap(), Command::Watch);
        assert_eq!(
            parse_args(&args(&["--add", "https://example.com/feed.xml"])).unwrap(),
            Command::Add("https://example.com/feed.xml".to_string())
        );
        assert!(parse_args(&args(&["--add"])).is_err());
        assert!(parse_args(&args(&["--refresh", "now"])).is_err());
    }
}
