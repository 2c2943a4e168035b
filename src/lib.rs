//! pink-spider: crawls RSS/Atom feeds and provider playlists into SQLite.

pub mod cli;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod db;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod models;
pub mod providers;
pub mod schedule;
pub mod velocity;

pub use config::Config;
pub use crawler::{Crawler, RunSummary};
pub use error::{CrawlError, Result};
