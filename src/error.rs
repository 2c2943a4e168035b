use thiserror::Error;

use crate::models::Provider;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fetch of {url} cancelled by the run deadline")]
    Cancelled { url: String },

    #[error("no credentials configured for {0}")]
    MissingCredentials(Provider),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            FetchError::Connection {
                url: url.to_string(),
                source: err,
            }
        }
    }

    /// Errors that say nothing about the health of the upstream source.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            FetchError::Cancelled { .. } | FetchError::MissingCredentials(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed document: {0}")]
    Document(String),

    #[error("item {index}: {reason}")]
    Item { index: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("duplicate {table} row for key {key}")]
    DuplicateConflict { table: &'static str, key: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// A raced-in duplicate key is resolved as an update, never surfaced.
    pub fn is_benign(&self) -> bool {
        matches!(self, CrawlError::DuplicateConflict { .. })
    }

    /// Whether the error is held against the source and moves it toward `dead`.
    pub fn counts_as_failure(&self) -> bool {
        match self {
            CrawlError::Fetch(e) => e.counts_as_failure(),
            CrawlError::Parse(_) => true,
            _ => false,
        }
    }
}

// Repository closures run on the tokio-rusqlite thread and smuggle crate errors
// back through `tokio_rusqlite::Error::Other`.
impl From<tokio_rusqlite::Error> for CrawlError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => CrawlError::Database(e),
            tokio_rusqlite::Error::Other(inner) => match inner.downcast::<CrawlError>() {
                Ok(crawl) => *crawl,
                Err(other) => CrawlError::Persistence(other.to_string()),
            },
            other => CrawlError::Persistence(other.to_string()),
        }
    }
}

impl From<CrawlError> for tokio_rusqlite::Error {
    fn from(err: CrawlError) -> Self {
        tokio_rusqlite::Error::Other(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
