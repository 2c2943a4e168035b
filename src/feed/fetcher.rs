use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use reqwest::{Client, StatusCode};

use crate::config::Config;
use crate::error::{CrawlError, FetchError, Result};
use crate::feed::parser::feed_meta;
use crate::models::NewFeed;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            etag: None,
            last_modified: None,
        }
    }

    /// Makes the request conditional on the validators from the previous fetch.
    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    /// Same headers against another URL, e.g. the next page of a listing.
    pub fn follow(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: self.headers.clone(),
            etag: None,
            last_modified: None,
        }
    }

    pub fn bearer(mut self, token: &str) -> std::result::Result<Self, FetchError> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Fetched {
    Modified(FetchedDocument),
    NotModified,
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| CrawlError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Shared client, for provider calls that are not plain GETs.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Fetched, FetchError> {
        let mut builder = self.client.get(&request.url).headers(request.headers.clone());
        if let Some(etag) = &request.etag {
            builder = builder.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = &request.last_modified {
            builder = builder.header(IF_MODIFIED_SINCE, last_modified.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&request.url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let final_url = response.url().to_string();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);
        let content_type = header(CONTENT_TYPE);

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(&request.url, e))?;

        Ok(Fetched::Modified(FetchedDocument {
            status: status.as_u16(),
            url: final_url,
            body: body.to_vec(),
            etag,
            last_modified,
            content_type,
        }))
    }

    async fn fetch_document(&self, url: &str) -> Result<FetchedDocument> {
        match self.fetch(&FetchRequest::get(url)).await? {
            Fetched::Modified(document) => Ok(document),
            Fetched::NotModified => {
                Err(anyhow::anyhow!("unexpected 304 for unconditional request to {url}").into())
            }
        }
    }

    /// Discover a feed from a URL.
    /// A direct RSS/Atom/JSON feed is used as is; for an HTML page the
    /// `<link rel="alternate">` feed link is followed.
    pub async fn discover_feed(&self, url: &str) -> Result<NewFeed> {
        let document = self.fetch_document(url).await?;

        if let Some(feed) = new_feed_from(&document.url, &document.body) {
            return Ok(feed);
        }

        let content_type = document.content_type.as_deref().unwrap_or("");
        let body = &document.body;
        if content_type.contains("html") || body.starts_with(b"<!") || body.starts_with(b"<html") {
            let html = String::from_utf8_lossy(body);
            if let Some(feed_url) = find_feed_link(&html, &document.url) {
                tracing::debug!("Following feed link {} from {}", feed_url, document.url);
                let feed_document = self.fetch_document(&feed_url).await?;
                if let Some(feed) = new_feed_from(&feed_url, &feed_document.body) {
                    return Ok(feed);
                }
            }
        }

        Err(anyhow::anyhow!("Could not find RSS/Atom feed at {url}").into())
    }
}

fn new_feed_from(url: &str, body: &[u8]) -> Option<NewFeed> {
    let meta = feed_meta(url, body).ok()?;
    Some(NewFeed {
        url: url.to_string(),
        title: meta.title.unwrap_or_else(|| "Untitled Feed".to_string()),
        website: meta.website,
        description: meta.description,
        language: meta.language,
    })
}

/// Search HTML for RSS/Atom feed links
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    use std::sync::OnceLock;
    use regex::Regex;

    static REL_FIRST: OnceLock<Regex> = OnceLock::new();
    static TYPE_FIRST: OnceLock<Regex> = OnceLock::new();

    // <link rel="alternate" type="application/rss+xml" href="...">
    let rel_first = REL_FIRST.get_or_init(|| {
        Regex::new(
            r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom|feed)\+(xml|json)["'][^>]*href=["']([^"']+)["']"#,
        )
        .expect("valid feed link regex")
    });
    // Same, with type before rel
    let type_first = TYPE_FIRST.get_or_init(|| {
        Regex::new(
            r#"<link[^>]*type=["']application/(rss|atom|feed)\+(xml|json)["'][^>]*href=["']([^"']+)["']"#,
        )
        .expect("valid feed link regex")
    });

    let href = rel_first
        .captures(html)
        .or_else(|| type_first.captures(html))
        .and_then(|cap| cap.get(3))
        .map(|m| m.as_str().to_string())?;

    resolve_url(&href, base_url)
}

/// Resolve a potentially relative URL against a base URL.
/// Only http(s) results are returned.
pub fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let resolved = match url::Url::parse(href) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            url::Url::parse(base_url).ok()?.join(href).ok()?
        }
        Err(_) => return None,
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
