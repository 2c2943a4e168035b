use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MediaReference;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// A normalized feed item, ready to be written to `entries`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub visual_url: Option<String>,
    pub locale: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub fingerprint: String,
    pub alternate: Vec<Link>,
    pub enclosure: Vec<Enclosure>,
    pub keywords: Vec<String>,
    pub origin_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub entry: EntryRecord,
    pub references: Vec<MediaReference>,
}

/// The identity columns of an already stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryKey {
    pub id: Uuid,
    pub url: String,
    pub origin_id: Option<String>,
    pub fingerprint: String,
}
