//! Entry and track deduplication.
//!
//! Entries are matched by `origin_id` first, then by content fingerprint, and
//! last by their URL within the feed.
//! Provider media is identified by `(provider, identifier)`; the repository
//! enforces that with upserts, so only entry planning happens here.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{EntryCandidate, EntryKey, Provider, TrackCandidate};

/// Stable content hash of an entry. The crawl time never takes part in it.
pub fn fingerprint(title: Option<&str>, url: &str, published: Option<DateTime<Utc>>) -> String {
    let title = title
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .unwrap_or_default();
    let url = normalize_url(url);
    let published = published
        .map(|p| p.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(published.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Insert,
    Update(Uuid),
    Skip,
}

#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub decision: EntryDecision,
    pub candidate: EntryCandidate,
}

#[derive(Debug, Default)]
pub struct EntryPlan {
    /// Inserts and updates, in ascending publish order.
    pub writes: Vec<PlannedEntry>,
    pub skipped: usize,
}

impl EntryPlan {
    pub fn inserts(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| w.decision == EntryDecision::Insert)
            .count()
    }

    pub fn updates(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| matches!(w.decision, EntryDecision::Update(_)))
            .count()
    }
}

/// Decides insert, update or skip for every candidate against what is stored.
pub fn plan_entries(candidates: Vec<EntryCandidate>, existing: &[EntryKey]) -> EntryPlan {
    let by_origin: HashMap<&str, &EntryKey> = existing
        .iter()
        .filter_map(|k| k.origin_id.as_deref().map(|o| (o, k)))
        .collect();
    let stored_fingerprints: HashSet<&str> =
        existing.iter().map(|k| k.fingerprint.as_str()).collect();
    // Only rows whose id vanished from the document can be matched by URL;
    // items that share a link but keep their own ids stay distinct.
    let document_origins: HashSet<String> = candidates
        .iter()
        .filter_map(|c| c.entry.origin_id.clone())
        .collect();
    let by_url: HashMap<String, &EntryKey> = existing
        .iter()
        .filter(|k| {
            k.origin_id
                .as_ref()
                .map_or(true, |origin| !document_origins.contains(origin))
        })
        .map(|k| (normalize_url(&k.url), k))
        .collect();

    let mut seen = Seen::default();
    let mut plan = EntryPlan::default();

    for candidate in candidates {
        let decision = decide(
            &candidate,
            &by_origin,
            &stored_fingerprints,
            &by_url,
            &mut seen,
        );
        match decision {
            EntryDecision::Skip => plan.skipped += 1,
            _ => plan.writes.push(PlannedEntry {
                decision,
                candidate,
            }),
        }
    }

    // Stable, so items without a publish time keep document order at the front.
    plan.writes.sort_by_key(|w| w.candidate.entry.published);
    plan
}

/// What earlier candidates of the same document already claimed.
#[derive(Default)]
struct Seen {
    origins: HashSet<String>,
    fingerprints: HashSet<String>,
    matched_by_url: HashSet<Uuid>,
}

fn decide(
    candidate: &EntryCandidate,
    by_origin: &HashMap<&str, &EntryKey>,
    stored_fingerprints: &HashSet<&str>,
    by_url: &HashMap<String, &EntryKey>,
    seen: &mut Seen,
) -> EntryDecision {
    let entry = &candidate.entry;
    let fresh_fingerprint = seen.fingerprints.insert(entry.fingerprint.clone());

    if let Some(origin) = entry.origin_id.as_deref() {
        if !seen.origins.insert(origin.to_string()) {
            return EntryDecision::Skip;
        }
        if let Some(key) = by_origin.get(origin) {
            return if key.fingerprint == entry.fingerprint {
                EntryDecision::Skip
            } else {
                EntryDecision::Update(key.id)
            };
        }
    }

    if !fresh_fingerprint || stored_fingerprints.contains(entry.fingerprint.as_str()) {
        return EntryDecision::Skip;
    }

    // Feeds without stable ids derive one from the title, so an edited
    // title looks like a new item. The URL still names the stored one.
    match by_url.get(&normalize_url(&entry.url)) {
        Some(key) if seen.matched_by_url.insert(key.id) => EntryDecision::Update(key.id),
        _ => EntryDecision::Insert,
    }
}

/// Counts distinct tracks in `candidates` not already linked to the playlist.
pub fn count_new_tracks(
    candidates: &[TrackCandidate],
    linked: &HashSet<(Provider, String)>,
) -> usize {
    candidates
        .iter()
        .map(|c| (c.track.provider, c.track.identifier.clone()))
        .filter(|key| !linked.contains(key))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryRecord, TrackRecord};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn candidate(origin: Option<&str>, title: &str, published: Option<DateTime<Utc>>) -> EntryCandidate {
        let url = format!("https://blog.example.com/{}", title.replace(' ', "-"));
        EntryCandidate {
            entry: EntryRecord {
                fingerprint: fingerprint(Some(title), &url, published),
                url,
                title: Some(title.to_string()),
                summary: None,
                content: None,
                author: None,
                visual_url: None,
                locale: None,
                published,
                updated: None,
                alternate: Vec::new(),
                enclosure: Vec::new(),
                keywords: Vec::new(),
                origin_id: origin.map(str::to_string),
            },
            references: Vec::new(),
        }
    }

    fn key_for(c: &EntryCandidate) -> EntryKey {
        EntryKey {
            id: Uuid::new_v4(),
            url: c.entry.url.clone(),
            origin_id: c.entry.origin_id.clone(),
            fingerprint: c.entry.fingerprint.clone(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_case_whitespace_and_fragment() {
        let a = fingerprint(Some("New  Single\tOut"), "https://x.com/post#top", Some(at(1)));
        let b = fingerprint(Some("new single out"), "https://x.com/post", Some(at(1)));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_publish_time() {
        let a = fingerprint(Some("t"), "https://x.com/p", Some(at(1)));
        let b = fingerprint(Some("t"), "https://x.com/p", Some(at(2)));
        let c = fingerprint(Some("t"), "https://x.com/p", None);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_same_origin_same_content_is_skipped() {
        let first = candidate(Some("urn:1"), "hello", Some(at(1)));
        let existing = vec![key_for(&first)];
        let plan = plan_entries(vec![first], &existing);
        assert!(plan.writes.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_same_origin_changed_content_is_updated() {
        let stored = candidate(Some("urn:1"), "hello", Some(at(1)));
        let existing = vec![key_for(&stored)];
        let edited = candidate(Some("urn:1"), "hello again", Some(at(1)));

        let plan = plan_entries(vec![edited], &existing);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].decision, EntryDecision::Update(existing[0].id));
    }

    #[test]
    fn test_fingerprint_match_without_origin_is_skipped() {
        let stored = candidate(None, "hello", Some(at(1)));
        let existing = vec![key_for(&stored)];
        let plan = plan_entries(vec![candidate(Some("urn:new"), "hello", Some(at(1)))], &existing);
        assert_eq!(plan.skipped, 1);
    }

    fn at_url(mut c: EntryCandidate, url: &str) -> EntryCandidate {
        c.entry.url = url.to_string();
        c.entry.fingerprint = fingerprint(c.entry.title.as_deref(), url, c.entry.published);
        c
    }

    #[test]
    fn test_retitled_item_is_updated_through_its_url() {
        // The id is derived from link and title, so it changes with the title.
        let stored = at_url(candidate(Some("hash-a"), "hello", None), "https://blog.example.com/p/1");
        let existing = vec![key_for(&stored)];
        let edited = at_url(
            candidate(Some("hash-b"), "hello again", None),
            "https://blog.example.com/p/1#comments",
        );

        let plan = plan_entries(vec![edited], &existing);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].decision, EntryDecision::Update(existing[0].id));
        assert_eq!(plan.updates(), 1);
    }

    #[test]
    fn test_items_sharing_a_link_keep_their_own_ids() {
        let home = "https://podcast.example.com/";
        let old = at_url(candidate(Some("ep-1"), "episode one", Some(at(1))), home);
        let existing = vec![key_for(&old)];
        let new = at_url(candidate(Some("ep-2"), "episode two", Some(at(8))), home);

        let plan = plan_entries(vec![new, old], &existing);
        assert_eq!(plan.inserts(), 1);
        assert_eq!(plan.updates(), 0);
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_duplicate_origin_in_one_document_keeps_first() {
        let plan = plan_entries(
            vec![
                candidate(Some("urn:1"), "first", Some(at(2))),
                candidate(Some("urn:1"), "second", Some(at(3))),
            ],
            &[],
        );
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].candidate.entry.title.as_deref(), Some("first"));
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_writes_are_in_ascending_publish_order() {
        let plan = plan_entries(
            vec![
                candidate(Some("c"), "c", Some(at(3))),
                candidate(Some("a"), "a", Some(at(1))),
                candidate(Some("b"), "b", Some(at(2))),
            ],
            &[],
        );
        let order: Vec<_> = plan
            .writes
            .iter()
            .map(|w| w.candidate.entry.origin_id.clone().unwrap())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(plan.inserts(), 3);
        assert_eq!(plan.updates(), 0);
    }

    #[test]
    fn test_count_new_tracks_ignores_linked_and_repeats() {
        let track = |id: &str| TrackCandidate {
            track: TrackRecord::reference(Provider::YouTube, id, format!("https://www.youtube.com/watch/?v={id}")),
            artists: Vec::new(),
            album: None,
        };
        let linked: HashSet<_> = [(Provider::YouTube, "old".to_string())].into_iter().collect();
        let candidates = vec![track("old"), track("new"), track("new")];
        assert_eq!(count_new_tracks(&candidates, &linked), 1);
    }
}
