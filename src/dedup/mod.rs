//! Fingerprint & similarity engine.
//!
//! Decides which candidate items are novel: first inside the batch being
//! processed, then against the fingerprints of content that already went out
//! in a delivered summary. A history duplicate needs *both* a near-identical
//! title and a near-identical body, or an exact hash hit.

mod fingerprint;
mod similarity;

use std::collections::HashMap;
use std::hash::Hash;

use crate::config::DedupConfig;
use crate::models::{ContentFingerprint, ContentItem, FingerprintKind, NewContentItem, NewFingerprint};

pub use fingerprint::{
    body_hash, content_hash, lead_paragraph, normalize_title, paragraph_hash, prefix_chars,
    COMPARE_BODY_CHARS, MIN_TITLE_CHARS,
};
pub use similarity::{ratio, ratio_at_least};

/// Anything the engine can judge.
pub trait Candidate {
    fn title(&self) -> &str;
    fn body(&self) -> &str;

    fn content_hash(&self) -> String {
        content_hash(self.title(), self.body())
    }
}

impl Candidate for NewContentItem {
    fn title(&self) -> &str {
        &self.title
    }
    fn body(&self) -> &str {
        &self.body
    }
}

impl Candidate for ContentItem {
    fn title(&self) -> &str {
        &self.title
    }
    fn body(&self) -> &str {
        &self.body
    }
    fn content_hash(&self) -> String {
        self.content_hash.clone()
    }
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Duplicate {
    SameTitleInBatch,
    SameBodyInBatch,
    HistoryHash {
        fingerprint_id: i64,
    },
    HistorySimilar {
        fingerprint_id: i64,
        title_ratio: f64,
        body_ratio: f64,
    },
}

impl Duplicate {
    pub fn describe(&self) -> String {
        match self {
            Duplicate::SameTitleInBatch => "duplicate title in batch".to_string(),
            Duplicate::SameBodyInBatch => "duplicate body in batch".to_string(),
            Duplicate::HistoryHash { fingerprint_id } => {
                format!("exact match of fingerprint #{}", fingerprint_id)
            }
            Duplicate::HistorySimilar {
                fingerprint_id,
                title_ratio,
                body_ratio,
            } => format!(
                "near duplicate of fingerprint #{} (title {:.2}, body {:.2})",
                fingerprint_id, title_ratio, body_ratio
            ),
        }
    }
}

/// Result of filtering: survivors in input order, plus what was dropped.
#[derive(Debug)]
pub struct Filtered<T> {
    pub kept: Vec<T>,
    pub dropped: Vec<(T, Duplicate)>,
}

impl<T> Default for Filtered<T> {
    fn default() -> Self {
        Self {
            kept: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

/// Fingerprints from the lookback window, indexed for lookups.
#[derive(Debug, Default)]
pub struct History {
    by_hash: HashMap<String, i64>,
    primaries: Vec<HistoryEntry>,
}

#[derive(Debug)]
struct HistoryEntry {
    id: i64,
    title: String,
    body_prefix: String,
}

impl History {
    pub fn new(fingerprints: Vec<ContentFingerprint>) -> Self {
        let mut history = History::default();
        for fp in fingerprints {
            history.by_hash.insert(fp.content_hash.clone(), fp.id);
            if fp.kind == FingerprintKind::Primary {
                history.primaries.push(HistoryEntry {
                    id: fp.id,
                    title: normalize_title(&fp.title_text),
                    body_prefix: fp.body_prefix,
                });
            }
        }
        history
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn lookback_days(&self) -> u32 {
        self.config.lookback_days
    }

    /// Within-batch dedup: identical titles first, then identical first
    /// 1000 body characters. In both passes the longer body wins.
    pub fn dedupe_batch<T: Candidate>(&self, items: Vec<T>) -> Filtered<T> {
        let by_title = dedupe_by_key(items, Duplicate::SameTitleInBatch, |item| {
            let title = normalize_title(item.title());
            (title.chars().count() >= MIN_TITLE_CHARS).then_some(title)
        });
        let by_body = dedupe_by_key(by_title.kept, Duplicate::SameBodyInBatch, |item| {
            Some(body_hash(item.body()))
        });

        let mut dropped = by_title.dropped;
        dropped.extend(by_body.dropped);
        Filtered {
            kept: by_body.kept,
            dropped,
        }
    }

    /// Compares one candidate against history.
    pub fn check_history<T: Candidate>(&self, item: &T, history: &History) -> Option<Duplicate> {
        if let Some(&fingerprint_id) = history.by_hash.get(&item.content_hash()) {
            return Some(Duplicate::HistoryHash { fingerprint_id });
        }
        if let Some(paragraph) = lead_paragraph(item.body()) {
            if let Some(&fingerprint_id) = history.by_hash.get(&paragraph_hash(&paragraph)) {
                return Some(Duplicate::HistoryHash { fingerprint_id });
            }
        }

        let title = normalize_title(item.title());
        if title.chars().count() < MIN_TITLE_CHARS {
            return None;
        }
        let body = prefix_chars(item.body().trim(), COMPARE_BODY_CHARS);

        for entry in &history.primaries {
            if entry.title.chars().count() < MIN_TITLE_CHARS {
                continue;
            }
            if !ratio_at_least(&title, &entry.title, self.config.title_threshold) {
                continue;
            }
            if !ratio_at_least(body, &entry.body_prefix, self.config.body_threshold) {
                continue;
            }
            return Some(Duplicate::HistorySimilar {
                fingerprint_id: entry.id,
                title_ratio: ratio(&title, &entry.title),
                body_ratio: ratio(body, &entry.body_prefix),
            });
        }
        None
    }

    /// Batch dedup followed by the history check.
    pub fn novel<T: Candidate>(&self, items: Vec<T>, history: &History) -> Filtered<T> {
        let batch = self.dedupe_batch(items);
        let mut out = Filtered {
            kept: Vec::with_capacity(batch.kept.len()),
            dropped: batch.dropped,
        };
        for item in batch.kept {
            match self.check_history(&item, history) {
                Some(dup) => out.dropped.push((item, dup)),
                None => out.kept.push(item),
            }
        }
        out
    }

    /// History rows to write once `item` has gone out in a delivered summary.
    pub fn fingerprints_for(&self, item: &ContentItem) -> Vec<NewFingerprint> {
        let mut fingerprints = vec![NewFingerprint {
            content_hash: item.content_hash.clone(),
            kind: FingerprintKind::Primary,
            title_text: item.title.clone(),
            body_prefix: prefix_chars(item.body.trim(), COMPARE_BODY_CHARS).to_string(),
            content_id: item.id,
        }];
        if let Some(paragraph) = lead_paragraph(&item.body) {
            fingerprints.push(NewFingerprint {
                content_hash: paragraph_hash(&paragraph),
                kind: FingerprintKind::Paragraph,
                title_text: item.title.clone(),
                body_prefix: paragraph,
                content_id: item.id,
            });
        }
        fingerprints
    }
}

/// Keeps one item per key, preferring the longer body. Items without a key
/// always survive. Survivors stay in first-seen order.
fn dedupe_by_key<T, K, F>(items: Vec<T>, reason: Duplicate, key_of: F) -> Filtered<T>
where
    T: Candidate,
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    let mut dropped = Vec::new();
    let mut index: HashMap<K, usize> = HashMap::new();

    for item in items {
        let Some(key) = key_of(&item) else {
            kept.push(item);
            continue;
        };
        match index.get(&key) {
            Some(&slot) => {
                if item.body().chars().count() > kept[slot].body().chars().count() {
                    let loser = std::mem::replace(&mut kept[slot], item);
                    dropped.push((loser, reason.clone()));
                } else {
                    dropped.push((item, reason.clone()));
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(item);
            }
        }
    }

    Filtered { kept, dropped }
}
