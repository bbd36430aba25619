//! Cross-source deduplication.
//!
//! Two articles are the same story when any of these hold:
//! - identical fingerprint (normalized title + URL host/path + leading text),
//! - identical canonical URL (host without `www.` + path),
//! - title-token Jaccard similarity at or above the configured threshold.
//!
//! Within a story cluster the instance from the most credible source wins,
//! then the earliest `published_at`. [`dedup_batch`] sorts by that preference
//! before offering, so the surviving set does not depend on arrival order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use metrics::counter;
use sha2::{Digest, Sha256};

use crate::model::Article;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

const LEADING_CONTENT_CHARS: usize = 200;

/// Stable fingerprint of an ingested article.
pub fn fingerprint(article: &Article) -> &str {
    article.fingerprint()
}

/// Fingerprint from already-normalized parts.
pub fn fingerprint_parts(title: &str, url: &str, text: &str) -> String {
    let title = normalize_words(title);
    let url = canonical_url(url);
    let lead: String = normalize_words(text)
        .chars()
        .take(LEADING_CONTENT_CHARS)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(url.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(lead.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Lowercased host without `www.` plus path without trailing slash. Query and
/// fragment are dropped; unparseable input is returned lowercased.
pub fn canonical_url(url: &str) -> String {
    match url::Url::parse(url.trim()) {
        Ok(u) => {
            let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host);
            let path = u.path().trim_end_matches('/');
            format!("{host}{path}")
        }
        Err(_) => url.trim().to_ascii_lowercase(),
    }
}

/// Lowercase alphanumeric tokens of a title (single characters dropped).
pub fn title_tokens(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of two token sets. Two empty sets share no evidence → 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn normalize_words(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Precomputed comparison keys for one article.
#[derive(Debug, Clone)]
pub struct StoryKey {
    pub fingerprint: String,
    pub canonical_url: String,
    pub tokens: BTreeSet<String>,
}

impl StoryKey {
    pub fn of(article: &Article) -> Self {
        Self {
            fingerprint: article.fingerprint().to_string(),
            canonical_url: canonical_url(article.url()),
            tokens: title_tokens(article.title()),
        }
    }

    pub fn same_story(&self, other: &StoryKey, threshold: f64) -> bool {
        self.fingerprint == other.fingerprint
            || self.canonical_url == other.canonical_url
            || jaccard(&self.tokens, &other.tokens) >= threshold
    }
}

/// Ordering used for tie-breaks: `Less` means `a` should be kept over `b`.
pub fn prefer(a: &Article, b: &Article) -> Ordering {
    b.credibility_score()
        .total_cmp(&a.credibility_score())
        .then_with(|| a.published_at().cmp(&b.published_at()))
        .then_with(|| a.fingerprint().cmp(b.fingerprint()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Result of offering one article to the [`Deduplicator`].
#[derive(Debug)]
pub enum Offer {
    /// First of its story.
    Kept,
    /// Replaced a weaker copy, which is returned.
    Replaced(Box<Article>),
    /// A stronger copy is already kept; the offered article is returned.
    Dropped(Box<Article>),
}

#[derive(Debug)]
struct Slot {
    best: Article,
    key: StoryKey,
}

#[derive(Debug, Default)]
struct State {
    by_fingerprint: HashMap<String, usize>,
    by_url: HashMap<String, usize>,
    slots: Vec<Slot>,
}

/// In-run duplicate set. All mutation goes through one lock, so a check and
/// its insert are a single step.
#[derive(Debug)]
pub struct Deduplicator {
    threshold: f64,
    state: Mutex<State>,
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            state: Mutex::new(State::default()),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Exact-fingerprint membership.
    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        let g = self.state.lock().unwrap_or_else(|p| p.into_inner());
        g.by_fingerprint.contains_key(fingerprint)
    }

    pub fn offer(&self, article: Article) -> Offer {
        let key = StoryKey::of(&article);
        let mut g = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let existing = g
            .by_fingerprint
            .get(&key.fingerprint)
            .or_else(|| g.by_url.get(&key.canonical_url))
            .copied()
            .or_else(|| {
                g.slots
                    .iter()
                    .position(|s| jaccard(&s.key.tokens, &key.tokens) >= self.threshold)
            });

        let Some(idx) = existing else {
            let idx = g.slots.len();
            g.by_fingerprint.insert(key.fingerprint.clone(), idx);
            g.by_url.insert(key.canonical_url.clone(), idx);
            g.slots.push(Slot { best: article, key });
            return Offer::Kept;
        };

        g.by_fingerprint.entry(key.fingerprint.clone()).or_insert(idx);
        g.by_url.entry(key.canonical_url.clone()).or_insert(idx);

        let slot = &mut g.slots[idx];
        if prefer(&article, &slot.best) == Ordering::Less {
            let old = std::mem::replace(&mut slot.best, article);
            slot.key = key;
            Offer::Replaced(Box::new(old))
        } else {
            Offer::Dropped(Box::new(article))
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Surviving articles, one per story.
    pub fn into_survivors(self) -> Vec<Article> {
        self.state
            .into_inner()
            .unwrap_or_else(|p| p.into_inner())
            .slots
            .into_iter()
            .map(|s| s.best)
            .collect()
    }
}

#[derive(Debug)]
pub struct DedupOutcome {
    pub survivors: Vec<Article>,
    pub dropped: usize,
}

/// Deduplicate a whole run at once, independent of input order.
pub fn dedup_batch(mut articles: Vec<Article>, threshold: f64) -> DedupOutcome {
    articles.sort_by(prefer);
    let dedup = Deduplicator::new(threshold);
    let mut dropped = 0usize;
    for a in articles {
        match dedup.offer(a) {
            Offer::Kept => {}
            Offer::Replaced(_) | Offer::Dropped(_) => dropped += 1,
        }
    }
    counter!("news_dedup_dropped_total").increment(dropped as u64);
    DedupOutcome {
        survivors: dedup.into_survivors(),
        dropped,
    }
}
