//! Process-wide desk state shared by the poll cycle and the interaction
//! handlers.
//!
//! - a bounded LRU cache of [`ArticleRecord`]s keyed by URL
//! - an index of live moderation drafts keyed by [`PostId`]
//! - the seen-set of URLs already surfaced to moderators
//!
//! Every public method takes the lock once, does its work without
//! suspending, and releases it. No caller ever holds state across an
//! `.await`, so the poll task and handler tasks can interleave freely.

use crate::error::ResolveError;
use crate::models::{ArticleRecord, PostId, PostRecord};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long an untouched draft stays addressable by its buttons.
pub const DRAFT_TTL: Duration = Duration::from_secs(48 * 3600);

/// LRU map from URL to article. Recency is a monotonically increasing tick;
/// `order` maps tick to URL so the oldest entry is found in O(log n).
#[derive(Debug)]
struct ArticleCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (Arc<ArticleRecord>, u64)>,
    order: BTreeMap<u64, String>,
}

impl ArticleCache {
    fn new(capacity: usize) -> Self {
        ArticleCache {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, url: &str) -> Option<Arc<ArticleRecord>> {
        let tick = self.next_tick();
        let (record, last) = self.entries.get_mut(url)?;
        self.order.remove(last);
        *last = tick;
        self.order.insert(tick, url.to_string());
        Some(Arc::clone(record))
    }

    /// Insert or replace. Also returns the URL evicted to make room, if any;
    /// the new entry holds the newest tick so it is never the one evicted.
    fn put(&mut self, record: ArticleRecord) -> (Arc<ArticleRecord>, Option<String>) {
        let tick = self.next_tick();
        let url = record.url.clone();
        let record = Arc::new(record);
        if let Some((_, last)) = self.entries.remove(&url) {
            self.order.remove(&last);
        }
        self.entries.insert(url.clone(), (Arc::clone(&record), tick));
        self.order.insert(tick, url);

        let mut evicted = None;
        if self.entries.len() > self.capacity {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        (record, evicted)
    }

    fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug)]
struct StoreInner {
    articles: ArticleCache,
    posts: HashMap<PostId, PostRecord>,
    seen: HashSet<String>,
}

/// Counters for the `/status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub cached_articles: usize,
    pub seen_urls: usize,
    pub live_posts: usize,
}

#[derive(Debug)]
pub struct NewsStore {
    inner: Mutex<StoreInner>,
}

impl NewsStore {
    pub fn new(cache_capacity: usize) -> Self {
        NewsStore {
            inner: Mutex::new(StoreInner {
                articles: ArticleCache::new(cache_capacity),
                posts: HashMap::new(),
                seen: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // every method mutates in one step, so a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn article(&self, url: &str) -> Option<Arc<ArticleRecord>> {
        self.lock().articles.get(url)
    }

    /// Store a record, replacing any previous one for the same URL.
    pub fn put_article(&self, record: ArticleRecord) -> Arc<ArticleRecord> {
        let (stored, evicted) = self.lock().articles.put(record);
        if let Some(evicted) = evicted {
            debug!(%evicted, "Evicted least recently used article");
        }
        stored
    }

    pub fn has_article(&self, url: &str) -> bool {
        self.lock().articles.contains(url)
    }

    pub fn is_seen(&self, url: &str) -> bool {
        self.lock().seen.contains(url)
    }

    /// Returns `false` if the URL was already seen.
    pub fn mark_seen(&self, url: &str) -> bool {
        self.lock().seen.insert(url.to_string())
    }

    /// Bind a live draft to its post id. Fails if the id already belongs
    /// to a different URL; re-registering the same URL replaces the record.
    pub fn register_post(&self, post_id: &PostId, post: PostRecord) -> Result<(), ResolveError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.posts.get(post_id) {
            if existing.url != post.url {
                return Err(ResolveError::AmbiguousPostId {
                    post_id: post_id.to_string(),
                    existing: existing.url.clone(),
                    incoming: post.url,
                });
            }
        }
        inner.posts.insert(post_id.clone(), post);
        Ok(())
    }

    pub fn post(&self, post_id: &PostId) -> Result<PostRecord, ResolveError> {
        self.lock()
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownPostId(post_id.to_string()))
    }

    /// O(1) reverse lookup from a post id to its article URL.
    pub fn resolve_url(&self, post_id: &PostId) -> Result<String, ResolveError> {
        self.post(post_id).map(|p| p.url)
    }

    /// Replace the rendered body of a live draft.
    pub fn update_post_body(&self, post_id: &PostId, body: &str) -> Result<(), ResolveError> {
        let mut inner = self.lock();
        let post = inner
            .posts
            .get_mut(post_id)
            .ok_or_else(|| ResolveError::UnknownPostId(post_id.to_string()))?;
        post.body = body.to_string();
        Ok(())
    }

    pub fn forget_post(&self, post_id: &PostId) -> Option<PostRecord> {
        self.lock().posts.remove(post_id)
    }

    /// Drop index entries for drafts posted more than [`DRAFT_TTL`] before
    /// `now`. Their buttons then answer "no longer tracked". Returns how
    /// many were dropped.
    pub fn expire_posts(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let before = inner.posts.len();
        inner
            .posts
            .retain(|_, p| now.saturating_duration_since(p.posted_at) <= DRAFT_TTL);
        let expired = before - inner.posts.len();
        if expired > 0 {
            info!(expired, live = inner.posts.len(), "Expired stale drafts from the post index");
        }
        expired
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        StoreStats {
            cached_articles: inner.articles.len(),
            seen_urls: inner.seen.len(),
            live_posts: inner.posts.len(),
        }
    }
}
