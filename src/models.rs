//! Data models shared by the poll cycle, the store and the controller.
//!
//! - [`ArticleRecord`]: one normalized article, keyed by its URL
//! - [`PostId`]: correlation token carried by a draft's action buttons
//! - [`PostRecord`]: what the desk knows about a live moderation draft
//! - [`Draft`]: a rendered outbound unit, before it is sent

use chrono::{DateTime, FixedOffset};
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Instant;

/// A fetched and normalized news article.
///
/// `url` is the identity key. A refresh replaces the whole record in the
/// store; fields are never patched in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub url: String,
    pub title: String,
    pub raw_text: String,
    /// Short extractive summary, used as fallback text when the model fails.
    pub summary_text: String,
    pub keywords: BTreeSet<String>,
    /// Primary-source links found on the page, in page order.
    pub related_links: Vec<String>,
    pub published_at: DateTime<FixedOffset>,
}

impl ArticleRecord {
    /// Extract the domain name (before .com/.org/etc) from the article URL.
    /// For example: "https://www.coindesk.com/markets/x" -> "coindesk"
    pub fn source_tag(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() >= 2 {
            Some(parts[parts.len() - 2].to_string())
        } else {
            None
        }
    }
}

/// Opaque correlation token derived from an article URL.
///
/// Deterministic for the lifetime of the process, and short enough to fit
/// inside Telegram's 64-byte callback data together with an action prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostId(String);

impl PostId {
    pub fn for_url(url: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        PostId(format!("{:016x}", hasher.finish()))
    }

    /// Rebuild a token received from callback data. Rejects anything that
    /// could not have come from [`PostId::for_url`].
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == 16 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(PostId(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live draft in the moderation chat.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub url: String,
    pub chat_id: String,
    pub message_id: i64,
    /// Currently rendered HTML body (caption for photo drafts).
    pub body: String,
    pub image_url: Option<String>,
    /// Whether the draft was sent as a photo, which decides caption vs text edits.
    pub is_photo: bool,
    /// When the draft was sent; untouched drafts are dropped from the index
    /// after [`NewsStore::expire_posts`](crate::store::NewsStore::expire_posts).
    pub posted_at: Instant,
}

/// A rendered unit ready to send: HTML body plus an optional image.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub post_id: PostId,
    pub url: String,
    pub body: String,
    pub image_url: Option<String>,
    /// True when the body was written by the model, false for the extractive fallback.
    pub summarized: bool,
}
