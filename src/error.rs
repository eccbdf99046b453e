//! Error types for every stage of the desk.
//!
//! Failures in the fetch, summarize and image stages are caught where they
//! happen and degrade the pipeline. Interaction handlers turn
//! [`ActionError`] into an acknowledgement shown to the moderator.

use thiserror::Error;

/// Why an article page could not be turned into an [`ArticleRecord`](crate::models::ArticleRecord).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("could not extract article from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("unexpected error processing {url}: {reason}")]
    Unknown { url: String, reason: String },
}

impl FetchFailure {
    pub fn url(&self) -> &str {
        match self {
            FetchFailure::Network { url, .. }
            | FetchFailure::Parse { url, .. }
            | FetchFailure::Unknown { url, .. } => url,
        }
    }

    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Network { .. } => "network",
            FetchFailure::Parse { .. } => "parse",
            FetchFailure::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("model returned no text")]
    Empty,
}

/// An outbound messaging call that did not go through.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request rejected ({code}): {description}")]
    Rejected { code: i64, description: String },

    #[error("message not found")]
    MessageNotFound,

    #[error("message is not modified")]
    NotModified,

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no live post with id {0}")]
    UnknownPostId(String),

    #[error("post id {post_id} is bound to {existing}, refusing to rebind to {incoming}")]
    AmbiguousPostId {
        post_id: String,
        existing: String,
        incoming: String,
    },
}

/// Failure of a moderator action. Always reported back through a callback
/// acknowledgement; never propagated past the handler.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("article is no longer available: {0}")]
    ArticleUnavailable(#[from] FetchFailure),

    #[error("summarization unavailable")]
    SummaryUnavailable,

    #[error("send failed: {0}")]
    Publish(#[from] PublishError),

    #[error("unrecognised callback data {0:?}")]
    BadCallback(String),

    #[error("caption has {chars} characters, limit is {limit}")]
    CaptionTooLong { chars: usize, limit: usize },
}

impl ActionError {
    /// Text shown to the moderator in the callback alert.
    pub fn user_message(&self) -> String {
        match self {
            ActionError::Resolve(ResolveError::UnknownPostId(_)) => {
                "This post is no longer tracked.".to_string()
            }
            ActionError::Resolve(ResolveError::AmbiguousPostId { .. }) => {
                "This post id matches more than one article.".to_string()
            }
            ActionError::ArticleUnavailable(_) => "Could not reload the article.".to_string(),
            ActionError::SummaryUnavailable => {
                "Summarization failed. Please try again later.".to_string()
            }
            ActionError::Publish(_) => "Sending failed. Please try again.".to_string(),
            ActionError::BadCallback(_) => "Unknown action.".to_string(),
            ActionError::CaptionTooLong { chars, limit } => format!(
                "Too long for a photo caption ({chars}/{limit} characters). Please shorten it."
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
