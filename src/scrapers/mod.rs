//! Page downloading and HTML extraction for news sites.
//!
//! Every network read goes through the [`WebClient`] seam so the pipeline
//! can be exercised against canned pages. The submodules are pure
//! functions over downloaded HTML plus a thin async wrapper each:
//!
//! | Module | Job |
//! |--------|-----|
//! | [`listing`] | Discover candidate article URLs on a site (HTML landing page or RSS/Atom feed) |
//! | [`page`] | Extract title, text, keywords, extractive summary, publish time and related links |
//! | [`image`] | Find a representative image (Open Graph first, then the first `<img>`) |

pub mod image;
pub mod listing;
pub mod page;

use crate::error::FetchFailure;
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Downloads a page as text.
#[async_trait]
pub trait WebClient: Send + Sync {
    async fn get_html(&self, url: &str) -> Result<String, FetchFailure>;
}

/// [`WebClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(HttpClient { client })
    }
}

#[async_trait]
impl WebClient for HttpClient {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn get_html(&self, url: &str) -> Result<String, FetchFailure> {
        if let Err(e) = Url::parse(url) {
            return Err(FetchFailure::Unknown {
                url: url.to_string(),
                reason: format!("invalid url: {e}"),
            });
        }

        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| classify(url, e))?;
        let body = response.text().await.map_err(|e| classify(url, e))?;

        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Downloaded page"
        );
        Ok(body)
    }
}

fn classify(url: &str, e: reqwest::Error) -> FetchFailure {
    let url = url.to_string();
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_status() || e.is_body() {
        FetchFailure::Network {
            url,
            reason: e.to_string(),
        }
    } else if e.is_decode() {
        FetchFailure::Parse {
            url,
            reason: e.to_string(),
        }
    } else {
        warn!(%url, error = %e, "Unclassified HTTP error");
        FetchFailure::Unknown {
            url,
            reason: e.to_string(),
        }
    }
}

/// Host without a leading `www.`, for same-site comparisons.
pub(crate) fn bare_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.strip_prefix("www.").unwrap_or(h).to_ascii_lowercase())
}
