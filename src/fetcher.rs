//! Cache-first article fetching.
//!
//! A cached record is returned as-is: no TTL, no second download. On a miss
//! the page is downloaded, parsed, normalized to the desk's UTC+2 offset
//! and written to the store before it is returned.

use crate::error::FetchFailure;
use crate::models::ArticleRecord;
use crate::scrapers::WebClient;
use crate::scrapers::page::parse_article;
use crate::store::NewsStore;
use crate::utils::{desk_offset, now_in_desk_tz};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use url::Url;

pub struct ArticleFetcher {
    web: Arc<dyn WebClient>,
    store: Arc<NewsStore>,
    related_links_max: usize,
}

impl ArticleFetcher {
    pub fn new(web: Arc<dyn WebClient>, store: Arc<NewsStore>, related_links_max: usize) -> Self {
        ArticleFetcher {
            web,
            store,
            related_links_max,
        }
    }

    #[instrument(level = "info", skip(self), fields(%url))]
    pub async fn fetch(&self, url: &str) -> Result<Arc<ArticleRecord>, FetchFailure> {
        if let Some(hit) = self.store.article(url) {
            debug!("Article cache hit");
            return Ok(hit);
        }
        let record = self.download(url).await?;
        Ok(self.store.put_article(record))
    }

    async fn download(&self, url: &str) -> Result<ArticleRecord, FetchFailure> {
        let page_url = Url::parse(url).map_err(|e| FetchFailure::Unknown {
            url: url.to_string(),
            reason: format!("invalid url: {e}"),
        })?;
        let html = self.web.get_html(url).await?;
        let page = parse_article(&html, &page_url, self.related_links_max);

        if page.title.is_empty() {
            return Err(FetchFailure::Parse {
                url: url.to_string(),
                reason: "no title found".to_string(),
            });
        }
        if page.text.is_empty() {
            return Err(FetchFailure::Parse {
                url: url.to_string(),
                reason: "no article text found".to_string(),
            });
        }

        let published_at = page
            .published_at
            .map(|t| t.with_timezone(&desk_offset()))
            .unwrap_or_else(now_in_desk_tz);
        let summary_text = if page.summary.is_empty() {
            page.text.chars().take(600).collect()
        } else {
            page.summary
        };

        info!(
            title = %page.title,
            chars = page.text.len(),
            keywords = page.keywords.len(),
            related = page.related_links.len(),
            "Parsed article"
        );

        Ok(ArticleRecord {
            url: url.to_string(),
            title: page.title,
            raw_text: page.text,
            summary_text,
            keywords: page.keywords.into_iter().collect(),
            related_links: page.related_links,
            published_at,
        })
    }
}
