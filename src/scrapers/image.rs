//! Best-effort lookup of a representative image for an article.

use super::WebClient;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

static OG_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[name="og:image"]"#).expect("valid selector")
});
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("valid selector"));

/// Open Graph image first, then the first inline `<img>`, resolved
/// against the page URL. Inline `data:` images are skipped.
pub fn find_image(html: &str, page_url: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let resolve = |raw: &str| -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") {
            return None;
        }
        page_url
            .join(raw)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .map(|u| u.to_string())
    };

    document
        .select(&OG_IMAGE)
        .filter_map(|m| m.value().attr("content"))
        .find_map(resolve)
        .or_else(|| {
            document
                .select(&IMG)
                .filter_map(|img| img.value().attr("src"))
                .find_map(resolve)
        })
}

/// Fetches the article page again and looks for an image. Never fails:
/// every error, and running past the timeout, reads as "no image".
pub struct ImageResolver {
    web: Arc<dyn WebClient>,
    timeout: Duration,
}

impl ImageResolver {
    pub fn new(web: Arc<dyn WebClient>, timeout: Duration) -> Self {
        ImageResolver { web, timeout }
    }

    #[instrument(level = "info", skip(self), fields(%url))]
    pub async fn resolve(&self, url: &str) -> Option<String> {
        let page_url = Url::parse(url).ok()?;
        let html = match tokio::time::timeout(self.timeout, self.web.get_html(url)).await {
            Ok(Ok(html)) => html,
            Ok(Err(e)) => {
                warn!(error = %e, stage = "image", "Image lookup fetch failed");
                return None;
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, stage = "image", "Image lookup timed out");
                return None;
            }
        };
        let image = find_image(&html, &page_url);
        debug!(image = ?image, "Resolved article image");
        image
    }
}
