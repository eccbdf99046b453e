//! Candidate discovery: turn a site root into a short, ordered list of
//! article URLs.
//!
//! HTML mode scrapes the landing page's anchors and keeps same-site links
//! that look like articles and pass the site's include/exclude filter.
//! Feed mode reads item links from an RSS 2.0 or Atom document.

use super::{WebClient, bare_host};
use crate::config::{SiteConfig, SiteMode};
use crate::error::FetchFailure;
use itertools::Itertools;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

const SKIPPED_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".svg", ".pdf"];

/// Discover up to `cap` candidate article URLs for `site`, in page order.
#[instrument(level = "info", skip(web, site), fields(site = %site.url, mode = ?site.mode))]
pub async fn enumerate_site(
    web: &dyn WebClient,
    site: &SiteConfig,
    cap: usize,
) -> Result<Vec<String>, FetchFailure> {
    let base = Url::parse(&site.url).map_err(|e| FetchFailure::Unknown {
        url: site.url.clone(),
        reason: format!("invalid site url: {e}"),
    })?;

    let body = web.get_html(&site.url).await?;
    let urls = match site.mode {
        SiteMode::Html => listing_links(&body, &base, site, cap),
        SiteMode::Feed => feed_links(&body, cap).map_err(|e| FetchFailure::Parse {
            url: site.url.clone(),
            reason: format!("feed: {e}"),
        })?,
    };

    info!(count = urls.len(), "Indexed candidate article URLs");
    debug!(urls = ?urls, "Candidates");
    Ok(urls)
}

/// Article links from a landing page.
pub fn listing_links(html: &str, base: &Url, site: &SiteConfig, cap: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let site_host = bare_host(base);

    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .filter(|u| bare_host(u) == site_host)
        .map(|mut u| {
            u.set_fragment(None);
            u
        })
        .filter(looks_like_article)
        .map(|u| u.to_string())
        .filter(|u| passes_link_filter(u, &site.include, &site.exclude))
        .unique()
        .take(cap)
        .collect()
}

/// Heuristic for "this path is a story, not a section page".
fn looks_like_article(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    if SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    match path.split('/').filter(|s| !s.is_empty()).last() {
        None => false,
        Some(slug) => slug.contains('-') || slug.chars().any(|c| c.is_ascii_digit()),
    }
}

/// `include`: at least one term must appear (ignored when empty).
/// `exclude`: no term may appear.
pub fn passes_link_filter(url: &str, include: &[String], exclude: &[String]) -> bool {
    let included = include.is_empty() || include.iter().any(|t| url.contains(t.as_str()));
    let excluded = exclude.iter().any(|t| url.contains(t.as_str()));
    included && !excluded
}

/// Item links from an RSS 2.0 (`<item><link>`) or Atom (`<entry><link href>`) feed.
pub fn feed_links(xml: &str, cap: usize) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut links: Vec<String> = Vec::new();
    let mut in_item = false;
    let mut in_link = false;
    let mut text = String::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    in_item = true;
                    current = None;
                }
                b"link" if in_item => match atom_href(&e) {
                    Some(href) => {
                        current.get_or_insert(href);
                    }
                    None => {
                        in_link = true;
                        text.clear();
                    }
                },
                _ => {}
            },
            Event::Empty(e) => {
                if in_item && e.local_name().as_ref() == b"link" {
                    if let Some(href) = atom_href(&e) {
                        current.get_or_insert(href);
                    }
                }
            }
            Event::Text(t) if in_link => text.push_str(&String::from_utf8_lossy(&t)),
            Event::CData(c) if in_link => text.push_str(&String::from_utf8_lossy(&c)),
            Event::GeneralRef(r) if in_link => match &*r {
                b"amp" => text.push('&'),
                b"lt" => text.push('<'),
                b"gt" => text.push('>'),
                b"quot" => text.push('"'),
                b"apos" => text.push('\''),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"link" if in_link => {
                    in_link = false;
                    let link = text.trim().replace("&amp;", "&");
                    if !link.is_empty() {
                        current.get_or_insert(link);
                    }
                }
                b"item" | b"entry" => {
                    in_item = false;
                    if let Some(link) = current.take() {
                        if !links.contains(&link) {
                            links.push(link);
                        }
                    }
                    if links.len() >= cap {
                        break;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(links)
}

/// `href` of an Atom link, skipping non-alternate relations.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    if let Ok(Some(rel)) = e.try_get_attribute("rel") {
        if &rel.value[..] != b"alternate" {
            return None;
        }
    }
    let href = e.try_get_attribute("href").ok().flatten()?;
    let href = String::from_utf8_lossy(&href.value).replace("&amp;", "&");
    Some(href).filter(|h| !h.trim().is_empty())
}
