//! Article page extraction.
//!
//! [`parse_article`] turns a downloaded article page into a [`ParsedPage`]:
//! title, body text, frequency keywords, a short extractive summary, the
//! publish time (if the page states one) and primary-source links such as
//! tweet permalinks or report files.

use super::bare_host;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use url::Url;

const KEYWORD_COUNT: usize = 10;
const SUMMARY_SENTENCES: usize = 5;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:title"]"#));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static H1: Lazy<Selector> = Lazy::new(|| selector("h1"));
static ARTICLE_P: Lazy<Selector> = Lazy::new(|| selector("article p"));
static ANY_P: Lazy<Selector> = Lazy::new(|| selector("p"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static TIME_TAG: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static PUBLISHED_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="article:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        r#"meta[name="pubdate"]"#,
        r#"meta[name="date"]"#,
    ]
    .iter()
    .map(|css| selector(css))
    .collect()
});

/// Social post permalinks (`twitter.com|x.com/<user>/status/<id>`).
static STATUS_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(www\.|mobile\.)?(twitter\.com|x\.com)/[A-Za-z0-9_]+/status/\d+")
        .expect("valid status regex")
});

/// Report documents, e.g. `/files/q1-market-report.pdf`.
static REPORT_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/[^/?#]*reports?[^/?#]*\.pdf$").expect("valid report regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "against", "also", "among", "an", "and", "are",
        "because", "been", "before", "being", "below", "between", "both", "but", "could",
        "did", "does", "doing", "down", "during", "each", "even", "from", "further", "had",
        "has", "have", "having", "here", "into", "its", "itself", "just", "last", "like",
        "made", "make", "many", "more", "most", "much", "must", "next", "only", "other",
        "over", "said", "same", "says", "should", "since", "some", "still", "such", "than",
        "that", "their", "them", "then", "there", "these", "they", "this", "those", "through",
        "under", "until", "very", "was", "were", "what", "when", "where", "which", "while",
        "will", "with", "within", "would", "year", "years", "your",
    ]
    .into_iter()
    .collect()
});

/// Structured content pulled from one article page.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub title: String,
    pub text: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub published_at: Option<DateTime<FixedOffset>>,
    pub related_links: Vec<String>,
}

/// Extract everything the desk needs from an article page.
pub fn parse_article(html: &str, page_url: &Url, related_max: usize) -> ParsedPage {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let text = extract_text(&document);
    let keywords = extract_keywords(&text, KEYWORD_COUNT);
    let summary = extractive_summary(&title, &text, &keywords, SUMMARY_SENTENCES);

    ParsedPage {
        published_at: published_time(&document),
        related_links: related_links(&document, page_url, related_max),
        title,
        text,
        summary,
        keywords,
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().join(" ")
}

fn extract_title(document: &Html) -> String {
    document
        .select(&OG_TITLE)
        .filter_map(|m| m.value().attr("content"))
        .map(|c| c.split_whitespace().join(" "))
        .find(|c| !c.is_empty())
        .or_else(|| document.select(&TITLE).map(element_text).find(|t| !t.is_empty()))
        .or_else(|| document.select(&H1).map(element_text).find(|t| !t.is_empty()))
        .unwrap_or_default()
}

fn extract_text(document: &Html) -> String {
    let mut paragraphs: Vec<String> = document
        .select(&ARTICLE_P)
        .map(element_text)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        paragraphs = document
            .select(&ANY_P)
            .map(element_text)
            .filter(|p| !p.is_empty())
            .collect();
    }
    paragraphs.join("\n")
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// The `n` most frequent non-stopwords of at least four characters.
pub fn extract_keywords(text: &str, n: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for w in words(text) {
        if w.chars().count() >= 4 && !STOPWORDS.contains(w.as_str()) {
            *counts.entry(w).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .take(n)
        .map(|(w, _)| w)
        .collect()
}

/// Split on sentence terminators followed by whitespace (or end of text).
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary || c == '\n' {
            let s = current.trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            current.clear();
        }
    }
    let s = current.trim();
    if !s.is_empty() {
        sentences.push(s.to_string());
    }
    sentences
}

/// Pick the `n` best sentences, scored on keyword density and title
/// overlap with a small bonus for early position, and return them in
/// their original order.
pub fn extractive_summary(title: &str, text: &str, keywords: &[String], n: usize) -> String {
    let sentences: Vec<String> = split_sentences(text)
        .into_iter()
        .filter(|s| s.split_whitespace().count() >= 4)
        .collect();
    if sentences.len() <= n {
        return sentences.join(" ");
    }

    let title_words: HashSet<String> = words(title)
        .filter(|w| !STOPWORDS.contains(w.as_str()))
        .collect();
    let keyword_rank: HashMap<&str, usize> = keywords
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), keywords.len() - i))
        .collect();

    let total = sentences.len() as f64;
    sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let ws: Vec<String> = words(s).collect();
            let len = ws.len().max(1) as f64;
            let kw: usize = ws
                .iter()
                .filter_map(|w| keyword_rank.get(w.as_str()))
                .sum();
            let overlap = ws.iter().filter(|w| title_words.contains(*w)).count();
            let position = 1.0 - (i as f64 / total);
            let score = kw as f64 / len + 2.0 * overlap as f64 / len + 0.5 * position;
            (i, score)
        })
        .sorted_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .take(n)
        .map(|(i, _)| i)
        .sorted()
        .map(|i| sentences[i].as_str())
        .join(" ")
}

/// Publish time from meta tags, JSON-LD or a `<time>` element.
pub fn published_time(document: &Html) -> Option<DateTime<FixedOffset>> {
    let from_meta = PUBLISHED_META.iter().find_map(|sel| {
        document
            .select(sel)
            .filter_map(|m| m.value().attr("content"))
            .find_map(parse_timestamp)
    });
    from_meta
        .or_else(|| {
            document.select(&JSON_LD).find_map(|script| {
                let raw = script.text().collect::<String>();
                let json: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
                json_ld_date(&json)
            })
        })
        .or_else(|| {
            document
                .select(&TIME_TAG)
                .filter_map(|t| t.value().attr("datetime"))
                .find_map(parse_timestamp)
        })
}

fn json_ld_date(value: &serde_json::Value) -> Option<DateTime<FixedOffset>> {
    match value {
        serde_json::Value::Array(items) => items.iter().find_map(json_ld_date),
        serde_json::Value::Object(obj) => obj
            .get("datePublished")
            .and_then(|d| d.as_str())
            .and_then(parse_timestamp)
            .or_else(|| obj.get("@graph").and_then(json_ld_date)),
        _ => None,
    }
}

/// RFC 3339 first, then a bare `YYYY-MM-DDTHH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Tweet permalinks and report files linked from the page, deduplicated,
/// in page order, at most `max`.
pub fn related_links(document: &Html, page_url: &Url, max: usize) -> Vec<String> {
    let page_host = bare_host(page_url);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page_url.join(href.trim()).ok())
        .map(|mut u| {
            u.set_fragment(None);
            u
        })
        .filter(|u| bare_host(u) != page_host || REPORT_LINK.is_match(u.path()))
        .map(|u| u.to_string())
        .filter(|u| STATUS_LINK.is_match(u) || REPORT_LINK.is_match(u))
        .unique()
        .take(max)
        .collect()
}
