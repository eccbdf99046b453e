//! Summarizer adapter: one fixed prompt template around [`AskAsync`].
//!
//! A failed summary is never fatal. [`Summarizer::summarize`] returns `None`
//! and the caller falls back to the article's extractive summary.

use crate::api::AskAsync;
use crate::utils::{char_len, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Upper bound on article text embedded in the prompt.
const PROMPT_TEXT_CHARS: usize = 8_000;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^```[a-zA-Z]*\s*$").expect("valid fence regex"));

/// Any tag that Telegram's HTML mode would reject in a post body.
static FOREIGN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"</?([a-zA-Z][a-zA-Z0-9-]*)[^>]*>").expect("valid tag regex")
});

/// A bare `<`, `>` or `&`, or an entity that is already escaped.
static STRAY_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:[a-zA-Z]+|#[0-9]+|#[xX][0-9a-fA-F]+);|[<>&]").expect("valid markup regex")
});

const ALLOWED_TAGS: [&str; 4] = ["b", "i", "u", "a"];

pub struct Summarizer {
    ask: Arc<dyn AskAsync>,
    max_chars: usize,
}

impl Summarizer {
    pub fn new(ask: Arc<dyn AskAsync>, max_chars: usize) -> Self {
        Summarizer { ask, max_chars }
    }

    /// Ask the model for a post-ready HTML summary.
    #[instrument(level = "info", skip(self, text, related_links), fields(%url, related = related_links.len()))]
    pub async fn summarize(&self, text: &str, url: &str, related_links: &[String]) -> Option<String> {
        if text.trim().is_empty() {
            warn!(stage = "summarize", "Nothing to summarize");
            return None;
        }
        let prompt = build_prompt(text, url, related_links, self.max_chars);
        match self.ask.ask(&prompt).await {
            Ok(raw) => {
                let cleaned = clean_model_output(&raw);
                if cleaned.is_empty() {
                    warn!(stage = "summarize", raw = %truncate_for_log(&raw, 200), "Model output empty after cleanup");
                    return None;
                }
                let chars = char_len(&cleaned);
                if chars > self.max_chars {
                    warn!(chars, budget = self.max_chars, "Summary exceeds character budget");
                } else {
                    info!(chars, "Summary ready");
                }
                Some(cleaned)
            }
            Err(e) => {
                warn!(stage = "summarize", error = %e, "Summarization unavailable");
                None
            }
        }
    }
}

/// The single prompt sent for every article.
pub fn build_prompt(text: &str, url: &str, related_links: &[String], max_chars: usize) -> String {
    let body: String = text.chars().take(PROMPT_TEXT_CHARS).collect();
    let related = if related_links.is_empty() {
        "(none)".to_string()
    } else {
        related_links
            .iter()
            .map(|l| format!("- {l}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Summarize the following crypto news article as a short Telegram post.\n\
         Rules:\n\
         - Format only with these HTML tags: <b>bold</b>, <i>italic</i>, <u>underline</u>, <a href=\"URL\">link</a>. No other tags, no Markdown.\n\
         - Include one link. If a primary-source link is listed under \"Related links\", link to it; otherwise link to the source URL.\n\
         - Add a few emoji that fit the topic (coins, charts, regulators).\n\
         - Write in a neutral news voice. Never address the reader directly.\n\
         - End with one sentence on why this matters for the crypto market.\n\
         - Keep the whole post under {max_chars} characters.\n\
         \n\
         Source URL: {url}\n\
         Related links:\n{related}\n\
         \n\
         Article:\n{body}"
    )
}

/// Strip code fences and any tag outside the allowed set, and escape stray
/// `<`, `>` and `&` in the text between tags.
pub fn clean_model_output(raw: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(raw, "");
    let unfenced: &str = &unfenced;
    let mut out = String::with_capacity(unfenced.len());
    let mut last = 0;
    for caps in FOREIGN_TAG.captures_iter(unfenced) {
        let Some(tag) = caps.get(0) else { continue };
        out.push_str(&escape_stray_markup(&unfenced[last..tag.start()]));
        let name = caps[1].to_ascii_lowercase();
        if ALLOWED_TAGS.contains(&name.as_str()) {
            out.push_str(tag.as_str());
        }
        last = tag.end();
    }
    out.push_str(&escape_stray_markup(&unfenced[last..]));
    out.trim().to_string()
}

fn escape_stray_markup(text: &str) -> Cow<'_, str> {
    STRAY_MARKUP.replace_all(text, |caps: &regex::Captures<'_>| match &caps[0] {
        "<" => "&lt;".to_string(),
        ">" => "&gt;".to_string(),
        "&" => "&amp;".to_string(),
        entity => entity.to_string(),
    })
}
