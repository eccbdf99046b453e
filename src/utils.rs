//! Utility functions for time normalization, HTML escaping and string handling.
//!
//! This module provides helper functions used throughout the application:
//! - The fixed UTC+2 offset every publish time is normalized to
//! - Escaping of scraped text before it is embedded in Telegram HTML
//! - Stripping the timestamp line from a draft before it is broadcast
//! - String truncation for logging and caption limits

use chrono::{DateTime, FixedOffset, Offset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix of the timestamp line rendered into every draft.
pub const TIMESTAMP_MARK: &str = "🕒";

/// Only the exact line [`timestamp_line`] renders; a model sentence that
/// happens to start with the clock emoji is left alone.
static TIMESTAMP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*🕒 <i>\d{2}\.\d{2}\.\d{4} \d{2}:\d{2}</i>[ \t]*(\n|$)")
        .expect("valid timestamp regex")
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

static HTML_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:[a-zA-Z]+|#[0-9]+|#[xX][0-9a-fA-F]+);").expect("valid entity regex")
});

/// The offset publish times are shown in (UTC+2).
pub fn desk_offset() -> FixedOffset {
    FixedOffset::east_opt(2 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Current time in the desk's offset.
pub fn now_in_desk_tz() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&desk_offset())
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// The timestamp line of a draft, e.g. `🕒 <i>06.05.2025 14:30</i>`.
pub fn timestamp_line(at: &DateTime<FixedOffset>) -> String {
    format!("{TIMESTAMP_MARK} <i>{}</i>", at.format("%d.%m.%Y %H:%M"))
}

/// Remove every rendered timestamp line from a draft body.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(strip_timestamps("a\n🕒 <i>06.05.2025 12:00</i>\nb"), "a\nb");
/// ```
pub fn strip_timestamps(body: &str) -> String {
    TIMESTAMP_LINE.replace_all(body, "").trim_end().to_string()
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a count
/// of the dropped bytes appended. Cuts on a character boundary.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Number of characters as Telegram counts message length limits.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Length of an HTML body as Telegram counts it after parsing: tags do not
/// count and each entity is one character.
pub fn visible_len(html: &str) -> usize {
    let text = HTML_TAG.replace_all(html, "");
    let text = HTML_ENTITY.replace_all(&text, "_");
    char_len(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let s = "🕒🕒🕒";
        assert_eq!(truncate_for_log(s, 1), "🕒…(+8 bytes)");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("BTC <> ETH & \"co\""), "BTC &lt;&gt; ETH &amp; &quot;co&quot;");
    }

    #[test]
    fn test_strip_timestamps() {
        let body = "<b>Title</b>\n\nSummary\n\n🕒 <i>06.05.2025 14:30</i>\n🔗 <a href=\"x\">Source</a>";
        assert_eq!(
            strip_timestamps(body),
            "<b>Title</b>\n\nSummary\n\n🔗 <a href=\"x\">Source</a>"
        );
    }

    #[test]
    fn test_strip_timestamps_trailing_line() {
        assert_eq!(strip_timestamps("Summary\n🕒 <i>06.05.2025 12:00</i>"), "Summary");
        assert_eq!(strip_timestamps("No stamp here"), "No stamp here");
    }

    #[test]
    fn test_strip_timestamps_keeps_model_clock_lines() {
        let body = "<b>Airdrop</b>\n🕒 Only 48 hours left to claim.\n\n🕒 <i>06.05.2025 12:00</i>\n🔗 src";
        assert_eq!(
            strip_timestamps(body),
            "<b>Airdrop</b>\n🕒 Only 48 hours left to claim.\n\n🔗 src"
        );
    }

    #[test]
    fn test_timestamp_line_is_stripped() {
        let at = DateTime::parse_from_rfc3339("2025-05-06T14:30:00+02:00").unwrap();
        let line = timestamp_line(&at);
        assert_eq!(line, "🕒 <i>06.05.2025 14:30</i>");
        assert_eq!(strip_timestamps(&format!("a\n{line}\nb")), "a\nb");
    }

    #[test]
    fn test_visible_len_ignores_markup() {
        assert_eq!(visible_len("<b>BTC</b> &lt; 1&amp;2"), 9);
        assert_eq!(visible_len("<a href=\"https://x.example\">link</a>"), 4);
        assert_eq!(visible_len("plain"), 5);
        // a bare ampersand is a character, not an entity
        assert_eq!(visible_len("S&P"), 3);
    }

    #[test]
    fn test_desk_offset_is_utc_plus_two() {
        assert_eq!(desk_offset().local_minus_utc(), 7200);
        assert_eq!(now_in_desk_tz().offset().local_minus_utc(), 7200);
    }
}
