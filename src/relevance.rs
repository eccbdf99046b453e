//! Keyword relevance filter.
//!
//! An article is worth a moderator's time when any configured keyword
//! appears, case-insensitively, anywhere in its title or body. Plain
//! substring matching: no stemming, no tokenization.

use crate::models::ArticleRecord;

#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    /// Lowercased, blank entries removed. Surrounding spaces are kept so a
    /// padded keyword like `" ton "` only matches the whole word.
    keywords: Vec<String>,
}

impl RelevanceFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.as_ref().to_lowercase())
            .filter(|k| !k.trim().is_empty())
            .collect();
        RelevanceFilter { keywords }
    }

    /// `false` for a missing article or one with neither title nor text.
    pub fn is_valuable(&self, article: Option<&ArticleRecord>) -> bool {
        match article {
            Some(a) => self.matches(&a.title, &a.raw_text),
            None => false,
        }
    }

    pub fn matches(&self, title: &str, text: &str) -> bool {
        if title.trim().is_empty() && text.trim().is_empty() {
            return false;
        }
        let title = title.to_lowercase();
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .any(|k| title.contains(k.as_str()) || text.contains(k.as_str()))
    }

    /// The first keyword that made an article relevant, for logging.
    pub fn first_match(&self, title: &str, text: &str) -> Option<&str> {
        let title = title.to_lowercase();
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .find(|k| title.contains(k.as_str()) || text.contains(k.as_str()))
            .map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_in_desk_tz;
    use std::collections::BTreeSet;

    fn article(title: &str, text: &str) -> ArticleRecord {
        ArticleRecord {
            url: "https://example.com/a".to_string(),
            title: title.to_string(),
            raw_text: text.to_string(),
            summary_text: String::new(),
            keywords: BTreeSet::new(),
            related_links: vec![],
            published_at: now_in_desk_tz(),
        }
    }

    fn filter() -> RelevanceFilter {
        RelevanceFilter::new(&["Bitcoin", "DeFi", "regulation"])
    }

    #[test]
    fn test_none_is_not_valuable() {
        assert!(!filter().is_valuable(None));
    }

    #[test]
    fn test_empty_article_is_not_valuable() {
        assert!(!filter().is_valuable(Some(&article("", ""))));
    }

    #[test]
    fn test_title_match_is_case_insensitive() {
        assert!(filter().is_valuable(Some(&article("BITCOIN hits new high", ""))));
    }

    #[test]
    fn test_body_match() {
        assert!(filter().is_valuable(Some(&article(
            "Weekly roundup",
            "Lawmakers debate new Regulation for exchanges."
        ))));
    }

    #[test]
    fn test_substring_match_without_tokenization() {
        // "defi" inside "definitely" counts: pure substring semantics
        assert!(filter().is_valuable(Some(&article("Definitely not crypto", ""))));
    }

    #[test]
    fn test_no_keyword_no_value() {
        assert!(!filter().is_valuable(Some(&article(
            "Local bakery opens",
            "Fresh bread every morning."
        ))));
    }

    #[test]
    fn test_blank_keywords_ignored() {
        let f = RelevanceFilter::new(&["", "  "]);
        assert!(!f.is_valuable(Some(&article("anything", "at all"))));
    }

    #[test]
    fn test_padded_keyword_keeps_its_spaces() {
        let f = RelevanceFilter::new(&[" ton "]);
        assert!(f.is_valuable(Some(&article("The TON network grows", ""))));
        assert!(!f.is_valuable(Some(&article("Press the button", "Cotton prices"))));
    }

    #[test]
    fn test_first_match() {
        assert_eq!(filter().first_match("New DeFi rules", ""), Some("defi"));
        assert_eq!(filter().first_match("Nothing", "here"), None);
    }
}
