//! Runtime settings: credentials from the CLI plus tunable data from YAML.
//!
//! Site lists, keyword lists and prompt limits are data, not code. Each one
//! has a default so the desk runs without a config file. Settings are
//! loaded once at startup and shared read-only afterwards.

use crate::cli::Cli;
use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// How candidate article URLs are discovered on a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteMode {
    /// Scrape anchors from the site's landing page.
    #[default]
    Html,
    /// Read item links from an RSS or Atom feed.
    Feed,
}

/// One polled news site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    #[serde(default)]
    pub mode: SiteMode,
    /// A link must contain at least one of these terms (when any are set).
    #[serde(default)]
    pub include: Vec<String>,
    /// A link must contain none of these terms.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Overrides [`DeskFile::articles_per_site`] for this site.
    #[serde(default)]
    pub max_articles: Option<usize>,
}

impl SiteConfig {
    pub fn new(url: &str) -> Self {
        SiteConfig {
            url: url.to_string(),
            mode: SiteMode::Html,
            include: Vec::new(),
            exclude: Vec::new(),
            max_articles: None,
        }
    }
}

/// Shape of the optional YAML config file. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeskFile {
    pub sites: Vec<SiteConfig>,
    pub keywords: Vec<String>,
    pub articles_per_site: usize,
    pub fetch_delay_secs: u64,
    pub publish_delay_secs: u64,
    pub summary_max_chars: usize,
    pub related_links_max: usize,
    pub cache_capacity: usize,
    pub edit_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub summarize_retries: usize,
    pub attribution: String,
}

impl Default for DeskFile {
    fn default() -> Self {
        DeskFile {
            sites: vec![SiteConfig::new("https://www.coindesk.com/")],
            keywords: default_keywords(),
            articles_per_site: 5,
            fetch_delay_secs: 1,
            publish_delay_secs: 3,
            summary_max_chars: 900,
            related_links_max: 5,
            cache_capacity: 500,
            edit_timeout_secs: 600,
            request_timeout_secs: 20,
            summarize_retries: 2,
            attribution: String::new(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    [
        "price",
        "market",
        "analysis",
        "regulation",
        "adoption",
        "investment",
        "blockchain",
        "DeFi",
        "NFT",
        "metaverse",
        "Bitcoin",
        "Ethereum",
        "USA",
        "Argentina",
        "Ton",
        "Telegram",
        "Gram",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Everything the desk needs at runtime.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// Numeric id of the moderation chat. Callbacks and messages from any
    /// other chat are refused.
    pub moderation_chat_id: i64,
    pub channel_id: String,
    pub poll_interval: Duration,
    pub sites: Vec<SiteConfig>,
    pub keywords: Vec<String>,
    pub articles_per_site: usize,
    pub fetch_delay: Duration,
    pub publish_delay: Duration,
    pub summary_max_chars: usize,
    pub related_links_max: usize,
    pub cache_capacity: usize,
    pub edit_timeout: Duration,
    pub request_timeout: Duration,
    pub summarize_retries: usize,
    /// HTML appended to every broadcast post.
    pub attribution: String,
}

impl Settings {
    /// Combine CLI arguments with the (optional) YAML file and validate.
    #[instrument(level = "info", skip_all, fields(config = ?cli.config))]
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let file = parse_desk_file(&raw).map_err(|source| ConfigError::Yaml {
                    path: path.clone(),
                    source,
                })?;
                info!(path = %path, sites = file.sites.len(), "Loaded desk config file");
                file
            }
            None => DeskFile::default(),
        };
        Self::from_parts(cli, file)
    }

    pub fn from_parts(cli: &Cli, file: DeskFile) -> Result<Self, ConfigError> {
        let moderation_chat_id = parse_chat_id(&cli.moderation_chat_id)?;
        let settings = Settings {
            bot_token: cli.bot_token.clone(),
            gemini_api_key: cli.gemini_api_key.clone(),
            gemini_model: cli.gemini_model.clone(),
            moderation_chat_id,
            channel_id: cli.channel_id.clone(),
            poll_interval: Duration::from_secs(cli.poll_interval_minutes.saturating_mul(60)),
            sites: file.sites,
            keywords: file.keywords,
            articles_per_site: file.articles_per_site,
            fetch_delay: Duration::from_secs(file.fetch_delay_secs),
            publish_delay: Duration::from_secs(file.publish_delay_secs),
            summary_max_chars: file.summary_max_chars,
            related_links_max: file.related_links_max,
            cache_capacity: file.cache_capacity,
            edit_timeout: Duration::from_secs(file.edit_timeout_secs),
            request_timeout: Duration::from_secs(file.request_timeout_secs),
            summarize_retries: file.summarize_retries,
            attribution: file.attribution,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("bot token", &self.bot_token),
            ("Gemini API key", &self.gemini_api_key),
            ("channel id", &self.channel_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} is empty")));
            }
        }
        if self.sites.is_empty() {
            return Err(ConfigError::Invalid("no sites configured".to_string()));
        }
        for site in &self.sites {
            Url::parse(&site.url)
                .map_err(|e| ConfigError::Invalid(format!("site url {:?}: {e}", site.url)))?;
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("no relevance keywords configured".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be positive".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Candidate cap for one site.
    pub fn cap_for(&self, site: &SiteConfig) -> usize {
        site.max_articles.unwrap_or(self.articles_per_site)
    }
}

/// The moderation chat must be addressed by its numeric id so incoming
/// updates, which carry only numeric ids, can be matched against it.
fn parse_chat_id(raw: &str) -> Result<i64, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::Invalid("moderation chat id is empty".to_string()));
    }
    raw.parse().map_err(|_| {
        ConfigError::Invalid(format!(
            "moderation chat id {raw:?} is not numeric (use the chat's id, e.g. -1001234567890)"
        ))
    })
}

pub fn parse_desk_file(raw: &str) -> Result<DeskFile, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(DeskFile::default());
    }
    serde_yaml::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli() -> Cli {
        Cli::parse_from([
            "crypto_news_desk",
            "--bot-token",
            "t",
            "--gemini-api-key",
            "k",
            "--moderation-chat-id",
            "-100",
            "--channel-id",
            "@chan",
            "--poll-interval-minutes",
            "15",
        ])
    }

    #[test]
    fn test_defaults_without_file() {
        let s = Settings::from_parts(&cli(), DeskFile::default()).unwrap();
        assert_eq!(s.poll_interval, Duration::from_secs(900));
        assert_eq!(s.sites.len(), 1);
        assert_eq!(s.articles_per_site, 5);
        assert!(s.keywords.iter().any(|k| k == "Bitcoin"));
    }

    #[test]
    fn test_parse_yaml_file() {
        let yaml = r#"
sites:
  - url: https://cointelegraph.com/
    include: [news, markets, technology]
    exclude: [/category/]
  - url: https://decrypt.co/feed
    mode: feed
    max_articles: 3
keywords: [bitcoin, toncoin]
publish_delay_secs: 0
attribution: '<a href="https://t.me/desk">Desk</a>'
"#;
        let file = parse_desk_file(yaml).unwrap();
        assert_eq!(file.sites.len(), 2);
        assert_eq!(file.sites[0].mode, SiteMode::Html);
        assert_eq!(file.sites[0].exclude, vec!["/category/".to_string()]);
        assert_eq!(file.sites[1].mode, SiteMode::Feed);
        assert_eq!(file.keywords, vec!["bitcoin", "toncoin"]);
        // untouched fields keep their defaults
        assert_eq!(file.cache_capacity, 500);

        let s = Settings::from_parts(&cli(), file).unwrap();
        assert_eq!(s.cap_for(&s.sites[0]), 5);
        assert_eq!(s.cap_for(&s.sites[1]), 3);
        assert!(s.publish_delay.is_zero());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = parse_desk_file("  \n").unwrap();
        assert_eq!(file.articles_per_site, 5);
    }

    #[test]
    fn test_moderation_chat_id_is_numeric() {
        let s = Settings::from_parts(&cli(), DeskFile::default()).unwrap();
        assert_eq!(s.moderation_chat_id, -100);

        for bad in ["@desk_mods", "", "  "] {
            let mut args = cli();
            args.moderation_chat_id = bad.to_string();
            assert!(
                matches!(
                    Settings::from_parts(&args, DeskFile::default()),
                    Err(ConfigError::Invalid(_))
                ),
                "{bad:?} should be refused"
            );
        }

        let mut args = cli();
        args.moderation_chat_id = " -1001234567890 ".to_string();
        let s = Settings::from_parts(&args, DeskFile::default()).unwrap();
        assert_eq!(s.moderation_chat_id, -1001234567890);
    }

    #[test]
    fn test_rejects_bad_site_url() {
        let file = DeskFile {
            sites: vec![SiteConfig::new("not a url")],
            ..DeskFile::default()
        };
        assert!(matches!(
            Settings::from_parts(&cli(), file),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_empty_keywords_and_zero_capacity() {
        let file = DeskFile {
            keywords: vec![],
            ..DeskFile::default()
        };
        assert!(Settings::from_parts(&cli(), file).is_err());

        let file = DeskFile {
            cache_capacity: 0,
            ..DeskFile::default()
        };
        assert!(Settings::from_parts(&cli(), file).is_err());
    }
}
