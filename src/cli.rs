//! Command-line interface definitions for the news desk.
//!
//! Every option can also be supplied through the environment (a `.env`
//! file in the working directory is loaded first). Credentials and chat
//! identifiers are required; the rest has defaults.

use clap::Parser;
use std::fmt;

/// Command-line arguments for the news desk.
///
/// # Examples
///
/// ```sh
/// # Everything from the environment / .env
/// crypto_news_desk
///
/// # Poll every 10 minutes with a custom site and keyword list
/// crypto_news_desk --poll-interval-minutes 10 --config ./desk.yaml
/// ```
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Gemini API key used for summaries
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    pub gemini_model: String,

    /// Numeric id of the chat where drafts are posted for review
    /// (group ids are negative, e.g. -1001234567890)
    #[arg(long, env = "MODERATION_CHAT_ID", allow_hyphen_values = true)]
    pub moderation_chat_id: String,

    /// Channel that receives published posts (`@name` or numeric id)
    #[arg(long, env = "CHANNEL_ID", allow_hyphen_values = true)]
    pub channel_id: String,

    /// Minutes to sleep between poll cycles
    #[arg(long, env = "POLL_INTERVAL_MINUTES", default_value_t = 30)]
    pub poll_interval_minutes: u64,

    /// Optional path to a YAML file with sites, keywords and tuning
    #[arg(short, long, env = "DESK_CONFIG")]
    pub config: Option<String>,
}

impl fmt::Debug for Cli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cli")
            .field("bot_token", &"<redacted>")
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field("moderation_chat_id", &self.moderation_chat_id)
            .field("channel_id", &self.channel_id)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("config", &self.config)
            .finish()
    }
}
