//! # Crypto News Desk
//!
//! A long-running moderation pipeline for crypto news. It polls news sites
//! on a timer, keeps the stories that mention a configured keyword,
//! summarizes them with Gemini and posts each one as a draft to a Telegram
//! moderation chat. Moderators delete, regenerate, edit or publish drafts
//! to a broadcast channel with inline buttons.
//!
//! ## Usage
//!
//! ```sh
//! BOT_TOKEN=... GEMINI_API_KEY=... MODERATION_CHAT_ID=-100... CHANNEL_ID=@news \
//!     crypto_news_desk --config ./desk.yaml
//! ```
//!
//! ## Architecture
//!
//! Two tasks share one [`store::NewsStore`]:
//! 1. **Poll cycle** ([`poll`]): enumerate sites, fetch unseen articles
//!    (cache first), filter by keyword, summarize, resolve an image, post
//!    drafts, sleep
//! 2. **Listener** ([`listener`]): long-poll Telegram and run every
//!    callback or message through the [`controller`] in its own task

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod controller;
mod edit;
mod error;
mod fetcher;
mod listener;
mod models;
mod poll;
mod relevance;
mod scrapers;
mod store;
mod summarizer;
mod telegram;
#[cfg(test)]
mod testing;
mod utils;

use api::{GeminiClient, RetryAsk};
use cli::Cli;
use config::Settings;
use controller::Controller;
use fetcher::ArticleFetcher;
use poll::PollCycle;
use scrapers::image::ImageResolver;
use scrapers::{HttpClient, WebClient};
use store::NewsStore;
use summarizer::Summarizer;
use telegram::TelegramBot;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    if let Err(e) = dotenv::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }
    info!("crypto_news_desk starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let settings = match Settings::load(&args) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Invalid configuration; refusing to start");
            return Err(e.into());
        }
    };
    info!(
        sites = settings.sites.len(),
        keywords = settings.keywords.len(),
        poll_interval_secs = settings.poll_interval.as_secs(),
        model = %settings.gemini_model,
        "Configuration loaded"
    );

    // --- Collaborators ---
    let store = Arc::new(NewsStore::new(settings.cache_capacity));
    let web: Arc<dyn WebClient> = Arc::new(HttpClient::new(settings.request_timeout)?);
    let gemini = GeminiClient::new(
        &settings.gemini_api_key,
        &settings.gemini_model,
        settings.request_timeout.saturating_mul(3),
    )?;
    let ask = RetryAsk::new(gemini, settings.summarize_retries, Duration::from_secs(1));
    let summarizer = Arc::new(Summarizer::new(Arc::new(ask), settings.summary_max_chars));
    let fetcher = Arc::new(ArticleFetcher::new(
        Arc::clone(&web),
        Arc::clone(&store),
        settings.related_links_max,
    ));
    let bot = Arc::new(TelegramBot::new(
        &settings.bot_token,
        settings.request_timeout + Duration::from_secs(listener::LONG_POLL_SECS),
    )?);
    let controller = Arc::new(Controller::new(
        Arc::clone(&settings),
        Arc::clone(&store),
        Arc::clone(&fetcher),
        Arc::clone(&summarizer),
        Arc::clone(&bot) as Arc<dyn telegram::Messenger>,
    ));
    let images = ImageResolver::new(Arc::clone(&web), settings.request_timeout);

    let cycle = PollCycle::new(
        Arc::clone(&settings),
        web,
        store,
        fetcher,
        summarizer,
        images,
        Arc::clone(&controller),
    );
    let poller = tokio::spawn(cycle.run_forever());

    tokio::select! {
        _ = listener::run_listener(bot, controller) => {
            warn!("Listener stopped");
        }
        result = poller => {
            error!(?result, "Poll loop exited");
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!(error = %e, "Could not listen for shutdown signal"),
            }
        }
    }

    info!("crypto_news_desk stopped");
    Ok(())
}
