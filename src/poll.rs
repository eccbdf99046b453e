//! The poll cycle: scrape every site, filter, summarize, post drafts, sleep.
//!
//! ```text
//! Idle -> Scraping(site)... -> Filtering -> Summarizing <-> Publishing -> Sleeping -> Idle
//! ```
//!
//! Sites are visited in configured order and candidates in discovery
//! order. Any failure below the cycle (a dead site, a page that will not
//! parse, a model error, a missing image, a rejected send) is logged and
//! degrades to skipping or simplifying that one article.

use crate::config::Settings;
use crate::controller::Controller;
use crate::error::{ActionError, PublishError};
use crate::fetcher::ArticleFetcher;
use crate::models::ArticleRecord;
use crate::relevance::RelevanceFilter;
use crate::scrapers::WebClient;
use crate::scrapers::image::ImageResolver;
use crate::scrapers::listing::enumerate_site;
use crate::store::NewsStore;
use crate::summarizer::Summarizer;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Scraping { site: String },
    Filtering,
    Summarizing { url: String },
    Publishing { url: String },
    Sleeping,
}

/// Counters for one pass over all sites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub already_seen: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub valuable: usize,
    pub summarized: usize,
    pub published: usize,
    pub publish_failures: usize,
    pub site_failures: usize,
}

pub struct PollCycle {
    settings: Arc<Settings>,
    web: Arc<dyn WebClient>,
    store: Arc<NewsStore>,
    fetcher: Arc<ArticleFetcher>,
    filter: RelevanceFilter,
    summarizer: Arc<Summarizer>,
    images: ImageResolver,
    controller: Arc<Controller>,
    state: PollState,
}

impl PollCycle {
    pub fn new(
        settings: Arc<Settings>,
        web: Arc<dyn WebClient>,
        store: Arc<NewsStore>,
        fetcher: Arc<ArticleFetcher>,
        summarizer: Arc<Summarizer>,
        images: ImageResolver,
        controller: Arc<Controller>,
    ) -> Self {
        let filter = RelevanceFilter::new(&settings.keywords);
        PollCycle {
            settings,
            web,
            store,
            fetcher,
            filter,
            summarizer,
            images,
            controller,
            state: PollState::Idle,
        }
    }

    fn transition(&mut self, next: PollState) {
        debug!(from = ?self.state, to = ?next, "Poll state");
        self.state = next;
    }

    /// Loop forever. A panic inside a cycle is logged like any other
    /// failure and the loop still sleeps and starts over.
    pub async fn run_forever(mut self) {
        loop {
            match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                Ok(report) => debug!(?report, "Cycle finished"),
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(%reason, "Poll cycle panicked; continuing after sleep");
                }
            }
            self.transition(PollState::Sleeping);
            info!(interval_secs = self.settings.poll_interval.as_secs(), "Sleeping until next cycle");
            sleep(self.settings.poll_interval).await;
            self.transition(PollState::Idle);
        }
    }

    /// One pass: scrape every site, then filter, summarize and post.
    #[instrument(level = "info", skip_all)]
    pub async fn run_once(&mut self) -> CycleReport {
        let t0 = Instant::now();
        let mut report = CycleReport::default();
        self.store.expire_posts(t0);

        let fetched = self.scrape_all(&mut report).await;

        self.transition(PollState::Filtering);
        let valuable: Vec<Arc<ArticleRecord>> = fetched
            .into_iter()
            .filter(|record| {
                let keep = self.filter.is_valuable(Some(&**record));
                match self.filter.first_match(&record.title, &record.raw_text) {
                    Some(keyword) if keep => debug!(url = %record.url, %keyword, "Relevant"),
                    _ => debug!(url = %record.url, "Not relevant; dropped"),
                }
                keep
            })
            .collect();
        report.valuable = valuable.len();

        for (i, record) in valuable.iter().enumerate() {
            if i > 0 && !self.settings.publish_delay.is_zero() {
                sleep(self.settings.publish_delay).await;
            }
            self.summarize_and_post(record, &mut report).await;
        }

        info!(
            candidates = report.candidates,
            already_seen = report.already_seen,
            fetched = report.fetched,
            fetch_failures = report.fetch_failures,
            valuable = report.valuable,
            summarized = report.summarized,
            published = report.published,
            publish_failures = report.publish_failures,
            site_failures = report.site_failures,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Poll cycle complete"
        );
        report
    }

    /// Enumerate and fetch unseen candidates of every site, in order.
    async fn scrape_all(&mut self, report: &mut CycleReport) -> Vec<Arc<ArticleRecord>> {
        let mut queued = HashSet::new();
        let mut fetched = Vec::new();
        let sites = self.settings.sites.clone();

        for site in &sites {
            self.transition(PollState::Scraping {
                site: site.url.clone(),
            });
            let cap = self.settings.cap_for(site);
            let urls = match enumerate_site(self.web.as_ref(), site, cap).await {
                Ok(urls) => urls,
                Err(e) => {
                    warn!(site = %site.url, stage = "enumerate", kind = e.kind(), error = %e, "Site enumeration failed; skipping site");
                    report.site_failures += 1;
                    continue;
                }
            };
            report.candidates += urls.len();

            for url in urls {
                if self.store.is_seen(&url) {
                    report.already_seen += 1;
                    continue;
                }
                if !queued.insert(url.clone()) {
                    continue;
                }
                let cached = self.store.has_article(&url);
                match self.fetcher.fetch(&url).await {
                    Ok(record) => {
                        report.fetched += 1;
                        fetched.push(record);
                    }
                    Err(e) => {
                        warn!(url = %e.url(), stage = "fetch", kind = e.kind(), error = %e, "Article fetch failed");
                        report.fetch_failures += 1;
                    }
                }
                if !cached && !self.settings.fetch_delay.is_zero() {
                    sleep(self.settings.fetch_delay).await;
                }
            }
        }
        fetched
    }

    async fn summarize_and_post(&mut self, record: &ArticleRecord, report: &mut CycleReport) {
        self.transition(PollState::Summarizing {
            url: record.url.clone(),
        });
        let summary = self
            .summarizer
            .summarize(&record.raw_text, &record.url, &record.related_links)
            .await;
        if summary.is_some() {
            report.summarized += 1;
        } else {
            info!(url = %record.url, "Posting extractive summary instead");
        }
        let image = self.images.resolve(&record.url).await;

        self.transition(PollState::Publishing {
            url: record.url.clone(),
        });
        let draft = self.controller.render_draft(record, summary, image.clone());
        let mut posted = self.controller.post_draft(&draft).await;
        if draft.summarized
            && matches!(posted, Err(ActionError::Publish(PublishError::Rejected { .. })))
        {
            warn!(url = %record.url, stage = "publish", "Model summary rejected; posting extractive summary instead");
            let fallback = self.controller.render_draft(record, None, image);
            posted = self.controller.post_draft(&fallback).await;
        }
        match posted {
            Ok(_) => {
                self.store.mark_seen(&record.url);
                report.published += 1;
            }
            Err(e) => {
                warn!(url = %record.url, stage = "publish", error = %e, "Draft not posted");
                report.publish_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeskFile, SiteConfig};
    use crate::error::SummarizeError;
    use crate::testing::{
        FakeAsk, FakeWeb, MODERATION_CHAT, RecordingMessenger, article_html, settings,
    };
    use crate::utils::escape_html;
    use std::time::Duration;

    const SITE: &str = "https://news.example.com/";
    const ETF: &str = "https://news.example.com/markets/bitcoin-etf-inflows";
    const MINERS: &str = "https://news.example.com/markets/bitcoin-miners-rally";
    const BAKERY: &str = "https://news.example.com/life/bakery-wins-award";

    fn landing() -> String {
        format!(
            r#"<html><body>
            <a href="/markets/">Markets</a>
            <a href="{ETF}">ETF</a>
            <a href="{MINERS}">Miners</a>
            <a href="{BAKERY}">Bakery</a>
            </body></html>"#
        )
    }

    fn site_web() -> FakeWeb {
        FakeWeb::new()
            .with_page(SITE, &landing())
            .with_page(ETF, &article_html("Bitcoin ETF inflows hit record", "Spot bitcoin ETFs took in record sums."))
            .with_page(MINERS, &article_html("Bitcoin miners rally", "Shares of bitcoin miners rallied on Tuesday."))
            .with_page(BAKERY, &article_html("Local bakery wins award", "The bakery sold the best bread in town."))
    }

    fn desk_file(sites: Vec<SiteConfig>) -> DeskFile {
        DeskFile {
            sites,
            keywords: vec!["bitcoin".to_string()],
            fetch_delay_secs: 0,
            publish_delay_secs: 0,
            ..DeskFile::default()
        }
    }

    struct Harness {
        cycle: PollCycle,
        store: Arc<NewsStore>,
        ask: FakeAsk,
        messenger: RecordingMessenger,
    }

    fn harness(file: DeskFile, web: FakeWeb, image_web: FakeWeb, ask: FakeAsk) -> Harness {
        harness_with(file, web, image_web, ask, RecordingMessenger::new())
    }

    fn harness_with(
        file: DeskFile,
        web: FakeWeb,
        image_web: FakeWeb,
        ask: FakeAsk,
        messenger: RecordingMessenger,
    ) -> Harness {
        let settings = Arc::new(settings(file));
        let store = Arc::new(NewsStore::new(settings.cache_capacity));
        let web: Arc<dyn WebClient> = Arc::new(web);
        let fetcher = Arc::new(ArticleFetcher::new(Arc::clone(&web), Arc::clone(&store), 5));
        let summarizer = Arc::new(Summarizer::new(Arc::new(ask.clone()), 900));
        let controller = Arc::new(Controller::new(
            Arc::clone(&settings),
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&summarizer),
            Arc::new(messenger.clone()),
        ));
        let images = ImageResolver::new(Arc::new(image_web), Duration::from_millis(50));
        let cycle = PollCycle::new(settings, web, Arc::clone(&store), fetcher, summarizer, images, controller);
        Harness {
            cycle,
            store,
            ask,
            messenger,
        }
    }

    #[tokio::test]
    async fn test_three_candidates_two_relevant_one_summary_failure() {
        let ask = FakeAsk::new(vec![
            Ok("<b>ETF</b> inflows 📈".to_string()),
            Err(SummarizeError::Transport("reset".to_string())),
        ]);
        let mut h = harness(desk_file(vec![SiteConfig::new(SITE)]), site_web(), FakeWeb::new(), ask);

        let report = h.cycle.run_once().await;

        assert_eq!(report.candidates, 3);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.valuable, 2);
        assert_eq!(report.summarized, 1);
        assert_eq!(report.published, 2);

        let drafts = h.messenger.sent_to(MODERATION_CHAT);
        assert_eq!(drafts.len(), 2);
        assert!(drafts[0].body.starts_with("<b>ETF</b> inflows 📈"));
        let miners = h.store.article(MINERS).unwrap();
        assert!(!miners.summary_text.is_empty());
        assert!(drafts[1].body.contains(&escape_html(&miners.summary_text)));
        assert!(drafts.iter().all(|d| d.keyboard.is_some()));

        assert!(h.store.is_seen(ETF));
        assert!(h.store.is_seen(MINERS));
        assert!(!h.store.is_seen(BAKERY));
        assert_eq!(h.cycle.state, PollState::Publishing { url: MINERS.to_string() });
    }

    #[tokio::test]
    async fn test_seen_urls_are_not_resubmitted() {
        let ask = FakeAsk::new(vec![Ok("one".to_string()), Ok("two".to_string())]);
        let web = site_web();
        let mut h = harness(desk_file(vec![SiteConfig::new(SITE)]), web.clone(), FakeWeb::new(), ask);

        h.cycle.run_once().await;
        let report = h.cycle.run_once().await;

        assert_eq!(report.already_seen, 2);
        assert_eq!(report.published, 0);
        assert_eq!(h.ask.calls(), 2);
        assert_eq!(h.messenger.sent().len(), 2);
        // the irrelevant article comes from the cache the second time
        assert_eq!(web.calls(BAKERY), 1);
    }

    #[tokio::test]
    async fn test_image_timeout_falls_back_to_text() {
        let image_web = site_web()
            .with_page(ETF, r#"<meta property="og:image" content="https://cdn.example.com/etf.jpg">"#)
            .with_delay(Duration::from_millis(500));
        let ask = FakeAsk::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut h = harness(desk_file(vec![SiteConfig::new(SITE)]), site_web(), image_web, ask);

        let report = h.cycle.run_once().await;
        assert_eq!(report.published, 2);
        assert!(h.messenger.sent().iter().all(|m| m.photo_url.is_none()));
    }

    #[tokio::test]
    async fn test_resolved_image_is_sent_as_photo() {
        let image_web = FakeWeb::new().with_page(
            ETF,
            r#"<meta property="og:image" content="https://cdn.example.com/etf.jpg">"#,
        );
        let ask = FakeAsk::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut h = harness(desk_file(vec![SiteConfig::new(SITE)]), site_web(), image_web, ask);

        h.cycle.run_once().await;
        let sent = h.messenger.sent();
        assert_eq!(sent[0].photo_url.as_deref(), Some("https://cdn.example.com/etf.jpg"));
        assert_eq!(sent[1].photo_url, None);
    }

    #[tokio::test]
    async fn test_dead_site_does_not_abort_cycle() {
        let sites = vec![SiteConfig::new("https://down.example.com/"), SiteConfig::new(SITE)];
        let ask = FakeAsk::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut h = harness(desk_file(sites), site_web(), FakeWeb::new(), ask);

        let report = h.cycle.run_once().await;
        assert_eq!(report.site_failures, 1);
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn test_broken_article_is_skipped() {
        let web = site_web().with_page(MINERS, "<html><body></body></html>");
        let ask = FakeAsk::new(vec![Ok("a".to_string())]);
        let mut h = harness(desk_file(vec![SiteConfig::new(SITE)]), web, FakeWeb::new(), ask);

        let report = h.cycle.run_once().await;
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.published, 1);
        assert!(!h.store.is_seen(MINERS));
    }

    #[tokio::test]
    async fn test_duplicate_candidates_across_sites_are_fetched_once() {
        let mirror = "https://news.example.com/mirror";
        let web = site_web().with_page(mirror, &landing());
        let sites = vec![SiteConfig::new(SITE), SiteConfig::new(mirror)];
        let ask = FakeAsk::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut h = harness(desk_file(sites), web.clone(), FakeWeb::new(), ask);

        let report = h.cycle.run_once().await;
        assert_eq!(report.candidates, 6);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.published, 2);
        assert_eq!(web.calls(ETF), 1);
    }

    #[tokio::test]
    async fn test_rejected_summary_falls_back_to_extractive_text() {
        let ask = FakeAsk::new(vec![
            Ok("<b>ETF</b> inflows 📈".to_string()),
            Ok("<b>Miners</b> rally".to_string()),
        ]);
        let messenger = RecordingMessenger::new().rejecting_bodies_containing("<b>ETF</b>");
        let mut h = harness_with(
            desk_file(vec![SiteConfig::new(SITE)]),
            site_web(),
            FakeWeb::new(),
            ask,
            messenger,
        );

        let report = h.cycle.run_once().await;
        assert_eq!(report.published, 2);
        assert_eq!(report.publish_failures, 0);

        let drafts = h.messenger.sent_to(MODERATION_CHAT);
        let etf = h.store.article(ETF).unwrap();
        assert!(drafts[0].body.starts_with(&format!("<b>{}</b>", escape_html(&etf.title))));
        assert!(drafts[0].body.contains(&escape_html(&etf.summary_text)));
        assert!(h.store.is_seen(ETF));

        // posted once, so the next cycle does not summarize it again
        h.cycle.run_once().await;
        assert_eq!(h.ask.calls(), 2);
        assert_eq!(h.messenger.sent_to(MODERATION_CHAT).len(), 2);
    }

    #[tokio::test]
    async fn test_extractive_text_rejection_is_not_retried() {
        let ask = FakeAsk::new(vec![
            Err(SummarizeError::Transport("reset".to_string())),
            Err(SummarizeError::Transport("reset".to_string())),
        ]);
        let messenger = RecordingMessenger::new().rejecting_bodies_containing("bitcoin");
        let mut h = harness_with(
            desk_file(vec![SiteConfig::new(SITE)]),
            site_web(),
            FakeWeb::new(),
            ask,
            messenger,
        );

        let report = h.cycle.run_once().await;
        assert_eq!(report.publish_failures, 2);
        assert!(!h.store.is_seen(ETF));
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_posted_drafts_expire_after_ttl() {
        let ask = FakeAsk::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut h = harness(desk_file(vec![SiteConfig::new(SITE)]), site_web(), FakeWeb::new(), ask);
        h.cycle.run_once().await;
        assert_eq!(h.store.stats().live_posts, 2);

        let later = Instant::now() + crate::store::DRAFT_TTL + Duration::from_secs(1);
        assert_eq!(h.store.expire_posts(later), 2);
        assert_eq!(h.store.stats().live_posts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_forever_survives_a_panicking_cycle() {
        let web = site_web().with_panics(1);
        let ask = FakeAsk::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let h = harness(desk_file(vec![SiteConfig::new(SITE)]), web.clone(), FakeWeb::new(), ask);
        let messenger = h.messenger.clone();

        let poller = tokio::spawn(h.cycle.run_forever());
        // the first cycle panics; the second starts one poll interval later
        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        poller.abort();

        assert_eq!(web.calls(SITE), 2);
        assert_eq!(messenger.sent_to(MODERATION_CHAT).len(), 2);
        assert!(h.store.is_seen(ETF));
    }
}
