use std::sync::LazyLock;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::header::{CACHE_CONTROL, USER_AGENT};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::curation::extract_keywords;
use crate::error::{check_cancelled, AppError, Result};
use crate::feed::parser::parse_feed;
use crate::feed::text::decode_body;
use crate::models::{Article, FeedSource};

/// Feeds fetched together before the next batch starts.
const BATCH_SIZE: usize = 6;
const TIMEOUT: Duration = Duration::from_millis(5000);
const DEGRADED_TIMEOUT: Duration = Duration::from_millis(2000);
/// Feeds failing this often get the shorter timeout.
const DEGRADE_AFTER: u32 = 2;
/// Share of failing feeds treated as a network outage instead of feed rot.
const OUTAGE_RATIO: f64 = 0.9;
/// Highest share of unexpected failures that still allows caching the result.
const CACHEABLE_RATIO: f64 = 0.25;
/// Items requested when probing a candidate feed url.
const PROBE_ITEMS: usize = 5;
const PROBE_SUFFIXES: [&str; 3] = ["/rss", "/feed", "/rss.xml"];

const USER_AGENTS: [&str; 14] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/104.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/103.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/101.0.4951.61 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:103.0) Gecko/20100101 Firefox/103.0",
    "Mozilla/5.0 (Windows NT 10.0; rv:103.0) Gecko/20100101 Firefox/103.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:103.0) Gecko/20100101 Firefox/103.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/104.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.6 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:103.0) Gecko/20100101 Firefox/103.0",
    "Mozilla/5.0 (Linux; Android 9; ASUS_X00TD; Flow) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/359.0.0.288 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 8.0.0; SOV35; Flow) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/335.0.0.244 Mobile Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 13_3_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.5 Mobile/15E148 Snapchat/10.77.5.59 (like Safari/604.1)",
    "Mozilla/5.0 (Windows NT 10.0; WOW64; x64; rv:105.0esr) Gecko/20010101 Firefox/105.0esr",
    "Mozilla/5.0 (Windows NT 10.0; rv:100.0) Gecko/20100101 Firefox/100.0",
];

static FEED_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#,
    )
    .expect("feed link pattern is valid")
});
static FEED_LINK_TYPE_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link[^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#)
        .expect("feed link pattern is valid")
});

/// Result of one download run over the feed list.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub articles: Vec<Article>,
    /// False when too many healthy feeds failed for the result to be trusted.
    pub cacheable: bool,
}

pub struct Downloader {
    client: Client,
    probe_delay: Duration,
}

impl Downloader {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self::with_client(client)
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            probe_delay: Duration::from_secs(1),
        }
    }

    /// Pause between candidate urls while guessing a feed address.
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    fn timeout_for(feed: &FeedSource) -> Duration {
        if feed.consecutive_failures < DEGRADE_AFTER {
            TIMEOUT
        } else {
            DEGRADED_TIMEOUT
        }
    }

    /// GET with a random user agent and caching disabled, decoded to text.
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let request = async {
            let response = self
                .client
                .get(url)
                .timeout(timeout)
                .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
                .header(USER_AGENT, agent)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(AppError::Feed(format!("HTTP {}", response.status())));
            }
            let bytes = response.bytes().await?;
            Ok::<_, AppError>(decode_body(&bytes))
        };

        // some servers finish the TLS handshake and then hang past the request timeout
        tokio::time::timeout(timeout * 2, request)
            .await
            .map_err(|_| AppError::Timeout)?
    }

    /// Downloads and parses a single feed. Zero articles count as a failure.
    ///
    /// Does not touch the feed's failure counter; `fetch_all` owns that.
    pub async fn fetch_one(&self, feed: &FeedSource, max_items: usize) -> Result<Vec<Article>> {
        tracing::debug!(feed = %feed.url, "Downloading..");
        let started = Instant::now();

        let text = self.get_text(&feed.url, Self::timeout_for(feed)).await?;
        tracing::debug!(feed = %feed.url, "Response in {} ms", started.elapsed().as_millis());

        let articles = parse_feed(&text, feed, max_items)?;
        tracing::info!(
            feed = %feed.url,
            "Finished download, got {} articles, took {} ms",
            articles.len(),
            started.elapsed().as_millis()
        );

        if articles.is_empty() {
            return Err(AppError::Feed("Got 0 articles from this feed.".to_string()));
        }
        Ok(articles)
    }

    /// Fetches every enabled feed in batches, updates failure counters and runs
    /// keyword extraction over the combined result.
    pub async fn fetch_all(
        &self,
        feeds: &mut [FeedSource],
        per_feed_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        tracing::info!("Downloading articles..");
        let started = Instant::now();

        let failures_before: Vec<u32> = feeds.iter().map(|f| f.consecutive_failures).collect();
        let mut failed = vec![false; feeds.len()];
        let mut articles = Vec::new();
        let mut processed = 0usize;
        let mut failures = 0usize;
        let mut unexpected_failures = 0usize;

        for start in (0..feeds.len()).step_by(BATCH_SIZE) {
            check_cancelled(cancel)?;
            let end = (start + BATCH_SIZE).min(feeds.len());

            let results = join_all(feeds[start..end].iter().map(|feed| async move {
                if !feed.enabled {
                    tracing::debug!(feed = %feed.url, "(skipped, feed disabled)");
                    return None;
                }
                Some(self.fetch_one(feed, per_feed_limit).await)
            }))
            .await;

            for (offset, result) in results.into_iter().enumerate() {
                let idx = start + offset;
                let feed = &mut feeds[idx];
                match result {
                    None => continue,
                    Some(Ok(fetched)) => {
                        feed.record_success();
                        articles.extend(fetched);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(feed = %feed.url, "Faulty RSS feed: {}", e);
                        if feed.is_healthy() {
                            unexpected_failures += 1;
                        }
                        feed.record_failure();
                        failed[idx] = true;
                        failures += 1;
                    }
                }
                processed += 1;
            }
        }

        if processed > 0 && failures as f64 / processed as f64 >= OUTAGE_RATIO {
            tracing::warn!(
                "{} of {} feeds failed, assuming a network outage",
                failures,
                processed
            );
            for (idx, feed) in feeds.iter_mut().enumerate() {
                if failed[idx] {
                    feed.consecutive_failures = failures_before[idx].saturating_sub(1);
                }
            }
        }

        let cacheable =
            processed == 0 || unexpected_failures as f64 / processed as f64 <= CACHEABLE_RATIO;
        if !cacheable {
            tracing::warn!(
                "{} healthy feeds failed unexpectedly, result will not be cached",
                unexpected_failures
            );
        }

        tracing::info!(
            "Finished in {} ms, got {} articles.",
            started.elapsed().as_millis(),
            articles.len()
        );

        extract_keywords(&mut articles, None, Some(cancel))?;
        Ok(FetchOutcome {
            articles,
            cacheable,
        })
    }

    async fn probe(&self, url: &str) -> bool {
        let working = match FeedSource::new(url) {
            Ok(feed) => self.fetch_one(&feed, PROBE_ITEMS).await.is_ok(),
            Err(_) => false,
        };
        tokio::time::sleep(self.probe_delay).await;
        working
    }

    /// Finds a working feed address for user input such as `example.com`.
    ///
    /// Tries the url itself, a feed advertised by the page's `<link>` tags, then
    /// the common `/rss`, `/feed` and `/rss.xml` paths.
    pub async fn guess_feed_url(&self, input: &str) -> Result<Option<String>> {
        let input = input.trim();
        let url = if input.starts_with("https://") || input.starts_with("http://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };

        if self.probe(&url).await {
            return Ok(Some(url));
        }

        if let Ok(html) = self.get_text(&url, TIMEOUT).await {
            if let Some(advertised) = find_feed_link(&html, &url) {
                tracing::debug!("Page advertises feed {}", advertised);
                if self.probe(&advertised).await {
                    return Ok(Some(advertised));
                }
            }
        }

        let base = url.strip_suffix('/').unwrap_or(&url);
        for suffix in PROBE_SUFFIXES {
            let candidate = format!("{}{}", base, suffix);
            if self.probe(&candidate).await {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Search HTML for RSS/Atom feed links
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    let href = FEED_LINK_RE
        .captures(html)
        .or_else(|| FEED_LINK_TYPE_FIRST_RE.captures(html))
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string())?;

    Some(resolve_url(&href, base_url))
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_string()
}
