use serde::{Deserialize, Serialize};

use crate::models::Article;

/// How many notified urls are remembered.
pub const NOTIFIED_CAP: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleCache {
    pub timestamp: i64,
    pub articles: Vec<Article>,
}

impl ArticleCache {
    pub fn new(timestamp: i64, articles: Vec<Article>) -> Self {
        Self {
            timestamp,
            articles,
        }
    }

    pub fn age_minutes(&self, now_ms: i64) -> f64 {
        (now_ms - self.timestamp) as f64 / 60_000.0
    }

    pub fn is_stale(&self, now_ms: i64, cache_time_minutes: u32) -> bool {
        self.age_minutes(now_ms) >= cache_time_minutes as f64
    }
}

/// Previously rated articles, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenHistory(Vec<Article>);

impl SeenHistory {
    pub fn push_capped(&mut self, article: Article, cap: usize) {
        self.0.push(article);
        if self.0.len() > cap {
            let excess = self.0.len() - cap;
            self.0.drain(..excess);
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.0.iter().any(|a| a.url == url)
    }

    pub fn articles(&self) -> &[Article] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationCache {
    #[serde(default)]
    pub seen_urls: Vec<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub last_article: Option<Article>,
}

impl NotificationCache {
    pub fn minutes_since_last(&self, now_ms: i64) -> f64 {
        (now_ms - self.timestamp) as f64 / 60_000.0
    }

    /// First article that has not been notified yet.
    pub fn pick<'a>(&self, articles: &'a [Article]) -> Option<&'a Article> {
        articles
            .iter()
            .find(|a| !self.seen_urls.iter().any(|u| *u == a.url))
    }

    pub fn record(&mut self, article: &Article) {
        self.seen_urls.push(article.url.clone());
        if self.seen_urls.len() > NOTIFIED_CAP {
            let excess = self.seen_urls.len() - NOTIFIED_CAP;
            self.seen_urls.drain(..excess);
        }
        self.last_article = Some(article.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(n: usize) -> Article {
        Article::new(format!("t{n}"), format!("https://x.org/{n}"))
    }

    #[test]
    fn seen_history_trims_oldest() {
        let mut seen = SeenHistory::default();
        for n in 0..5 {
            seen.push_capped(art(n), 3);
        }
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains_url("https://x.org/1"));
        assert!(seen.contains_url("https://x.org/4"));
    }

    #[test]
    fn cache_staleness() {
        let cache = ArticleCache::new(0, Vec::new());
        assert!(cache.is_stale(180 * 60_000, 180));
        assert!(!cache.is_stale(179 * 60_000, 180));
    }

    #[test]
    fn notification_ring_is_capped() {
        let mut notif = NotificationCache::default();
        for n in 0..25 {
            notif.record(&art(n));
        }
        assert_eq!(notif.seen_urls.len(), NOTIFIED_CAP);
        assert_eq!(notif.seen_urls[0], "https://x.org/5");

        let pool = vec![art(24), art(30)];
        assert_eq!(notif.pick(&pool).unwrap().url, "https://x.org/30");
    }
}
