use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::db::{keys, Storage};
use crate::error::Result;
use crate::models::{Article, UserSettings};
use crate::services::content_fetcher::{ContentFetcher, OfflineArticle};

type OfflinePages = HashMap<String, OfflineArticle>;

/// Readable copies of top articles, stored under `offline_cache`.
pub struct OfflineCache {
    storage: Storage,
    fetcher: ContentFetcher,
    memo: Mutex<Option<OfflinePages>>,
}

impl OfflineCache {
    pub fn new(storage: Storage, fetcher: ContentFetcher) -> Self {
        Self {
            storage,
            fetcher,
            memo: Mutex::new(None),
        }
    }

    async fn pages(&self) -> Result<OfflinePages> {
        let mut memo = self.memo.lock().await;
        if memo.is_none() {
            let stored: Option<OfflinePages> = self.storage.get_opt(keys::OFFLINE_CACHE).await?;
            *memo = Some(stored.unwrap_or_default());
        }
        Ok(memo.clone().unwrap_or_default())
    }

    async fn store(&self, pages: OfflinePages) -> Result<()> {
        self.storage.set(keys::OFFLINE_CACHE, &pages).await?;
        *self.memo.lock().await = Some(pages);
        Ok(())
    }

    /// Drops the in-memory copy so the next read goes back to storage.
    pub async fn forget(&self) {
        *self.memo.lock().await = None;
    }

    pub async fn try_get(&self, url: &str) -> Option<OfflineArticle> {
        tracing::info!("Retrieving article from offline cache '{}'..", url);
        match self.pages().await {
            Ok(mut pages) => pages.remove(url),
            Err(e) => {
                tracing::error!("Failed to retrieve offline cache article: {}", e);
                None
            }
        }
    }

    /// Fetches a fresh copy and adds it to the cache.
    pub async fn try_cached_fetch(&self, url: &str) -> Option<OfflineArticle> {
        let page = match self.fetcher.fetch_readable(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!("Cannot fetch '{}' for offline use: {}", url, e);
                return None;
            }
        };

        let stored = async {
            let mut pages = self.pages().await?;
            pages.insert(url.to_string(), page.clone());
            self.store(pages).await
        };
        if let Err(e) = stored.await {
            tracing::warn!("Failed to update offline cache: {}", e);
        }
        Some(page)
    }

    /// Replaces the cache with the first `offline_cache_size` articles that can be fetched.
    pub async fn try_do_offline_save(&self, articles: &[Article], settings: &UserSettings) {
        if !settings.enable_offline_reading {
            return;
        }
        let started = Instant::now();
        let target = settings.offline_cache_size;
        tracing::info!("Saving top {} articles for offline use..", target);

        let mut pages = OfflinePages::new();
        for article in articles {
            if pages.len() >= target {
                break;
            }
            match self.fetcher.fetch_readable(&article.url).await {
                Ok(page) => {
                    pages.insert(article.url.clone(), page);
                }
                Err(e) => tracing::warn!(
                    "Failed to download article for offline use. Url: {} ({})",
                    article.url,
                    e
                ),
            }
        }

        let saved = pages.len();
        if let Err(e) = self.store(pages).await {
            tracing::error!("Failed to save offline cache: {}", e);
            return;
        }
        tracing::info!(
            "Finished in {} ms, {} articles available offline.",
            started.elapsed().as_millis(),
            saved
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::test_support::{client, serve};

    fn page_body(word: &str) -> Vec<u8> {
        format!(
            "<html><head><title>{word}</title></head><body><p>{}</p></body></html>",
            format!("{word} ").repeat(60)
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn top_articles_are_saved_and_served() {
        let base = serve(HashMap::from([
            ("/a", (200, page_body("alpha"))),
            ("/b", (200, page_body("bravo"))),
            ("/c", (200, page_body("charlie"))),
        ]))
        .await;

        let storage = Storage::open_in_memory().await.unwrap();
        let cache = OfflineCache::new(storage.clone(), ContentFetcher::with_client(client()));
        let articles: Vec<Article> = ["/missing", "/a", "/b", "/c"]
            .iter()
            .map(|p| Article::new(p.to_string(), format!("{base}{p}")))
            .collect();
        let settings = UserSettings {
            enable_offline_reading: true,
            offline_cache_size: 2,
            ..Default::default()
        };

        cache.try_do_offline_save(&articles, &settings).await;

        let a = cache.try_get(&format!("{base}/a")).await.unwrap();
        assert_eq!(a.title, "alpha");
        assert!(cache.try_get(&format!("{base}/b")).await.is_some());
        assert!(cache.try_get(&format!("{base}/c")).await.is_none());

        let stored: OfflinePages = storage.get(keys::OFFLINE_CACHE).await.unwrap();
        assert_eq!(stored.len(), 2);

        let c = cache.try_cached_fetch(&format!("{base}/c")).await.unwrap();
        assert_eq!(c.title, "charlie");
        assert!(cache.try_get(&format!("{base}/c")).await.is_some());
        assert!(cache.try_cached_fetch(&format!("{base}/missing")).await.is_none());
    }

    #[tokio::test]
    async fn forgotten_cache_rereads_storage() {
        let base = serve(HashMap::from([("/a", (200, page_body("alpha")))])).await;
        let storage = Storage::open_in_memory().await.unwrap();
        let cache = OfflineCache::new(storage.clone(), ContentFetcher::with_client(client()));
        let url = format!("{base}/a");
        assert!(cache.try_cached_fetch(&url).await.is_some());

        storage.clear().await.unwrap();
        assert!(cache.try_get(&url).await.is_some());
        cache.forget().await;
        assert!(cache.try_get(&url).await.is_none());
    }

    #[tokio::test]
    async fn disabled_offline_reading_does_nothing() {
        let storage = Storage::open_in_memory().await.unwrap();
        let cache = OfflineCache::new(storage.clone(), ContentFetcher::with_client(client()));
        let articles = vec![Article::new("t".into(), "http://127.0.0.1:9/x".into())];
        cache
            .try_do_offline_save(&articles, &UserSettings::default())
            .await;
        assert!(storage.get_raw(keys::OFFLINE_CACHE).await.unwrap().is_none());
    }
}
