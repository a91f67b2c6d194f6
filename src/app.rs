use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::curation::{paginate, remove_from_pages, ArticleCurator, PreferenceModel};
use crate::db::{keys, Storage};
use crate::error::{check_cancelled, AppError, Result};
use crate::feed::Downloader;
use crate::models::{
    now_millis, position_by_url, Article, ArticleCache, ArticleSource, ArticlesFilter, FeedSource,
    LearningStatus, NotificationCache, RemovedTag, SeenHistory, SortType, Tag, UserSettings, Vote,
};
use crate::services::{backup, Backup, ContentFetcher, Imported, OfflineCache};
use crate::topics::find_topic;

/// Items requested from a feed when validating a new subscription.
const TRIAL_ITEMS: usize = 5;

/// Entry point for everything a front end does: article lists, rating,
/// bookmarks, subscriptions, tags, backups.
pub struct App {
    settings: UserSettings,
    storage: Storage,
    downloader: Downloader,
    curator: ArticleCurator,
    offline: OfflineCache,
    pages: HashMap<ArticleSource, Vec<Vec<Article>>>,
    last_removed_feed: Option<FeedSource>,
    last_removed_tag: Option<RemovedTag>,
    last_removed_bookmark: Option<Article>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let storage = Storage::open(&config.db_path).await?;
        Self::with_parts(storage, Downloader::new(), ContentFetcher::new()).await
    }

    pub async fn with_parts(
        storage: Storage,
        downloader: Downloader,
        content: ContentFetcher,
    ) -> Result<Self> {
        let settings = storage.check_db().await?;
        let offline = OfflineCache::new(storage.clone(), content);

        Ok(Self {
            settings,
            storage,
            downloader,
            curator: ArticleCurator::new(),
            offline,
            pages: HashMap::new(),
            last_removed_feed: None,
            last_removed_tag: None,
            last_removed_bookmark: None,
        })
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn offline_cache(&self) -> &OfflineCache {
        &self.offline
    }

    /// Applies `edit` to the profile and persists it.
    pub async fn update_settings(&mut self, edit: impl FnOnce(&mut UserSettings)) -> Result<()> {
        edit(&mut self.settings);
        self.persist_settings().await
    }

    async fn persist_settings(&mut self) -> Result<()> {
        self.settings.sort_lists();
        self.storage.save_settings(&self.settings).await
    }

    // Article lists

    /// Downloads (or reads from cache), sorts and cleans the feed.
    pub async fn get_feed_articles(
        &mut self,
        sort_type: Option<SortType>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Article>> {
        tracing::info!("Loading new articles..");
        let started = Instant::now();
        self.settings = self.storage.check_db().await?;

        let cache = self.storage.article_cache().await?;
        let now = now_millis();
        let articles = if cache.is_stale(now, self.settings.article_cache_time) {
            let outcome = self
                .downloader
                .fetch_all(
                    &mut self.settings.feeds,
                    self.settings.max_articles_per_channel,
                    cancel,
                )
                .await?;
            self.storage.save_settings(&self.settings).await?;

            if !outcome.cacheable {
                tracing::warn!("Too many feeds failed, not caching this download");
            } else if !outcome.articles.is_empty() {
                let cache = ArticleCache::new(now_millis(), outcome.articles.clone());
                self.storage.set_article_cache(&cache).await?;
            }
            outcome.articles
        } else {
            tracing::info!(
                "Using cached articles. ({:.1} minutes old)",
                cache.age_minutes(now)
            );
            cache.articles
        };
        check_cancelled(cancel)?;

        let model = PreferenceModel::load(&self.storage).await?;
        let mut articles = self
            .curator
            .sort(articles, sort_type, &model, &self.settings, cancel)?;
        check_cancelled(cancel)?;

        if !self.settings.disable_background_tasks && self.settings.enable_notifications {
            let notifications: NotificationCache = self.storage.get(keys::NOTIFICATIONS).await?;
            if let Some(last) = notifications.last_article {
                if let Some(i) = position_by_url(&last.url, &articles) {
                    articles.remove(i);
                }
                tracing::info!(
                    "Inserted '{}' (last notification) at the start of feed.",
                    last.title
                );
                articles.insert(0, last);
            }
        }
        check_cancelled(cancel)?;

        let seen: SeenHistory = self.storage.get(keys::SEEN).await?;
        let articles = self.curator.clean(articles, &seen, &self.settings);

        tracing::info!(
            "Loaded feed in {} ms ({} articles total).",
            started.elapsed().as_millis(),
            articles.len()
        );
        check_cancelled(cancel)?;
        Ok(articles)
    }

    /// Articles from `source` that pass `filter`, with ids renumbered from 0.
    pub async fn get_articles(
        &mut self,
        source: ArticleSource,
        filter: &ArticlesFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Article>> {
        tracing::info!(?source, "Getting articles");

        let articles = match source {
            ArticleSource::Feed => self.get_feed_articles(filter.sort_type, cancel).await?,
            ArticleSource::Bookmarks => {
                let mut saved: Vec<Article> = self.storage.get(keys::SAVED).await?;
                saved.reverse();
                saved
            }
            ArticleSource::History => {
                let seen: SeenHistory = self.storage.get(keys::SEEN).await?;
                seen.articles()
                    .iter()
                    .rev()
                    .take(self.settings.article_history)
                    .cloned()
                    .collect()
            }
        };

        let started = Instant::now();
        let total = articles.len();
        let mut articles = filter.apply(articles);
        tracing::info!(
            "Filtering complete in {} ms, {}/{} passed.",
            started.elapsed().as_millis(),
            articles.len(),
            total
        );

        for (id, article) in articles.iter_mut().enumerate() {
            article.id = id;
        }
        Ok(articles)
    }

    /// Same as `get_articles`, split into pages of `feed_page_size`. The pages are
    /// kept so later removals (ratings, bookmark deletions) can update them.
    pub async fn get_articles_paginated(
        &mut self,
        source: ArticleSource,
        filter: &ArticlesFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<Article>>> {
        let articles = self.get_articles(source, filter, cancel).await?;
        let pages = paginate(articles, self.settings.feed_page_size);
        self.pages.insert(source, pages.clone());
        Ok(pages)
    }

    pub fn current_pages(&self, source: ArticleSource) -> &[Vec<Article>] {
        self.pages.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Forces the next feed load to download.
    pub async fn expire_article_cache(&self) -> Result<()> {
        let mut cache = self.storage.article_cache().await?;
        cache.timestamp = 0;
        self.storage.set_article_cache(&cache).await
    }

    pub async fn refresh(&mut self, cancel: &CancellationToken) -> Result<Vec<Vec<Article>>> {
        self.expire_article_cache().await?;
        self.get_articles_paginated(ArticleSource::Feed, &ArticlesFilter::default(), cancel)
            .await
    }

    pub async fn reset_cache(&mut self) -> Result<()> {
        self.pages.clear();
        self.storage.reset_cache().await
    }

    pub async fn reset_all_data(&mut self) -> Result<()> {
        self.pages.clear();
        self.settings = self.storage.reset_all_data().await?;
        self.offline.forget().await;
        Ok(())
    }

    // Learning

    pub async fn rate_article(&mut self, article: &Article, vote: Vote) -> Result<()> {
        let mut model = PreferenceModel::load(&self.storage).await?;
        let mut seen: SeenHistory = self.storage.get(keys::SEEN).await?;

        model.rate(article, vote, &mut seen, &mut self.settings);
        self.storage.save_settings(&self.settings).await?;
        self.storage.set(keys::SEEN, &seen).await?;
        model.save(&self.storage).await?;
        tracing::info!("Saved rating for article '{}'", article.title);

        self.settings = self.storage.check_db().await?;
        if let Some(pages) = self.pages.get_mut(&ArticleSource::Feed) {
            remove_from_pages(pages, &article.url);
        }
        Ok(())
    }

    pub async fn get_learning_status(&self) -> Result<LearningStatus> {
        let model = PreferenceModel::load(&self.storage).await?;
        Ok(model.status(&self.settings))
    }

    // Bookmarks

    /// Returns false when an article with the same url is already saved.
    pub async fn try_save_article(&mut self, article: &Article) -> Result<bool> {
        let mut saved: Vec<Article> = self.storage.get(keys::SAVED).await?;
        if position_by_url(&article.url, &saved).is_some() {
            tracing::warn!("Article is already saved.");
            return Ok(false);
        }
        saved.push(article.clone());
        self.storage.set(keys::SAVED, &saved).await?;
        tracing::info!("Article saved");
        Ok(true)
    }

    pub async fn try_remove_saved_article(&mut self, url: &str) -> Result<bool> {
        let mut saved: Vec<Article> = self.storage.get(keys::SAVED).await?;
        let Some(i) = position_by_url(url, &saved) else {
            tracing::error!("Cannot remove saved article, not found.");
            return Ok(false);
        };
        let removed = saved.remove(i);
        self.storage.set(keys::SAVED, &saved).await?;

        if let Some(pages) = self.pages.get_mut(&ArticleSource::Bookmarks) {
            remove_from_pages(pages, url);
        }
        tracing::info!("Removed saved article '{}'", removed.title);
        self.last_removed_bookmark = Some(removed);
        Ok(true)
    }

    pub async fn undo_remove_saved_article(&mut self) -> Result<bool> {
        match self.last_removed_bookmark.take() {
            Some(article) => self.try_save_article(&article).await,
            None => Ok(false),
        }
    }

    // Backups

    pub async fn create_backup(&self) -> Result<String> {
        Backup::create(&self.storage).await
    }

    pub async fn try_load_backup(&mut self, text: &str) -> Result<Imported> {
        let imported = backup::try_load_backup(&self.storage, text).await?;
        self.settings = self.storage.check_db().await?;
        self.pages.clear();
        self.offline.forget().await;
        Ok(imported)
    }

    pub fn export_opml(&self) -> Result<String> {
        backup::export_feeds(&self.settings)
    }

    // Topics

    pub async fn change_default_topics(&mut self, name: &str, enable: bool) -> Result<()> {
        let Some(topic) = find_topic(name) else {
            tracing::warn!("Unknown topic '{}'", name);
            return Ok(());
        };
        tracing::info!("{} - {}", topic.name, if enable { "add" } else { "remove" });

        for url in topic.sources {
            let feed = FeedSource::new(url)?;
            match (enable, self.settings.feed_index(&feed.url)) {
                (true, None) => {
                    tracing::debug!("add feed {} to feedlist", feed.name);
                    self.settings.feeds.push(feed);
                }
                (false, Some(i)) => {
                    tracing::debug!("remove feed {} from feedlist", feed.name);
                    self.settings.feeds.remove(i);
                }
                _ => {}
            }
        }
        self.persist_settings().await
    }

    /// True when at least `threshold` of the topic's feeds are subscribed.
    pub fn is_topic_enabled(&self, name: &str, threshold: f64) -> bool {
        let Some(topic) = find_topic(name) else {
            return false;
        };
        let enabled = topic
            .sources
            .iter()
            .filter(|url| self.settings.feed_index(url).is_some())
            .count();
        enabled as f64 / topic.sources.len() as f64 >= threshold
    }

    // Feeds

    pub async fn guess_feed_url(&self, input: &str) -> Result<Option<String>> {
        self.downloader.guess_feed_url(input).await
    }

    /// Adds a feed after a trial download proves it yields articles.
    pub async fn subscribe(&mut self, url: &str) -> Result<FeedSource> {
        let feed = FeedSource::new(url)?;
        if self.settings.feed_index(&feed.url).is_some() {
            return Err(AppError::Feed(format!(
                "'{}' is already in the feed list",
                feed.url
            )));
        }

        let trial = self.downloader.fetch_one(&feed, TRIAL_ITEMS).await?;
        tracing::info!(feed = %feed.url, "Trial download returned {} articles", trial.len());

        self.settings.feeds.push(feed.clone());
        self.persist_settings().await?;
        Ok(feed)
    }

    pub async fn unsubscribe(&mut self, url: &str) -> Result<FeedSource> {
        let feed = self.settings.remove_feed(url)?;
        self.persist_settings().await?;
        tracing::info!(feed = %feed.url, "Removed feed");
        self.last_removed_feed = Some(feed.clone());
        Ok(feed)
    }

    pub async fn undo_unsubscribe(&mut self) -> Result<bool> {
        let Some(feed) = self.last_removed_feed.take() else {
            return Ok(false);
        };
        self.settings.upsert_feed(feed);
        self.persist_settings().await?;
        Ok(true)
    }

    pub async fn set_feed_enabled(&mut self, url: &str, enabled: bool) -> Result<()> {
        self.settings.feed_mut(url)?.enabled = enabled;
        self.persist_settings().await
    }

    // Tags

    pub async fn new_tag(&mut self, name: &str) -> Result<Tag> {
        let tag = self.settings.new_tag(name)?;
        self.persist_settings().await?;
        Ok(tag)
    }

    pub async fn remove_tag(&mut self, name: &str) -> Result<()> {
        let removed = self.settings.remove_tag(name);
        self.persist_settings().await?;
        tracing::info!(
            tag = name,
            "Removed tag from {} feed(s)",
            removed.feed_urls.len()
        );
        self.last_removed_tag = Some(removed);
        Ok(())
    }

    pub async fn undo_remove_tag(&mut self) -> Result<bool> {
        let Some(removed) = self.last_removed_tag.take() else {
            return Ok(false);
        };
        self.settings.restore_tag(removed);
        self.persist_settings().await?;
        Ok(true)
    }

    /// Tags a feed (creating the tag if needed) and its cached articles.
    pub async fn add_feed_tag(&mut self, feed_url: &str, tag_name: &str) -> Result<()> {
        let tag = self.settings.tag_or_existing(tag_name)?;
        let feed = self.settings.feed_mut(feed_url)?;
        if feed.has_tag(&tag) {
            return Ok(());
        }
        feed.tags.push(tag.clone());
        self.persist_settings().await?;

        self.retag_cached(feed_url, |tags| {
            if !tags.iter().any(|t| t.name == tag.name) {
                tags.push(tag.clone());
            }
        })
        .await
    }

    pub async fn remove_feed_tag(&mut self, feed_url: &str, tag_name: &str) -> Result<()> {
        let feed = self.settings.feed_mut(feed_url)?;
        feed.tags.retain(|t| t.name != tag_name);
        self.persist_settings().await?;

        self.retag_cached(feed_url, |tags| tags.retain(|t| t.name != tag_name))
            .await
    }

    async fn retag_cached(&self, feed_url: &str, edit: impl Fn(&mut Vec<Tag>)) -> Result<()> {
        let mut cache = self.storage.article_cache().await?;
        let mut touched = 0;
        for article in cache.articles.iter_mut().filter(|a| a.source_url == feed_url) {
            edit(&mut article.tags);
            touched += 1;
        }
        if touched > 0 {
            tracing::debug!(feed = feed_url, "Updated tags of {} cached articles", touched);
            self.storage.set_article_cache(&cache).await?;
        }
        Ok(())
    }
}
