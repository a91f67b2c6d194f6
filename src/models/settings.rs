use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{FeedSource, Tag};

/// Per-profile preferences and the subscription lists, persisted under `user_settings`.
///
/// Passed explicitly into each component; whoever mutates it persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub feeds: Vec<FeedSource>,
    pub tags: Vec<Tag>,

    pub disable_images: bool,
    pub max_article_age_days: u32,

    pub disable_background_tasks: bool,
    pub enable_background_sync: bool,
    pub enable_notifications: bool,
    /// Minutes between "new articles" notifications.
    pub new_articles_notification_period: u32,
    pub enable_automatic_backups: bool,
    /// Hours between automatic backups.
    pub automatic_backup_period: u32,
    pub automatic_backup_dir: Option<String>,
    pub enable_offline_reading: bool,
    pub offline_cache_size: usize,

    /// Share of ranked positions replaced by random picks.
    pub discover_ratio: f64,
    /// Minutes a downloaded article cache stays fresh.
    pub article_cache_time: u32,
    pub max_articles_per_channel: usize,
    /// Votes required before preference ranking kicks in.
    pub no_sort_until: u32,
    pub rotate_db_after: u32,
    pub seen_history_length: usize,
    pub feed_page_size: usize,
    pub article_history: usize,

    pub total_upvotes: u64,
    pub total_downvotes: u64,
    pub last_backup_timestamp: i64,
}

impl Default for UserSettings {
    fn default() -> Self {
        let no_sort_until = 50;
        Self {
            feeds: Vec::new(),
            tags: Vec::new(),
            disable_images: false,
            max_article_age_days: 7,
            disable_background_tasks: true,
            enable_background_sync: false,
            enable_notifications: false,
            new_articles_notification_period: 12 * 60,
            enable_automatic_backups: false,
            automatic_backup_period: 24,
            automatic_backup_dir: None,
            enable_offline_reading: false,
            offline_cache_size: 20,
            discover_ratio: 0.1,
            article_cache_time: 3 * 60,
            max_articles_per_channel: 20,
            no_sort_until,
            rotate_db_after: no_sort_until * 2,
            seen_history_length: 700,
            feed_page_size: 20,
            article_history: 40,
            total_upvotes: 0,
            total_downvotes: 0,
            last_backup_timestamp: 0,
        }
    }
}

/// A removed tag together with the feeds that carried it, for one-shot undo.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedTag {
    pub tag: Tag,
    pub feed_urls: Vec<String>,
}

impl UserSettings {
    /// Alphabetical order for the feed and tag lists, as shown to the user.
    pub fn sort_lists(&mut self) {
        self.feeds
            .sort_by_key(|f| f.name.to_lowercase());
        self.tags.sort_by_key(|t| t.name.to_lowercase());
    }

    pub fn feed_index(&self, url: &str) -> Option<usize> {
        self.feeds.iter().position(|f| f.url == url)
    }

    pub fn feed(&self, url: &str) -> Result<&FeedSource> {
        self.feed_index(url)
            .map(|i| &self.feeds[i])
            .ok_or_else(|| anyhow::anyhow!("Did not find feed with url '{}' in feedlist.", url).into())
    }

    pub fn feed_mut(&mut self, url: &str) -> Result<&mut FeedSource> {
        match self.feed_index(url) {
            Some(i) => Ok(&mut self.feeds[i]),
            None => Err(anyhow::anyhow!("Did not find feed with url '{}' in feedlist.", url).into()),
        }
    }

    /// Inserts or replaces the feed with the same url.
    pub fn upsert_feed(&mut self, feed: FeedSource) {
        match self.feed_index(&feed.url) {
            Some(i) => self.feeds[i] = feed,
            None => self.feeds.push(feed),
        }
    }

    pub fn remove_feed(&mut self, url: &str) -> Result<FeedSource> {
        match self.feed_index(url) {
            Some(i) => Ok(self.feeds.remove(i)),
            None => Err(anyhow::anyhow!("Did not find feed with url '{}' in feedlist.", url).into()),
        }
    }

    pub fn find_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn new_tag(&mut self, name: &str) -> Result<Tag> {
        if self.find_tag(name).is_some() {
            return Err(AppError::InvalidTag(format!("Tag {} already exists.", name)));
        }
        let tag = Tag::new(name)?;
        self.tags.push(tag.clone());
        Ok(tag)
    }

    pub fn tag_or_existing(&mut self, name: &str) -> Result<Tag> {
        match self.find_tag(name) {
            Some(tag) => Ok(tag.clone()),
            None => self.new_tag(name),
        }
    }

    /// Drops the tag from the tag set and from every feed carrying it.
    pub fn remove_tag(&mut self, name: &str) -> RemovedTag {
        match self.tags.iter().position(|t| t.name == name) {
            Some(i) => {
                self.tags.remove(i);
            }
            None => tracing::error!(tag = name, "Cannot remove tag from user settings"),
        }

        let mut feed_urls = Vec::new();
        for feed in self.feeds.iter_mut() {
            if let Some(y) = feed.tags.iter().position(|t| t.name == name) {
                feed.tags.remove(y);
                feed_urls.push(feed.url.clone());
            }
        }

        RemovedTag {
            tag: Tag {
                name: name.to_string(),
            },
            feed_urls,
        }
    }

    pub fn restore_tag(&mut self, removed: RemovedTag) {
        for url in &removed.feed_urls {
            if let Some(i) = self.feed_index(url) {
                if !self.feeds[i].has_tag(&removed.tag) {
                    self.feeds[i].tags.push(removed.tag.clone());
                }
            }
        }
        if self.find_tag(&removed.tag.name).is_none() {
            self.tags.push(removed.tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_feeds() -> UserSettings {
        let mut settings = UserSettings::default();
        let space = settings.new_tag("space").unwrap();
        let food = settings.new_tag("food").unwrap();

        let mut a = FeedSource::new("https://a.example.com/rss").unwrap();
        a.tags = vec![food.clone(), space.clone()];
        let mut b = FeedSource::new("https://b.example.com/rss").unwrap();
        b.tags = vec![space];
        let mut c = FeedSource::new("https://c.example.com/rss").unwrap();
        c.tags = vec![food];
        settings.feeds = vec![a, b, c];
        settings
    }

    #[test]
    fn defaults_are_filled_for_partial_documents() {
        let settings: UserSettings = serde_json::from_str(r#"{"discover_ratio": 0.25}"#).unwrap();
        assert_eq!(settings.discover_ratio, 0.25);
        assert_eq!(settings.rotate_db_after, 100);
        assert_eq!(settings.feed_page_size, 20);
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let mut settings = UserSettings::default();
        settings.new_tag("space").unwrap();
        assert!(settings.new_tag("space").is_err());
        assert_eq!(settings.tag_or_existing("space").unwrap().name, "space");
        assert_eq!(settings.tags.len(), 1);
    }

    #[test]
    fn remove_tag_matches_each_feeds_own_tags() {
        let mut settings = settings_with_feeds();
        let removed = settings.remove_tag("space");

        assert_eq!(
            removed.feed_urls,
            vec!["https://a.example.com/rss", "https://b.example.com/rss"]
        );
        assert!(settings.find_tag("space").is_none());
        assert_eq!(settings.feeds[0].tags.len(), 1);
        assert!(settings.feeds[1].tags.is_empty());
        assert_eq!(settings.feeds[2].tags.len(), 1);

        settings.restore_tag(removed);
        assert!(settings.find_tag("space").is_some());
        assert!(settings.feeds[1].has_tag(&Tag::new("space").unwrap()));
    }

    #[test]
    fn feeds_are_upserted_by_url() {
        let mut settings = settings_with_feeds();
        let mut a = settings.feed("https://a.example.com/rss").unwrap().clone();
        a.enabled = false;
        settings.upsert_feed(a);
        assert_eq!(settings.feeds.len(), 3);
        assert!(!settings.feeds[0].enabled);
        assert!(settings.remove_feed("https://nope.example.com").is_err());
    }
}
