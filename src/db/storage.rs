use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{ArticleCache, LearningDb, NotificationCache, SeenHistory, UserSettings};

use super::schema::SCHEMA;

/// Storage layout version, the major part must match for backups to load.
pub const DB_VERSION: &str = "3.1";

pub mod keys {
    pub const SAVED: &str = "saved";
    pub const USER_SETTINGS: &str = "user_settings";
    pub const SEEN: &str = "seen";
    pub const NOTIFICATIONS: &str = "notifications-cache";
    pub const LEARNING_DB: &str = "learning_db";
    pub const LEARNING_DB_SECONDARY: &str = "learning_db_secondary";
    pub const CACHE: &str = "cache";
    pub const OFFLINE_CACHE: &str = "offline_cache";
}

/// JSON documents in a single SQLite key/value table.
#[derive(Clone)]
pub struct Storage {
    conn: Connection,
    init_lock: Arc<Mutex<()>>,
}

impl Storage {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::with_connection(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            init_lock: Arc::new(Mutex::new(())),
        })
    }

    // Raw access

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO kv (key, value) VALUES (?1, ?2)
                       ON CONFLICT(key) DO UPDATE SET
                           value = excluded.value,
                           updated_at = datetime('now')"#,
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM kv", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Typed access

    /// Reads a key that `check_db` must already have initialised.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_opt(key)
            .await?
            .ok_or_else(|| AppError::MissingKey(key.to_string()))
    }

    pub async fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        tracing::debug!("Saving key '{}'", key);
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw).await
    }

    /// Makes sure every required key exists and re-merges stored settings with the
    /// current defaults. Concurrent callers wait for the running check to finish.
    pub async fn check_db(&self) -> Result<UserSettings> {
        let _guard = self.init_lock.lock().await;
        tracing::debug!("DB locked");

        if self.get_raw(keys::SAVED).await?.is_none() {
            tracing::debug!("Init \"saved\" key in DB");
            self.set(keys::SAVED, &Vec::<crate::models::Article>::new()).await?;
        }

        let mut settings = match self.get_opt::<UserSettings>(keys::USER_SETTINGS).await? {
            Some(stored) => stored,
            None => {
                tracing::debug!("Init \"user_settings\" key in DB");
                UserSettings::default()
            }
        };
        settings.sort_lists();
        self.set(keys::USER_SETTINGS, &settings).await?;

        if self.get_raw(keys::SEEN).await?.is_none() {
            tracing::debug!("Init \"seen\" key in DB");
            self.set(keys::SEEN, &SeenHistory::default()).await?;
        }
        if self.get_raw(keys::NOTIFICATIONS).await?.is_none() {
            tracing::debug!("Init \"notifications-cache\" key in DB");
            self.set(keys::NOTIFICATIONS, &NotificationCache::default())
                .await?;
        }
        if self.get_raw(keys::LEARNING_DB).await?.is_none() {
            tracing::debug!("Init \"learning_db\" key in DB");
            self.set(keys::LEARNING_DB, &LearningDb::default()).await?;
            self.remove(keys::LEARNING_DB_SECONDARY).await?;
        }
        if self.get_raw(keys::LEARNING_DB_SECONDARY).await?.is_none() {
            tracing::debug!("Init \"learning_db_secondary\" key in DB");
            self.set(
                keys::LEARNING_DB_SECONDARY,
                &LearningDb::seeded(settings.rotate_db_after),
            )
            .await?;
        }
        if self.get_raw(keys::CACHE).await?.is_none() {
            self.reset_cache().await?;
        }

        tracing::debug!("DB unlocking now");
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        self.set(keys::USER_SETTINGS, settings).await
    }

    // Article cache

    pub async fn article_cache(&self) -> Result<ArticleCache> {
        match self.get_opt::<ArticleCache>(keys::CACHE).await? {
            Some(cache) => Ok(cache),
            None => {
                tracing::debug!("Cache is missing, initializing it");
                self.reset_cache().await?;
                Ok(ArticleCache::default())
            }
        }
    }

    pub async fn set_article_cache(&self, cache: &ArticleCache) -> Result<()> {
        self.set(keys::CACHE, cache).await
    }

    pub async fn reset_cache(&self) -> Result<()> {
        tracing::info!("Resetting article cache");
        self.set(keys::CACHE, &ArticleCache::default()).await
    }

    pub async fn reset_all_data(&self) -> Result<UserSettings> {
        tracing::warn!("Resetting all data");
        self.clear().await?;
        self.reset_cache().await?;
        self.check_db().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedSource;

    #[tokio::test]
    async fn missing_key_is_a_hard_error() {
        let storage = Storage::open_in_memory().await.unwrap();
        let err = storage.get::<LearningDb>(keys::LEARNING_DB).await.unwrap_err();
        assert!(matches!(err, AppError::MissingKey(ref k) if k == keys::LEARNING_DB));
    }

    #[tokio::test]
    async fn check_db_initialises_every_key() {
        let storage = Storage::open_in_memory().await.unwrap();
        let settings = storage.check_db().await.unwrap();

        let secondary: LearningDb = storage.get(keys::LEARNING_DB_SECONDARY).await.unwrap();
        assert_eq!(secondary.upvotes, -(settings.rotate_db_after as i64) / 4);
        assert_eq!(secondary.downvotes, secondary.upvotes);

        let primary: LearningDb = storage.get(keys::LEARNING_DB).await.unwrap();
        assert_eq!(primary.total_votes(), 0);

        let seen: SeenHistory = storage.get(keys::SEEN).await.unwrap();
        assert!(seen.is_empty());
        assert_eq!(storage.article_cache().await.unwrap().timestamp, 0);
    }

    #[tokio::test]
    async fn check_db_keeps_and_merges_stored_settings() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .set_raw(
                keys::USER_SETTINGS,
                r#"{"feeds":[{"url":"http://b.org/rss","name":"b.org"},{"url":"http://a.org/rss","name":"a.org"}]}"#
                    .to_string(),
            )
            .await
            .unwrap();

        let settings = storage.check_db().await.unwrap();
        assert_eq!(settings.feeds.len(), 2);
        assert_eq!(settings.feeds[0].name, "a.org");
        assert!(settings.feeds[0].enabled);
        assert_eq!(settings.max_articles_per_channel, 20);
    }

    #[tokio::test]
    async fn concurrent_checks_are_serialised() {
        let storage = Storage::open_in_memory().await.unwrap();
        let (a, b) = tokio::join!(storage.check_db(), storage.check_db());
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_string_lossy().to_string();
        {
            let storage = Storage::open(&path).await.unwrap();
            let mut settings = storage.check_db().await.unwrap();
            settings.feeds.push(FeedSource::new("example.com/rss").unwrap());
            storage.save_settings(&settings).await.unwrap();
        }
        let storage = Storage::open(&path).await.unwrap();
        let settings = storage.check_db().await.unwrap();
        assert_eq!(settings.feeds.len(), 1);
    }
}
