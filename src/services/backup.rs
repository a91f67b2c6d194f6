use std::path::Path;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{keys, Storage, DB_VERSION};
use crate::error::{AppError, Result};
use crate::feed::{export_opml, parse_opml};
use crate::models::{now_millis, Article, LearningDb, UserSettings};

pub const LATEST_BACKUP: &str = "backup-latest.json";
/// Older automatic backups, newest first. The last one is dropped on rotation.
const ROTATED_BACKUPS: [&str; 3] = ["backup-1.json", "backup-2.json", "backup-3.json"];

/// Export document. Every section is optional on import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Backup {
    #[serde(rename = "Version")]
    pub version: Option<String>,
    #[serde(rename = "TimeStamp")]
    pub timestamp: Option<i64>,
    #[serde(rename = "UserSettings")]
    pub user_settings: Option<UserSettings>,
    #[serde(rename = "LearningDB")]
    pub learning_db: Option<LearningDb>,
    #[serde(rename = "Saved")]
    pub saved: Option<Vec<Article>>,
}

/// What an import turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Imported {
    Backup,
    /// OPML subscription list, with the number of feeds added.
    Opml(usize),
}

impl Backup {
    pub async fn make(storage: &Storage) -> Result<Self> {
        let settings = storage.check_db().await?;
        Ok(Self {
            version: Some(DB_VERSION.to_string()),
            timestamp: Some(now_millis()),
            user_settings: Some(settings),
            learning_db: Some(storage.get(keys::LEARNING_DB).await?),
            saved: Some(storage.get(keys::SAVED).await?),
        })
    }

    pub async fn create(storage: &Storage) -> Result<String> {
        Ok(serde_json::to_string(&Self::make(storage).await?)?)
    }
}

pub fn export_feeds(settings: &UserSettings) -> Result<String> {
    export_opml(&settings.feeds)
}

fn major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

async fn load_json(storage: &Storage, backup: Backup) -> Result<()> {
    match backup.timestamp.and_then(|ts| Utc.timestamp_millis_opt(ts).single()) {
        Some(at) => tracing::info!("Loading from {}, ver.: {:?}", at.to_rfc3339(), backup.version),
        None => tracing::info!("Loading from (unknown date)"),
    }

    let version = backup
        .version
        .ok_or_else(|| AppError::Backup("Cannot determine backup version.".to_string()))?;
    if major(&version).is_none() || major(&version) != major(DB_VERSION) {
        return Err(AppError::Backup(format!(
            "Version mismatch! Backup: {}, current: {}",
            version, DB_VERSION
        )));
    }

    if let Some(mut settings) = backup.user_settings {
        settings.sort_lists();
        storage.save_settings(&settings).await?;
    }
    if let Some(learning_db) = backup.learning_db {
        storage.set(keys::LEARNING_DB, &learning_db).await?;
    }
    if let Some(saved) = backup.saved {
        storage.set(keys::SAVED, &saved).await?;
    }
    Ok(())
}

async fn load_opml(storage: &Storage, text: &str) -> Result<usize> {
    let feeds = parse_opml(text)?;
    let mut settings = storage.check_db().await?;
    let mut added = 0;
    for feed in feeds {
        if settings.feed_index(&feed.url).is_some() {
            tracing::debug!("(opml) skipping (already in feedlist) '{}'", feed.url);
            continue;
        }
        settings.feeds.push(feed);
        added += 1;
    }
    settings.sort_lists();
    storage.save_settings(&settings).await?;
    Ok(added)
}

/// Loads a JSON backup, falling back to OPML when the text is not a usable backup.
pub async fn try_load_backup(storage: &Storage, text: &str) -> Result<Imported> {
    let json_err = match serde_json::from_str::<Backup>(text) {
        Ok(backup) => match load_json(storage, backup).await {
            Ok(()) => {
                storage.check_db().await?;
                tracing::info!("Backup loaded.");
                return Ok(Imported::Backup);
            }
            Err(e) => e,
        },
        Err(e) => e.into(),
    };

    tracing::warn!("Failed to load backup, will try OPML format parsing: {}", json_err);
    match load_opml(storage, text).await {
        Ok(added) => {
            tracing::info!("Backup/Import (OPML) loaded, {} new feed(s).", added);
            Ok(Imported::Opml(added))
        }
        Err(e) => {
            tracing::error!("Failed to load backup both as JSON and OPML: {}", e);
            Err(AppError::Backup(format!("{}; {}", json_err, e)))
        }
    }
}

/// Shifts `latest -> 1 -> 2 -> 3` (dropping the old 3) and writes `contents` as latest.
pub async fn rotate_and_write(dir: &Path, contents: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let oldest = dir.join(ROTATED_BACKUPS[ROTATED_BACKUPS.len() - 1]);
    if tokio::fs::try_exists(&oldest).await? {
        tokio::fs::remove_file(&oldest).await?;
    }
    for pair in ROTATED_BACKUPS.windows(2).rev() {
        let from = dir.join(pair[0]);
        if tokio::fs::try_exists(&from).await? {
            tokio::fs::rename(&from, dir.join(pair[1])).await?;
        }
    }
    let latest = dir.join(LATEST_BACKUP);
    if tokio::fs::try_exists(&latest).await? {
        tokio::fs::rename(&latest, dir.join(ROTATED_BACKUPS[0])).await?;
    }

    tracing::debug!("writing now");
    tokio::fs::write(&latest, contents).await?;
    Ok(())
}
