use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::db::keys;
use crate::error::Result;
use crate::models::{now_millis, Article, ArticleSource, ArticlesFilter, NotificationCache};
use crate::services::backup::{rotate_and_write, Backup};

/// Share of `article_cache_time` after which a background sync refreshes early.
const EARLY_EXPIRY: f64 = 0.75;
const HOUR_MS: i64 = 60 * 60 * 1000;
const NEW_ARTICLES: &str = "New articles";

/// Delivers user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        tracing::info!(title, "{}", body);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub articles: usize,
    /// Url of the article a notification was sent for.
    pub notified: Option<String>,
    pub backup_written: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run held the lock.
    AlreadyRunning,
    Disabled,
    Completed(RunReport),
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        tracing::info!("Unlocking background lock now.");
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Periodic background work: sync, notifications, offline copies and backups.
/// At most one run is in flight; overlapping calls return immediately.
pub struct Scheduler {
    running: AtomicBool,
    notifier: Arc<dyn Notifier>,
    backup_dir: PathBuf,
}

impl Scheduler {
    pub fn new(notifier: Arc<dyn Notifier>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            running: AtomicBool::new(false),
            notifier,
            backup_dir: backup_dir.into(),
        }
    }

    pub async fn run(&self, app: &Mutex<App>, cancel: &CancellationToken) -> Result<RunOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Another background task already running, exiting now..");
            return Ok(RunOutcome::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);
        tracing::info!("Background lock locked.");

        let mut app = app.lock().await;
        let settings = app.settings().clone();
        if settings.disable_background_tasks {
            tracing::info!("Background tasks disabled, exiting...");
            return Ok(RunOutcome::Disabled);
        }

        let mut report = RunReport::default();
        if !settings.enable_background_sync && !settings.enable_notifications {
            tracing::info!("Background sync and notifications disabled.");
        } else if let Err(e) = self.sync_and_notify(&mut app, &mut report, cancel).await {
            if e.is_aborted() {
                tracing::info!("Background sync aborted");
            } else {
                tracing::error!("Exception on background task: {}", e);
            }
        }

        if settings.enable_automatic_backups {
            self.auto_backup(&mut app, &mut report).await;
        }
        Ok(RunOutcome::Completed(report))
    }

    async fn sync_and_notify(
        &self,
        app: &mut App,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let settings = app.settings().clone();
        if settings.enable_background_sync {
            tracing::debug!("Background sync is enabled, checking cache...");
            let cache = app.storage().article_cache().await?;
            if cache.age_minutes(now_millis()) >= settings.article_cache_time as f64 * EARLY_EXPIRY {
                tracing::info!("Cache will expire soon, invalidating cache to force re-sync...");
                app.expire_article_cache().await?;
            }
        }

        let articles = app
            .get_articles(ArticleSource::Feed, &ArticlesFilter::default(), cancel)
            .await?;
        report.articles = articles.len();

        if settings.enable_notifications {
            self.notify_new_article(app, &articles, report).await?;
        } else {
            tracing::info!("Notifications disabled.");
        }

        if settings.enable_background_sync && settings.enable_offline_reading {
            app.offline_cache()
                .try_do_offline_save(&articles, app.settings())
                .await;
        }
        Ok(())
    }

    async fn notify_new_article(
        &self,
        app: &App,
        articles: &[Article],
        report: &mut RunReport,
    ) -> Result<()> {
        let mut cache: NotificationCache = app.storage().get(keys::NOTIFICATIONS).await?;
        let now = now_millis();
        let since = cache.minutes_since_last(now);
        let period = app.settings().new_articles_notification_period as f64;
        if since < period {
            tracing::info!(
                "Will not show notification, time remaining: {:.0} mins.",
                period - since
            );
            return Ok(());
        }

        cache.timestamp = now;
        match cache.pick(articles).cloned() {
            Some(article) => {
                cache.record(&article);
                if let Err(e) = self.notifier.notify(NEW_ARTICLES, &article.title) {
                    // left unrecorded so the next run tries again
                    tracing::error!("Failed to show notification: {}", e);
                    return Ok(());
                }
                report.notified = Some(article.url);
            }
            None => tracing::warn!("No available article to show."),
        }
        app.storage().set(keys::NOTIFICATIONS, &cache).await
    }

    async fn auto_backup(&self, app: &mut App, report: &mut RunReport) {
        let settings = app.settings();
        let remaining = now_millis()
            - settings.last_backup_timestamp
            - settings.automatic_backup_period as i64 * HOUR_MS;
        if remaining < 0 {
            tracing::info!(
                "Remaining time until next auto-backup: {:.2} hrs.",
                -remaining as f64 / HOUR_MS as f64
            );
            return;
        }

        let dir = settings
            .automatic_backup_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.backup_dir.clone());
        tracing::info!(dir = %dir.display(), "Creating auto-backup now..");

        match write_backup(app, &dir).await {
            Ok(()) => report.backup_written = true,
            Err(e) => tracing::error!("AutoBackup failed! {}", e),
        }
        if let Err(e) = app
            .update_settings(|s| s.last_backup_timestamp = now_millis())
            .await
        {
            tracing::error!("Cannot record backup time: {}", e);
        }
    }
}

async fn write_backup(app: &App, dir: &Path) -> Result<()> {
    let contents = Backup::create(app.storage()).await?;
    rotate_and_write(dir, &contents).await
}
