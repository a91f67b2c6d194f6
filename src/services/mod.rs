pub mod backup;
mod content_fetcher;
mod offline_cache;
mod scheduler;

pub use backup::{Backup, Imported};
pub use content_fetcher::{ContentFetcher, OfflineArticle};
pub use offline_cache::OfflineCache;
pub use scheduler::{LogNotifier, Notifier, RunOutcome, RunReport, Scheduler};
