mod article;
mod cache;
mod feed;
mod filter;
mod learning;
mod settings;
mod tag;

pub use article::{position_by_url, Article, Keywords};
pub use cache::{ArticleCache, NotificationCache, SeenHistory};
pub use feed::FeedSource;
pub use filter::{ArticleSource, ArticlesFilter, SortType};
pub use learning::{LearningDb, LearningStatus, Vote};
pub use settings::{RemovedTag, UserSettings};
pub use tag::Tag;

/// Wall clock in epoch milliseconds, the unit every persisted timestamp uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
