use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("Cannot retrieve data, possibly unknown key '{0}'")]
    MissingKey(String),

    #[error("Aborted by cancellation token")]
    Aborted,

    #[error("Timeout: answer took too long")]
    Timeout,

    #[error("Cannot parse feed: {0}")]
    Parse(String),

    #[error("Faulty feed: {0}")]
    Feed(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("OPML error: {0}")]
    Opml(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// User-initiated cancellation, not worth reporting as a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, AppError::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Checkpoint for cooperative cancellation.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Aborted);
    }
    Ok(())
}

