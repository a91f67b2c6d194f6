use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Tag;

/// Failure counter ceiling.
pub const MAX_FAILURES: u32 = 9999;
/// Feeds at or past this many consecutive failures are considered unhealthy.
pub const UNHEALTHY_AFTER: u32 = 4;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.)?(?:rss\.)?([^/]+\.[^/]+)(?:/|$)")
        .expect("feed name pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub url: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub suppress_images: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

fn default_enabled() -> bool {
    true
}

impl FeedSource {
    /// Builds a feed from a user supplied url, deriving its display name from the host.
    pub fn new(url: &str) -> Result<Self> {
        let url = url.trim();
        let mut name = NAME_RE
            .captures(url)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| AppError::InvalidUrl(url.to_string()))?;

        // credentials embedded in the url must not leak into the name
        if let Some(at) = name.find('@') {
            name = name[at + 1..].to_string();
        }

        let lower = url.to_ascii_lowercase();
        let url = if lower.starts_with("http://") || lower.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };

        Ok(Self {
            url,
            name,
            enabled: true,
            suppress_images: false,
            tags: Vec::new(),
            consecutive_failures: 0,
        })
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.iter().any(|t| t.name == tag.name)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures < UNHEALTHY_AFTER
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures != 0 {
            tracing::debug!(feed = %self.url, "reset consecutive failures");
        }
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = (self.consecutive_failures + 1).min(MAX_FAILURES);
        tracing::debug!(
            feed = %self.url,
            failures = self.consecutive_failures,
            "increased consecutive failures"
        );
    }
}
