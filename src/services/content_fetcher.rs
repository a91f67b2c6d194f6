use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::feed::decode_entities;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
/// Shorter extractions are navigation chrome, not an article.
const MIN_CONTENT_CHARS: usize = 200;
const EXCERPT_CHARS: usize = 200;
const TEXT_WIDTH: usize = 80;

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
});

/// Readable text of a web page, kept for offline reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineArticle {
    pub url: String,
    pub title: String,
    pub text_content: String,
    pub length: usize,
    pub excerpt: String,
}

pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetches a page and reduces it to readable text.
    pub async fn fetch_readable(&self, article_url: &str) -> Result<OfflineArticle> {
        url::Url::parse(article_url).map_err(|_| AppError::InvalidUrl(article_url.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));

        let response = self
            .client
            .get(article_url)
            .headers(headers)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", article_url, response.status());
            return Err(anyhow::anyhow!("Failed to fetch page: HTTP {}", response.status()).into());
        }

        let html = response.text().await?;
        extract_content(&html, article_url)
    }
}

impl Default for ContentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract readable content from HTML using html2text
fn extract_content(html: &str, url: &str) -> Result<OfflineArticle> {
    let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH)
        .map_err(|e| anyhow::anyhow!("Failed to convert HTML to text: {}", e))?;

    let cleaned: String = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let length = cleaned.chars().count();
    if length <= MIN_CONTENT_CHARS {
        tracing::debug!("Extracted content too short ({} chars)", length);
        return Err(anyhow::anyhow!("Extracted content too short ({} chars)", length).into());
    }

    let title = TITLE_RE
        .captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| decode_entities(m.as_str().trim()).into_owned())
        .unwrap_or_default();
    let excerpt = cleaned.chars().take(EXCERPT_CHARS).collect();

    Ok(OfflineArticle {
        url: url.to_string(),
        title,
        text_content: cleaned,
        length,
        excerpt,
    })
}
