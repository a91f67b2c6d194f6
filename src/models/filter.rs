use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Article, Tag};

/// Feed selector meaning "no restriction".
pub const ALL_FEEDS: &str = "all_rss";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    Learning,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleSource {
    Feed,
    Bookmarks,
    History,
}

impl FromStr for ArticleSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(Self::Feed),
            "bookmarks" => Ok(Self::Bookmarks),
            "history" => Ok(Self::History),
            other => Err(anyhow::anyhow!("'{}' is not a valid article source", other).into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticlesFilter {
    pub sort_type: Option<SortType>,
    pub search: Option<String>,
    pub tags: Option<Vec<Tag>>,
    pub feeds: Option<Vec<String>>,
}

impl ArticlesFilter {
    pub fn apply(&self, articles: Vec<Article>) -> Vec<Article> {
        articles.into_iter().filter(|a| self.matches(a)).collect()
    }

    pub fn matches(&self, article: &Article) -> bool {
        self.passes_feeds(article) && self.passes_search(article) && self.passes_tags(article)
    }

    fn passes_feeds(&self, article: &Article) -> bool {
        match &self.feeds {
            Some(feeds) if !feeds.is_empty() && !(feeds.len() == 1 && feeds[0] == ALL_FEEDS) => {
                feeds.iter().any(|f| *f == article.source_url)
            }
            _ => true,
        }
    }

    /// Any search word equal to a word of the title or description.
    fn passes_search(&self, article: &Article) -> bool {
        let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) else {
            return true;
        };
        let text = format!("{} {}", article.title, article.description).to_lowercase();
        let words: Vec<&str> = text.split(' ').collect();
        search
            .to_lowercase()
            .split(' ')
            .any(|needle| words.contains(&needle))
    }

    fn passes_tags(&self, article: &Article) -> bool {
        match &self.tags {
            Some(tags) if !tags.is_empty() => tags.iter().any(|t| article.has_tag(t)),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(title: &str, source_url: &str, tags: &[&str]) -> Article {
        let mut a = Article::new(title.to_string(), format!("https://x.org/{title}"));
        a.source_url = source_url.to_string();
        a.tags = tags.iter().map(|t| Tag::new(t).unwrap()).collect();
        a
    }

    #[test]
    fn all_feeds_selector_does_not_restrict() {
        let arts = vec![art("a", "f1", &[]), art("b", "f2", &[])];
        let filter = ArticlesFilter {
            feeds: Some(vec![ALL_FEEDS.to_string()]),
            ..Default::default()
        };
        assert_eq!(filter.apply(arts.clone()).len(), 2);

        let filter = ArticlesFilter {
            feeds: Some(vec!["f2".to_string()]),
            ..Default::default()
        };
        let out = filter.apply(arts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "b");
    }

    #[test]
    fn search_matches_whole_words_case_insensitively() {
        let arts = vec![art("Rocket news", "f", &[]), art("Garden tips", "f", &[])];
        let filter = ArticlesFilter {
            search: Some("ROCKET moon".to_string()),
            ..Default::default()
        };
        let out = filter.apply(arts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Rocket news");
    }

    #[test]
    fn tag_filter_needs_any_shared_tag() {
        let arts = vec![art("a", "f", &["space"]), art("b", "f", &["food"])];
        let filter = ArticlesFilter {
            tags: Some(vec![Tag::new("space").unwrap()]),
            ..Default::default()
        };
        assert_eq!(filter.apply(arts).len(), 1);
    }

    #[test]
    fn sort_type_parses_lowercase() {
        let s: SortType = serde_json::from_str("\"date\"").unwrap();
        assert_eq!(s, SortType::Date);
        assert!("nope".parse::<ArticleSource>().is_err());
    }
}
