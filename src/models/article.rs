use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::Tag;

/// Characters that separate terms in the keyword base.
const TERM_SEPARATORS: &[char] = &[
    ',', '.', '–', '"', '!', '?', ':', '-', '{', '}', '/', '\\', ';', '[', ']', '(', ')',
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    /// Position in the last materialised result set; reassigned on every call.
    #[serde(default)]
    pub id: usize,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover: Option<String>,
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub keywords: Keywords,

    #[serde(skip)]
    keyword_base: OnceLock<String>,
}

impl Article {
    pub fn new(title: String, url: String) -> Self {
        Self {
            title,
            url,
            ..Default::default()
        }
    }

    /// Lowercased title and description with punctuation folded into single spaces.
    pub fn keyword_base(&self) -> &str {
        self.keyword_base.get_or_init(|| {
            format!("{} {}", self.title, self.description)
                .to_lowercase()
                .split(|c: char| c.is_whitespace() || TERM_SEPARATORS.contains(&c))
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.keyword_base().split(' ').filter(|w| !w.is_empty())
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.iter().any(|t| t.name == tag.name)
    }
}

pub fn position_by_url(url: &str, haystack: &[Article]) -> Option<usize> {
    haystack.iter().position(|a| a.url == url)
}

/// Retained TF-IDF terms, highest weight first. Persisted as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keywords(Vec<(String, f64)>);

impl Keywords {
    /// Keeps the `limit` heaviest terms, ties broken by term for a stable order.
    pub fn top(weights: HashMap<String, f64>, limit: usize) -> Self {
        let mut items: Vec<(String, f64)> = weights.into_iter().collect();
        items.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.truncate(limit);
        Self(items)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(term, weight)| (term.as_str(), *weight))
    }

    pub fn get(&self, term: &str) -> Option<f64> {
        self.0.iter().find(|(t, _)| t == term).map(|(_, w)| *w)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Keywords {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(t, w)| (t.into(), w)).collect())
    }
}

impl Serialize for Keywords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (term, weight) in &self.0 {
            map.serialize_entry(term, weight)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Keywords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeywordsVisitor;

        impl<'de> Visitor<'de> for KeywordsVisitor {
            type Value = Keywords;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of term to weight")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Keywords, A::Error> {
                let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((term, weight)) = access.next_entry::<String, f64>()? {
                    items.push((term, weight));
                }
                Ok(Keywords(items))
            }
        }

        deserializer.deserialize_map(KeywordsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_base_folds_punctuation() {
        let mut art = Article::new("Rocket launch: SpaceX (again)!".into(), "u".into());
        art.description = "Next  window\n- Friday/Saturday".into();
        assert_eq!(
            art.keyword_base(),
            "rocket launch spacex again next window friday saturday"
        );
        assert_eq!(art.terms().count(), 8);
    }

    #[test]
    fn keywords_keep_heaviest_first() {
        let weights = HashMap::from([
            ("a".to_string(), 1.0),
            ("b".to_string(), 3.0),
            ("c".to_string(), 2.0),
        ]);
        let kw = Keywords::top(weights, 2);
        let terms: Vec<_> = kw.iter().map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["b", "c"]);
    }

    #[test]
    fn dates_round_trip_as_iso_strings() {
        let mut art = Article::new("t".into(), "https://x.org/1".into());
        art.date = Some("2024-03-01T10:00:00Z".parse().unwrap());
        art.keywords = Keywords::from_iter([("rocket", 5.0)]);

        let json = serde_json::to_string(&art).unwrap();
        assert!(json.contains("\"2024-03-01T10:00:00Z\""));
        assert!(json.contains("\"keywords\":{\"rocket\":5.0}"));

        let back: Article = serde_json::from_str(&json).unwrap();
        assert_eq!(back.date, art.date);
        assert_eq!(back.keywords.get("rocket"), Some(5.0));
    }
}
