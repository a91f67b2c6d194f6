use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::curation::PreferenceModel;
use crate::error::{check_cancelled, Result};
use crate::models::{Article, SeenHistory, SortType, UserSettings};

/// Ranked positions before this index are never replaced by discovery picks.
const PROTECTED_POSITIONS: usize = 5;

/// Dedup, ordering and random discovery over downloaded articles.
pub struct ArticleCurator {
    rng: StdRng,
}

impl ArticleCurator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Drops rated, duplicate and stale articles. Of several articles sharing a
    /// title (case-insensitive) one random survivor is kept in place.
    pub fn clean(
        &mut self,
        articles: Vec<Article>,
        seen: &SeenHistory,
        settings: &UserSettings,
    ) -> Vec<Article> {
        let started = Instant::now();
        let start_count = articles.len();
        let oldest = Utc::now() - Duration::days(settings.max_article_age_days as i64);

        let mut urls = HashSet::new();
        let (mut removed_seen, mut removed_dup_url, mut removed_old) = (0, 0, 0);
        let mut kept = Vec::with_capacity(articles.len());
        for article in articles {
            if seen.contains_url(&article.url) {
                removed_seen += 1;
            } else if !urls.insert(article.url.clone()) {
                removed_dup_url += 1;
            } else if article.date.is_some_and(|date| date <= oldest) {
                removed_old += 1;
            } else {
                kept.push(article);
            }
        }

        let mut by_title: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, article) in kept.iter().enumerate() {
            by_title.entry(article.title.to_lowercase()).or_default().push(idx);
        }
        let mut survivor = vec![true; kept.len()];
        for group in by_title.values().filter(|g| g.len() > 1) {
            let chosen = self.rng.gen_range(0..group.len());
            for (n, &idx) in group.iter().enumerate() {
                survivor[idx] = n == chosen;
            }
        }
        let removed_dup_title = survivor.iter().filter(|s| !**s).count();
        let mut survivor = survivor.into_iter();
        kept.retain(|_| survivor.next().unwrap_or(false));

        tracing::debug!(
            seen = removed_seen,
            dup_url = removed_dup_url,
            old = removed_old,
            dup_title = removed_dup_title,
            "Finished in {} ms, discarded {} articles",
            started.elapsed().as_millis(),
            start_count - kept.len()
        );
        kept
    }

    /// Shuffles, then orders by recency or by learned preference.
    ///
    /// Recency is used when asked for, or while the model has fewer than
    /// `no_sort_until` votes. Preference order mixes in random discovery picks.
    pub fn sort(
        &mut self,
        mut articles: Vec<Article>,
        sort_type: Option<SortType>,
        model: &PreferenceModel,
        settings: &UserSettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<Article>> {
        let started = Instant::now();
        articles.shuffle(&mut self.rng);

        let votes = model.primary.total_votes();
        if sort_type == Some(SortType::Date) || votes < settings.no_sort_until as i64 {
            if sort_type == Some(SortType::Date) {
                tracing::info!("Won't sort because of overrides: date");
            } else {
                tracing::info!(
                    "Won't sort because not enough articles have been rated (only {} out of {} required)",
                    votes,
                    settings.no_sort_until
                );
            }
            sort_by_date(&mut articles);
            return Ok(articles);
        }

        for article in articles.iter_mut() {
            article.score = model.score(article);
        }
        check_cancelled(cancel)?;

        let (sorted, discoveries) = self.rank_with_discovery(articles, settings.discover_ratio);
        tracing::info!(
            "Finished in {} ms ({} articles processed, {} discoveries)",
            started.elapsed().as_millis(),
            sorted.len(),
            discoveries
        );
        Ok(sorted)
    }

    /// Orders `shuffled` by score, replacing ranked positions past the protected
    /// head with the next unused article of the shuffled order with probability
    /// `ratio`. Every article appears exactly once in the result.
    fn rank_with_discovery(&mut self, shuffled: Vec<Article>, ratio: f64) -> (Vec<Article>, usize) {
        let mut ranked: Vec<usize> = (0..shuffled.len()).collect();
        ranked.sort_by(|&a, &b| {
            shuffled[b]
                .score
                .partial_cmp(&shuffled[a].score)
                .unwrap_or(Ordering::Equal)
        });

        let ratio = ratio.clamp(0.0, 1.0);
        let mut used = vec![false; shuffled.len()];
        let mut order = Vec::with_capacity(shuffled.len());
        let (mut next_ranked, mut next_random) = (0, 0);
        let mut discoveries = 0;

        for position in 0..shuffled.len() {
            if position > PROTECTED_POSITIONS && self.rng.gen_bool(ratio) {
                while used[next_random] {
                    next_random += 1;
                }
                used[next_random] = true;
                order.push(next_random);
                discoveries += 1;
                continue;
            }
            while used[ranked[next_ranked]] {
                next_ranked += 1;
            }
            used[ranked[next_ranked]] = true;
            order.push(ranked[next_ranked]);
        }

        let mut slots: Vec<Option<Article>> = shuffled.into_iter().map(Some).collect();
        let sorted = order.into_iter().filter_map(|idx| slots[idx].take()).collect();
        (sorted, discoveries)
    }
}

impl Default for ArticleCurator {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first; undated articles sink to the end.
pub fn sort_by_date(articles: &mut [Article]) {
    articles.sort_by(|a, b| match (a.date, b.date) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Fixed-size pages. No articles still yield one empty page.
pub fn paginate(articles: Vec<Article>, page_size: usize) -> Vec<Vec<Article>> {
    let page_size = page_size.max(1);
    let mut pages = Vec::new();
    let mut articles = articles.into_iter().peekable();
    while articles.peek().is_some() {
        pages.push(articles.by_ref().take(page_size).collect());
    }
    if pages.is_empty() {
        pages.push(Vec::new());
    }
    pages
}

/// Removes the article with `url` and pulls later articles forward so every page
/// but the last stays full. Emptied pages are dropped, except the first.
pub fn remove_from_pages(pages: &mut Vec<Vec<Article>>, url: &str) -> Option<Article> {
    let (page, pos) = pages.iter().enumerate().find_map(|(p, page)| {
        page.iter().position(|a| a.url == url).map(|pos| (p, pos))
    })?;
    let removed = pages[page].remove(pos);

    for p in page..pages.len().saturating_sub(1) {
        if pages[p + 1].is_empty() {
            break;
        }
        let moved = pages[p + 1].remove(0);
        pages[p].push(moved);
    }

    let mut index = 0;
    pages.retain(|page| {
        index += 1;
        index == 1 || !page.is_empty()
    });
    Some(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Keywords, LearningDb};

    fn art(n: usize) -> Article {
        Article::new(format!("Title {n}"), format!("https://x.org/{n}"))
    }

    fn arts(count: usize) -> Vec<Article> {
        (0..count).map(art).collect()
    }

    fn urls(articles: &[Article]) -> Vec<String> {
        articles.iter().map(|a| a.url.clone()).collect()
    }

    #[test]
    fn duplicate_title_is_collapsed() {
        let mut items = arts(5);
        items[3].title = "title 1".to_string();
        let mut curator = ArticleCurator::with_seed(7);
        let cleaned = curator.clean(items, &SeenHistory::default(), &UserSettings::default());
        assert_eq!(cleaned.len(), 4);
        let dupes = cleaned
            .iter()
            .filter(|a| a.title.to_lowercase() == "title 1")
            .count();
        assert_eq!(dupes, 1);
    }

    #[test]
    fn clean_drops_seen_duplicate_and_old_articles() {
        let mut items = arts(5);
        items.push(art(2));
        items[0].date = Some(Utc::now() - Duration::days(30));
        items[1].date = Some(Utc::now() - Duration::days(1));
        let mut seen = SeenHistory::default();
        seen.push_capped(art(4), 10);

        let mut curator = ArticleCurator::with_seed(1);
        let cleaned = curator.clean(items, &seen, &UserSettings::default());
        assert_eq!(
            urls(&cleaned),
            vec!["https://x.org/1", "https://x.org/2", "https://x.org/3"]
        );
    }

    #[test]
    fn clean_is_idempotent() {
        let mut items = arts(30);
        for n in (0..30).step_by(3) {
            items[n].title = "Same".to_string();
        }
        items.extend(arts(10));
        let seen = SeenHistory::default();
        let settings = UserSettings::default();
        let mut curator = ArticleCurator::with_seed(3);

        let once = curator.clean(items, &seen, &settings);
        let twice = curator.clean(once.clone(), &seen, &settings);
        assert_eq!(urls(&once), urls(&twice));
    }

    #[test]
    fn date_sort_until_enough_votes() {
        let mut items = arts(4);
        items[0].date = Some("2024-01-01T00:00:00Z".parse().unwrap());
        items[2].date = Some("2024-03-01T00:00:00Z".parse().unwrap());
        items[3].date = Some("2024-02-01T00:00:00Z".parse().unwrap());

        let mut curator = ArticleCurator::with_seed(5);
        let sorted = curator
            .sort(
                items,
                None,
                &PreferenceModel::default(),
                &UserSettings::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(
            urls(&sorted),
            vec![
                "https://x.org/2",
                "https://x.org/3",
                "https://x.org/0",
                "https://x.org/1"
            ]
        );
    }

    #[test]
    fn preference_sort_ranks_by_score() {
        let mut items = arts(6);
        for (n, a) in items.iter_mut().enumerate() {
            a.keywords = Keywords::from_iter([("rocket", n as f64)]);
        }
        let model = PreferenceModel {
            primary: LearningDb {
                upvotes: 60,
                downvotes: 0,
                keywords: HashMap::from([("rocket".to_string(), 1.0)]),
            },
            secondary: LearningDb::default(),
        };

        let mut curator = ArticleCurator::with_seed(9);
        let sorted = curator
            .sort(
                items,
                Some(SortType::Learning),
                &model,
                &UserSettings::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(sorted[0].url, "https://x.org/5");
        assert_eq!(sorted[0].score, 5.0);
        assert_eq!(sorted[5].url, "https://x.org/0");
    }

    #[test]
    fn discovery_rate_tracks_ratio_and_keeps_every_article() {
        let mut items = arts(2000);
        for (n, a) in items.iter_mut().enumerate() {
            a.score = n as f64;
        }
        let mut curator = ArticleCurator::with_seed(11);
        let (sorted, discoveries) = curator.rank_with_discovery(items, 0.2);

        assert_eq!(sorted.len(), 2000);
        let unique: HashSet<_> = sorted.iter().map(|a| a.url.clone()).collect();
        assert_eq!(unique.len(), 2000);
        assert_eq!(sorted[0].url, "https://x.org/1999");

        let share = discoveries as f64 / (2000 - PROTECTED_POSITIONS - 1) as f64;
        assert!((share - 0.2).abs() < 0.04, "share was {share}");
    }

    #[test]
    fn cancelled_sort_is_aborted() {
        let model = PreferenceModel {
            primary: LearningDb {
                upvotes: 100,
                ..Default::default()
            },
            secondary: LearningDb::default(),
        };
        let token = CancellationToken::new();
        token.cancel();
        let err = ArticleCurator::with_seed(0)
            .sort(arts(3), None, &model, &UserSettings::default(), &token)
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[test]
    fn pages_reconstruct_the_input() {
        let pages = paginate(arts(45), 20);
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![20, 20, 5]);
        let flat: Vec<Article> = pages.into_iter().flatten().collect();
        assert_eq!(urls(&flat), urls(&arts(45)));

        let empty = paginate(Vec::new(), 20);
        assert_eq!(empty.len(), 1);
        assert!(empty[0].is_empty());
    }

    #[test]
    fn removal_refills_pages_from_the_next() {
        let mut pages = paginate(arts(5), 2);
        let removed = remove_from_pages(&mut pages, "https://x.org/1").unwrap();
        assert_eq!(removed.url, "https://x.org/1");
        let layout: Vec<Vec<String>> = pages.iter().map(|p| urls(p)).collect();
        assert_eq!(
            layout,
            vec![
                vec!["https://x.org/0", "https://x.org/2"],
                vec!["https://x.org/3", "https://x.org/4"],
            ]
        );
        assert!(remove_from_pages(&mut pages, "https://x.org/missing").is_none());
    }

    #[test]
    fn first_page_survives_when_emptied() {
        let mut pages = paginate(arts(1), 20);
        remove_from_pages(&mut pages, "https://x.org/0");
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_empty());
    }
}
