use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::{check_cancelled, Result};
use crate::models::{Article, Keywords};

/// Terms kept per article.
pub const KEYWORDS_PER_ARTICLE: usize = 20;

/// Fills `article.keywords` with TF-IDF weighted terms.
///
/// Inverse document frequency is computed within each source feed, so a term is
/// rare relative to what that feed usually publishes:
///
/// ```text
/// tf  = count(term, article) / terms(article)
/// idf = ln(docs(feed) / (1 + docs_containing(term, feed))) + 1
/// weight = tf * idf * 1000
/// ```
pub fn extract_keywords(
    articles: &mut [Article],
    progress: Option<&dyn Fn(f32)>,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let started = Instant::now();
    tracing::info!("Extracting keywords..");

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, article) in articles.iter().enumerate() {
        groups.entry(article.source.clone()).or_default().push(idx);
    }

    // pass 1: term counts per article, document frequency per feed
    let mut term_counts: Vec<HashMap<String, usize>> = Vec::with_capacity(articles.len());
    for article in articles.iter() {
        let mut counts = HashMap::new();
        for term in article.terms() {
            *counts.entry(term.to_string()).or_insert(0) += 1;
        }
        term_counts.push(counts);
    }

    let mut doc_freq: HashMap<&str, HashMap<&str, usize>> = HashMap::new();
    for (source, members) in &groups {
        let freq = doc_freq.entry(source.as_str()).or_default();
        for &idx in members {
            for term in term_counts[idx].keys() {
                *freq.entry(term.as_str()).or_insert(0) += 1;
            }
        }
    }

    tracing::debug!("pass 1 finished");
    if let Some(report) = progress {
        report(0.2);
    }
    if let Some(token) = cancel {
        check_cancelled(token)?;
    }

    // pass 2: weights
    let total_groups = groups.len();
    let mut computed: Vec<(usize, Keywords)> = Vec::with_capacity(articles.len());
    for (done, (source, members)) in groups.iter().enumerate() {
        tracing::debug!(feed = %source, "pass 2");
        let freq = &doc_freq[source.as_str()];
        let docs = members.len() as f64;

        for &idx in members {
            let counts = &term_counts[idx];
            let total_terms: usize = counts.values().sum();
            if total_terms == 0 {
                computed.push((idx, Keywords::default()));
                continue;
            }

            let weights: HashMap<String, f64> = counts
                .iter()
                .map(|(term, &count)| {
                    let tf = count as f64 / total_terms as f64;
                    let containing = freq.get(term.as_str()).copied().unwrap_or(0) as f64;
                    let idf = (docs / (1.0 + containing)).ln() + 1.0;
                    (term.clone(), tf * idf * 1000.0)
                })
                .collect();
            computed.push((idx, Keywords::top(weights, KEYWORDS_PER_ARTICLE)));
        }

        if let Some(report) = progress {
            report(0.2 + 0.8 * (done + 1) as f32 / total_groups as f32);
        }
        if let Some(token) = cancel {
            check_cancelled(token)?;
        }
    }

    for (idx, keywords) in computed {
        articles[idx].keywords = keywords;
    }

    tracing::info!(
        "Keywords extracted for {} articles in {} ms",
        articles.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn art(source: &str, title: &str, description: &str) -> Article {
        let mut a = Article::new(title.to_string(), format!("https://{source}/{title}"));
        a.source = source.to_string();
        a.description = description.to_string();
        a
    }

    fn corpus() -> Vec<Article> {
        vec![
            art("a.org", "rocket launch", "rocket rocket moon"),
            art("a.org", "garden tips", "moon garden"),
            art("b.org", "rocket news", "nothing else"),
        ]
    }

    #[test]
    fn weights_follow_tf_idf_within_each_feed() {
        let mut arts = corpus();
        extract_keywords(&mut arts, None, None).unwrap();

        // a.org: 2 docs, "rocket" appears in 1, 3 of 5 terms
        let expected = 3.0 / 5.0 * ((2.0_f64 / 2.0).ln() + 1.0) * 1000.0;
        let rocket = arts[0].keywords.get("rocket").unwrap();
        assert!((rocket - expected).abs() < 1e-9);

        // "moon" is in both a.org docs
        let moon = arts[0].keywords.get("moon").unwrap();
        let expected = 1.0 / 5.0 * ((2.0_f64 / 3.0).ln() + 1.0) * 1000.0;
        assert!((moon - expected).abs() < 1e-9);

        // b.org is its own corpus of one
        let rocket_b = arts[2].keywords.get("rocket").unwrap();
        let expected = 1.0 / 4.0 * ((1.0_f64 / 2.0).ln() + 1.0) * 1000.0;
        assert!((rocket_b - expected).abs() < 1e-9);

        let first = arts[0].keywords.iter().next().unwrap();
        assert_eq!(first.0, "rocket");
    }

    #[test]
    fn extraction_is_deterministic_and_capped() {
        let long: String = (0..50).map(|n| format!("word{n} ")).collect();
        let mut arts = corpus();
        arts.push(art("a.org", "many words", &long));
        let mut again = arts.clone();

        extract_keywords(&mut arts, None, None).unwrap();
        extract_keywords(&mut again, None, None).unwrap();

        assert_eq!(arts[3].keywords.len(), KEYWORDS_PER_ARTICLE);
        for (a, b) in arts.iter().zip(again.iter()) {
            assert_eq!(a.keywords, b.keywords);
        }
        let weights: Vec<f64> = arts[3].keywords.iter().map(|(_, w)| w).collect();
        assert!(weights.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn reports_progress_and_honours_cancellation() {
        let seen = RefCell::new(Vec::new());
        let report: &dyn Fn(f32) = &|p: f32| seen.borrow_mut().push(p);
        let mut arts = corpus();
        extract_keywords(&mut arts, Some(report), None).unwrap();
        let seen = seen.into_inner();
        assert_eq!(seen.first().copied(), Some(0.2));
        assert!((seen.last().unwrap() - 1.0).abs() < 1e-6);

        let token = CancellationToken::new();
        token.cancel();
        let mut arts = corpus();
        let err = extract_keywords(&mut arts, None, Some(&token)).unwrap_err();
        assert!(err.is_aborted());
        assert!(arts[0].keywords.is_empty());
    }
}
