use crate::db::{keys, Storage};
use crate::error::Result;
use crate::models::{Article, LearningDb, LearningStatus, SeenHistory, UserSettings, Vote};

/// Keyword preferences learned from the user's votes.
///
/// `primary` scores articles. `secondary` accumulates the same votes starting from
/// a negative baseline and replaces `primary` once it has seen more than
/// `rotate_db_after` votes, so old ratings eventually stop counting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceModel {
    pub primary: LearningDb,
    pub secondary: LearningDb,
}

impl PreferenceModel {
    pub async fn load(storage: &Storage) -> Result<Self> {
        Ok(Self {
            primary: storage.get(keys::LEARNING_DB).await?,
            secondary: storage.get(keys::LEARNING_DB_SECONDARY).await?,
        })
    }

    pub async fn save(&self, storage: &Storage) -> Result<()> {
        storage.set(keys::LEARNING_DB, &self.primary).await?;
        storage.set(keys::LEARNING_DB_SECONDARY, &self.secondary).await
    }

    pub fn score(&self, article: &Article) -> f64 {
        article
            .keywords
            .iter()
            .filter_map(|(term, weight)| self.primary.keywords.get(term).map(|learned| weight * learned))
            .sum()
    }

    /// Records a vote. Returns true when the secondary database took over.
    pub fn rate(
        &mut self,
        article: &Article,
        vote: Vote,
        seen: &mut SeenHistory,
        settings: &mut UserSettings,
    ) -> bool {
        // a vote against the prevailing direction weighs more
        let (same, opposite) = match vote {
            Vote::Up => {
                settings.total_upvotes += 1;
                (self.primary.upvotes, self.primary.downvotes)
            }
            Vote::Down => {
                settings.total_downvotes += 1;
                (self.primary.downvotes, self.primary.upvotes)
            }
        };
        // counts go negative after a rotation, so only real votes weigh in
        let rating = vote.sign() * (opposite.max(0) + 1) as f64 / (same.max(0) + 1) as f64;

        self.primary.add_vote(vote);
        self.secondary.add_vote(vote);
        for (term, weight) in article.keywords.iter() {
            self.primary.add_keyword(term, rating * weight);
            self.secondary.add_keyword(term, rating * weight);
        }

        seen.push_capped(article.clone(), settings.seen_history_length);

        if self.secondary.total_votes() > settings.rotate_db_after as i64 {
            tracing::info!("Rotating DB and wiping secondary DB now..");
            self.primary = std::mem::replace(
                &mut self.secondary,
                LearningDb::seeded(settings.rotate_db_after),
            );
            return true;
        }
        false
    }

    pub fn status(&self, settings: &UserSettings) -> LearningStatus {
        let votes = self.primary.total_votes();
        let ratio =
            (self.primary.upvotes.max(0) + 1) as f64 / (self.primary.downvotes.max(0) + 1) as f64;

        LearningStatus {
            total_upvotes: settings.total_upvotes,
            total_downvotes: settings.total_downvotes,
            vote_ratio: format!("{:.2}", ratio),
            sorting_enabled: votes >= settings.no_sort_until as i64,
            sorting_enabled_in: settings.no_sort_until as i64 - votes,
            learning_lifetime: settings.rotate_db_after,
            learning_lifetime_remaining: settings.rotate_db_after as i64 - votes,
        }
    }
}
