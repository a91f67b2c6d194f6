use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    pub fn sign(self) -> f64 {
        match self {
            Vote::Up => 1.0,
            Vote::Down => -1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningDb {
    pub upvotes: i64,
    pub downvotes: i64,
    #[serde(default)]
    pub keywords: HashMap<String, f64>,
}

impl LearningDb {
    /// Fresh secondary database, starting in debt so it cannot take over immediately.
    pub fn seeded(rotate_db_after: u32) -> Self {
        let seed = -(rotate_db_after as i64) / 4;
        Self {
            upvotes: seed,
            downvotes: seed,
            keywords: HashMap::new(),
        }
    }

    pub fn total_votes(&self) -> i64 {
        self.upvotes + self.downvotes
    }

    pub fn add_vote(&mut self, vote: Vote) {
        match vote {
            Vote::Up => self.upvotes += 1,
            Vote::Down => self.downvotes += 1,
        }
    }

    pub fn add_keyword(&mut self, term: &str, rating: f64) {
        *self.keywords.entry(term.to_string()).or_insert(0.0) += rating;
    }
}

/// Summary of the learning progress shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStatus {
    pub total_upvotes: u64,
    pub total_downvotes: u64,
    pub vote_ratio: String,
    pub sorting_enabled: bool,
    pub sorting_enabled_in: i64,
    pub learning_lifetime: u32,
    pub learning_lifetime_remaining: i64,
}
