//! Pluggable score function
//!
//! The score formula is deliberately not part of the storage contract; both
//! backends take it as a trait object so hosts can supply their own. The only
//! guaranteed properties are monotonicity (non-decreasing in likes,
//! non-increasing in dislikes) and a configurable default at zero votes.

use crate::config::ScoreConfig;

pub trait ScoreFunction: Send + Sync {
    /// Score reported for an actor with no votes at all.
    fn default_score(&self) -> f64;

    /// Score for the given counters. Must satisfy the monotonicity contract.
    fn score(&self, likes: u32, dislikes: u32) -> f64;
}

/// Default formula: linear in both counters, clamped to a configured range.
pub struct WeightedScore {
    cfg: ScoreConfig,
}

impl WeightedScore {
    pub fn new(cfg: ScoreConfig) -> Self {
        Self { cfg }
    }
}

impl ScoreFunction for WeightedScore {
    fn default_score(&self) -> f64 {
        self.cfg.default
    }

    fn score(&self, likes: u32, dislikes: u32) -> f64 {
        if likes == 0 && dislikes == 0 {
            return self.cfg.default;
        }

        let raw = self.cfg.default + self.cfg.like_weight * likes as f64
            - self.cfg.dislike_weight * dislikes as f64;

        raw.clamp(self.cfg.min, self.cfg.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> WeightedScore {
        WeightedScore::new(ScoreConfig::default())
    }

    #[test]
    fn zero_votes_yields_default() {
        let s = scorer();
        assert_eq!(s.score(0, 0), s.default_score());
    }

    #[test]
    fn monotone_in_likes_and_dislikes() {
        let s = scorer();
        assert!(s.score(2, 1) >= s.score(1, 1));
        assert!(s.score(1, 2) <= s.score(1, 1));
    }

    #[test]
    fn clamped_to_range() {
        let s = scorer();
        assert!(s.score(100_000, 0) <= ScoreConfig::default().max);
        assert!(s.score(0, 100_000) >= ScoreConfig::default().min);
    }
}
