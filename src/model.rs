//! Core data types shared by the storage backends and the service

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of anyone who can vote or be voted on.
pub type ActorId = Uuid;

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A cast vote's direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteValue {
    Like,
    Dislike,
}

impl VoteValue {
    /// Wire/storage representation: 1 = like, 0 = dislike.
    pub fn as_int(self) -> i64 {
        match self {
            VoteValue::Like => 1,
            VoteValue::Dislike => 0,
        }
    }

    pub fn from_int(v: i64) -> Self {
        if v == 1 {
            VoteValue::Like
        } else {
            VoteValue::Dislike
        }
    }
}

/// Result of submitting a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    /// No prior edge existed; a new vote was recorded.
    Created,
    /// An opposite vote existed; one unit moved between counters.
    Changed,
    /// The same vote existed; the edge was cleared.
    Removed,
}

/// A reputation snapshot for one actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    pub id: ActorId,
    pub name: Option<String>,
    pub likes: u32,
    pub dislikes: u32,
    pub score: f64,
    pub seen: bool,
}

impl Reputation {
    pub fn votes(&self) -> u32 {
        self.likes + self.dislikes
    }
}

/// The persisted edge from one voter to one target.
///
/// `value: None` is an explicit retraction: the edge row survives so its
/// `last_time` keeps feeding the re-vote cooldowns.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteState {
    pub value: Option<VoteValue>,
    pub reason: Option<String>,
    pub last_time: i64,
}

/// One audit-log line for a target's profile history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteLogEntry {
    pub time: i64,
    pub value: VoteValue,
    pub reason: Option<String>,
    /// Absent when the entry is read anonymized.
    pub voter_name: Option<String>,
}

/// Ranking category for top lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopCategory {
    Score,
    Likes,
    Dislikes,
    Votes,
}

impl Default for TopCategory {
    fn default() -> Self {
        TopCategory::Score
    }
}
