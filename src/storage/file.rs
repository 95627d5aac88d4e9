//! Single-file YAML backend
//!
//! The whole document lives in memory behind an `RwLock` and is rewritten to
//! disk after every mutation. That serializes all writes through one point,
//! which is the contract here; it also means resolutions against different
//! targets do not run in parallel. Known ceiling, not a defect.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RepError;
use crate::model::{
    ActorId, Reputation, TopCategory, VoteLogEntry, VoteOutcome, VoteState, VoteValue,
};
use crate::score::ScoreFunction;
use crate::storage::{Storage, REMOVED_REASON};

/// Retained log entries per target, as a multiple of the display limit.
const LOG_KEEP_FACTOR: u32 = 3;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    players: BTreeMap<String, PlayerNode>,
    /// voter id -> target id -> edge
    #[serde(default)]
    votes: BTreeMap<String, BTreeMap<String, VoteNode>>,
    /// target id -> tag -> count
    #[serde(default)]
    tags: BTreeMap<String, BTreeMap<String, i64>>,
    /// target id -> entries (pruned oldest-first)
    #[serde(default)]
    vote_log: BTreeMap<String, Vec<LogNode>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    likes: i64,
    #[serde(default)]
    dislikes: i64,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    seen: bool,
    #[serde(default)]
    ip_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VoteNode {
    #[serde(default)]
    value: Option<i64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    last_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogNode {
    time: i64,
    value: i64,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    voter: Option<String>,
    #[serde(default)]
    voter_name: Option<String>,
}

pub struct FileStorage {
    path: PathBuf,
    doc: RwLock<Document>,
    score: Arc<dyn ScoreFunction>,
    log_keep: u32,
}

impl FileStorage {
    pub fn open(
        path: &Path,
        score: Arc<dyn ScoreFunction>,
        history_limit: u32,
    ) -> Result<Self, RepError> {
        Ok(Self {
            path: path.to_path_buf(),
            doc: RwLock::new(Document::default()),
            score,
            log_keep: history_limit.max(1) * LOG_KEEP_FACTOR,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Document>, RepError> {
        self.doc
            .read()
            .map_err(|e| RepError::Internal(format!("document lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Document>, RepError> {
        self.doc
            .write()
            .map_err(|e| RepError::Internal(format!("document lock poisoned: {e}")))
    }

    fn save(&self, doc: &Document) -> Result<(), RepError> {
        let body = serde_yaml::to_string(doc)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    fn ensure_player<'a>(
        doc: &'a mut Document,
        actor: ActorId,
        name: Option<&str>,
        default_score: f64,
    ) -> &'a mut PlayerNode {
        let node = doc
            .players
            .entry(actor.to_string())
            .or_insert_with(|| PlayerNode {
                name: None,
                likes: 0,
                dislikes: 0,
                score: default_score,
                seen: false,
                ip_hash: None,
            });
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            node.name = Some(name.to_string());
        }
        node
    }

    fn add_tag_count(doc: &mut Document, target: ActorId, tag: Option<&str>, delta: i64) {
        let Some(tag) = tag.filter(|t| !t.trim().is_empty()) else {
            return;
        };
        let counts = doc.tags.entry(target.to_string()).or_default();
        let slot = counts.entry(tag.to_string()).or_insert(0);
        *slot = (*slot + delta).max(0);
    }

    fn add_vote_log(
        doc: &mut Document,
        target: ActorId,
        voter: ActorId,
        value: VoteValue,
        reason: Option<&str>,
        at_ms: i64,
        keep: u32,
    ) {
        let log = doc.vote_log.entry(target.to_string()).or_default();
        log.push(LogNode {
            time: at_ms,
            value: value.as_int(),
            reason: reason.map(str::to_string),
            voter: Some(voter.to_string()),
            voter_name: None,
        });

        // prune oldest-first immediately after insertion
        if log.len() > keep as usize {
            log.sort_by(|a, b| b.time.cmp(&a.time));
            log.truncate(keep as usize);
        }
    }

    fn reputation_from(id: ActorId, node: &PlayerNode) -> Reputation {
        Reputation {
            id,
            name: node.name.clone(),
            likes: node.likes.max(0) as u32,
            dislikes: node.dislikes.max(0) as u32,
            score: node.score,
            seen: node.seen,
        }
    }

    fn seen_players(doc: &Document) -> Vec<Reputation> {
        doc.players
            .iter()
            .filter(|(_, node)| node.seen)
            .filter_map(|(key, node)| {
                key.parse::<ActorId>()
                    .ok()
                    .map(|id| Self::reputation_from(id, node))
            })
            .collect()
    }
}

impl Storage for FileStorage {
    fn init(&self) -> Result<(), RepError> {
        let loaded = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path)?;
            if raw.trim().is_empty() {
                Document::default()
            } else {
                serde_yaml::from_str(&raw)?
            }
        } else {
            Document::default()
        };

        let mut doc = self.write()?;
        *doc = loaded;
        self.save(&doc)?;
        info!(
            "YAML reputation document ready at {:?} ({} players)",
            self.path,
            doc.players.len()
        );
        Ok(())
    }

    fn close(&self) -> Result<(), RepError> {
        let doc = self.read()?;
        self.save(&doc)?;
        debug!("YAML reputation document flushed");
        Ok(())
    }

    fn get_or_create(&self, actor: ActorId, name: Option<&str>) -> Result<Reputation, RepError> {
        let mut doc = self.write()?;
        let existed = doc.players.contains_key(&actor.to_string());
        let node = Self::ensure_player(&mut doc, actor, name, self.score.default_score());
        let rep = Self::reputation_from(actor, node);
        if !existed {
            self.save(&doc)?;
        }
        Ok(rep)
    }

    fn last_known_name(&self, actor: ActorId) -> Result<Option<String>, RepError> {
        let doc = self.read()?;
        Ok(doc
            .players
            .get(&actor.to_string())
            .and_then(|node| node.name.clone()))
    }

    fn get_top(
        &self,
        category: TopCategory,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Reputation>, RepError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let doc = self.read()?;
        let mut list = Self::seen_players(&doc);

        list.sort_by(|a, b| match category {
            TopCategory::Score => b
                .score
                .total_cmp(&a.score)
                .then(b.votes().cmp(&a.votes())),
            TopCategory::Likes => b
                .likes
                .cmp(&a.likes)
                .then(b.score.total_cmp(&a.score))
                .then(b.votes().cmp(&a.votes())),
            TopCategory::Dislikes => b
                .dislikes
                .cmp(&a.dislikes)
                .then(a.score.total_cmp(&b.score))
                .then(b.votes().cmp(&a.votes())),
            TopCategory::Votes => b
                .votes()
                .cmp(&a.votes())
                .then(b.score.total_cmp(&a.score)),
        });

        Ok(list
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn vote_state(&self, voter: ActorId, target: ActorId) -> Result<Option<VoteState>, RepError> {
        let doc = self.read()?;
        let node = doc
            .votes
            .get(&voter.to_string())
            .and_then(|targets| targets.get(&target.to_string()));

        Ok(node.map(|n| VoteState {
            value: n.value.map(VoteValue::from_int),
            reason: n.reason.clone(),
            last_time: n.last_time,
        }))
    }

    fn apply_vote(
        &self,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
        at_ms: i64,
        target_name: Option<&str>,
        reason: Option<&str>,
    ) -> Result<VoteOutcome, RepError> {
        let mut doc = self.write()?;
        let default_score = self.score.default_score();

        Self::ensure_player(&mut doc, target, target_name, default_score);
        Self::ensure_player(&mut doc, voter, None, default_score);

        let edge = doc
            .votes
            .entry(voter.to_string())
            .or_default()
            .entry(target.to_string())
            .or_insert(VoteNode {
                value: None,
                reason: None,
                last_time: 0,
            });

        let prior_value = edge.value.map(VoteValue::from_int);
        let prior_reason = edge.reason.clone();

        let (outcome, like_delta, dislike_delta) = match prior_value {
            None => {
                edge.value = Some(value.as_int());
                edge.reason = reason.map(str::to_string);
                edge.last_time = at_ms;
                match value {
                    VoteValue::Like => (VoteOutcome::Created, 1, 0),
                    VoteValue::Dislike => (VoteOutcome::Created, 0, 1),
                }
            }
            Some(prior) if prior == value => {
                edge.value = None;
                edge.reason = None;
                edge.last_time = at_ms;
                match value {
                    VoteValue::Like => (VoteOutcome::Removed, -1, 0),
                    VoteValue::Dislike => (VoteOutcome::Removed, 0, -1),
                }
            }
            Some(_) => {
                edge.value = Some(value.as_int());
                edge.reason = reason.map(str::to_string);
                edge.last_time = at_ms;
                match value {
                    VoteValue::Like => (VoteOutcome::Changed, 1, -1),
                    VoteValue::Dislike => (VoteOutcome::Changed, -1, 1),
                }
            }
        };

        match outcome {
            VoteOutcome::Created => {
                Self::add_tag_count(&mut doc, target, reason, 1);
                Self::add_vote_log(&mut doc, target, voter, value, reason, at_ms, self.log_keep);
            }
            VoteOutcome::Removed => {
                Self::add_tag_count(&mut doc, target, prior_reason.as_deref(), -1);
                Self::add_vote_log(
                    &mut doc,
                    target,
                    voter,
                    value,
                    Some(REMOVED_REASON),
                    at_ms,
                    self.log_keep,
                );
            }
            VoteOutcome::Changed => {
                Self::add_tag_count(&mut doc, target, prior_reason.as_deref(), -1);
                Self::add_tag_count(&mut doc, target, reason, 1);
                Self::add_vote_log(&mut doc, target, voter, value, reason, at_ms, self.log_keep);
            }
        }

        let (likes, dislikes) = {
            let node = Self::ensure_player(&mut doc, target, None, default_score);
            node.likes = (node.likes + like_delta).max(0);
            node.dislikes = (node.dislikes + dislike_delta).max(0);
            node.seen = true;
            (node.likes.max(0) as u32, node.dislikes.max(0) as u32)
        };

        let score = self.score.score(likes, dislikes);
        if let Some(node) = doc.players.get_mut(&target.to_string()) {
            node.score = score;
        }

        self.save(&doc)?;
        debug!("Applied vote {voter} -> {target}: {outcome:?}");
        Ok(outcome)
    }

    fn count_votes_by_voter_since(&self, voter: ActorId, since_ms: i64) -> Result<u32, RepError> {
        let doc = self.read()?;
        let Some(targets) = doc.votes.get(&voter.to_string()) else {
            return Ok(0);
        };

        Ok(targets
            .values()
            .filter(|node| node.value.is_some() && node.last_time >= since_ms)
            .count() as u32)
    }

    fn mark_seen(
        &self,
        actor: ActorId,
        name: Option<&str>,
        ip_hash: Option<&str>,
    ) -> Result<(), RepError> {
        let mut doc = self.write()?;
        let node = Self::ensure_player(&mut doc, actor, name, self.score.default_score());
        node.seen = true;
        if let Some(hash) = ip_hash {
            node.ip_hash = Some(hash.to_string());
        }
        self.save(&doc)?;
        Ok(())
    }

    fn rank(&self, actor: ActorId) -> Result<Option<u64>, RepError> {
        let doc = self.read()?;
        let mut list = Self::seen_players(&doc);

        // deterministic order: score desc, votes desc, id asc
        list.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.votes().cmp(&a.votes()))
                .then(a.id.cmp(&b.id))
        });

        Ok(list
            .iter()
            .position(|rep| rep.id == actor)
            .map(|idx| idx as u64 + 1))
    }

    fn top_tags(&self, target: ActorId, limit: u32) -> Result<Vec<(String, u32)>, RepError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let doc = self.read()?;
        let Some(counts) = doc.tags.get(&target.to_string()) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(String, u32)> = counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(tag, count)| (tag.clone(), *count as u32))
            .collect();

        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    fn recent_votes(
        &self,
        target: ActorId,
        limit: u32,
        include_voter_name: bool,
    ) -> Result<Vec<VoteLogEntry>, RepError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let doc = self.read()?;
        let Some(log) = doc.vote_log.get(&target.to_string()) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<&LogNode> = log.iter().collect();
        entries.sort_by(|a, b| b.time.cmp(&a.time));

        Ok(entries
            .into_iter()
            .take(limit as usize)
            .map(|node| {
                let voter_name = if include_voter_name {
                    // resolved lazily: stored name, else the voter's current one
                    node.voter_name.clone().or_else(|| {
                        node.voter
                            .as_ref()
                            .and_then(|v| doc.players.get(v))
                            .and_then(|p| p.name.clone())
                    })
                } else {
                    None
                };

                VoteLogEntry {
                    time: node.time,
                    value: VoteValue::from_int(node.value),
                    reason: node.reason.clone(),
                    voter_name,
                }
            })
            .collect())
    }

    fn ip_hash(&self, actor: ActorId) -> Result<Option<String>, RepError> {
        let doc = self.read()?;
        Ok(doc
            .players
            .get(&actor.to_string())
            .and_then(|node| node.ip_hash.clone()))
    }
}
