//! Persistence backends
//!
//! One contract, two implementations:
//!
//! - `sqlite` - relational tables, the vote apply wrapped in a transaction
//! - `file`   - one YAML document held in memory and rewritten on mutation
//!
//! Both take the score function as a trait object and recompute the target's
//! score inside every vote apply.

pub mod file;
pub mod sqlite;

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::RepError;
use crate::model::{
    ActorId, Reputation, TopCategory, VoteLogEntry, VoteOutcome, VoteState, VoteValue,
};
use crate::score::ScoreFunction;

/// Log reason recorded when a re-vote retracts an existing edge.
pub const REMOVED_REASON: &str = "(removed)";

pub trait Storage: Send + Sync {
    /// Prepare schema or document file. Called once before first use.
    fn init(&self) -> Result<(), RepError>;

    /// Flush and release resources. Called once at shutdown.
    fn close(&self) -> Result<(), RepError>;

    /// Fetch an actor's reputation, creating a default record if absent. A
    /// non-empty `name` refreshes the stored display name.
    fn get_or_create(&self, actor: ActorId, name: Option<&str>) -> Result<Reputation, RepError>;

    fn last_known_name(&self, actor: ActorId) -> Result<Option<String>, RepError>;

    /// Ranked list of seen actors. Ordering and tie-breaks depend on the
    /// category; see the per-backend implementations.
    fn get_top(
        &self,
        category: TopCategory,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Reputation>, RepError>;

    fn vote_state(&self, voter: ActorId, target: ActorId) -> Result<Option<VoteState>, RepError>;

    /// The transactional core: reconcile the voter's prior edge against the
    /// new vote and mutate counters, edge, tag histogram and audit log as one
    /// unit. Marks the target seen.
    fn apply_vote(
        &self,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
        at_ms: i64,
        target_name: Option<&str>,
        reason: Option<&str>,
    ) -> Result<VoteOutcome, RepError>;

    /// Active (non-retracted) votes cast by `voter` at or after `since_ms`.
    fn count_votes_by_voter_since(&self, voter: ActorId, since_ms: i64) -> Result<u32, RepError>;

    /// Idempotent presence signal: marks the actor seen and refreshes name and
    /// network-identity hash. `None` values leave the stored ones untouched.
    fn mark_seen(
        &self,
        actor: ActorId,
        name: Option<&str>,
        ip_hash: Option<&str>,
    ) -> Result<(), RepError>;

    /// 1-based position in the score ordering among seen actors. Ties break by
    /// vote count descending, then actor id ascending. `None` when unranked.
    fn rank(&self, actor: ActorId) -> Result<Option<u64>, RepError>;

    /// Reason tags with positive counts, most used first.
    fn top_tags(&self, target: ActorId, limit: u32) -> Result<Vec<(String, u32)>, RepError>;

    /// Audit-log entries, newest first. Voter names are dropped when
    /// `include_voter_name` is false.
    fn recent_votes(
        &self,
        target: ActorId,
        limit: u32,
        include_voter_name: bool,
    ) -> Result<Vec<VoteLogEntry>, RepError>;

    fn ip_hash(&self, actor: ActorId) -> Result<Option<String>, RepError>;
}

/// Open the backend named by the configuration.
pub fn open(
    cfg: &StorageConfig,
    score: Arc<dyn ScoreFunction>,
    history_limit: u32,
) -> Result<Arc<dyn Storage>, RepError> {
    let storage: Arc<dyn Storage> = match cfg.backend {
        crate::config::BackendKind::Sqlite => Arc::new(sqlite::SqliteStorage::open(
            &cfg.sqlite_path,
            cfg.busy_timeout_ms,
            score,
        )?),
        crate::config::BackendKind::File => Arc::new(file::FileStorage::open(
            &cfg.file_path,
            score,
            history_limit,
        )?),
    };
    storage.init()?;
    Ok(storage)
}

/// Run a blocking storage closure on the tokio blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, RepError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RepError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RepError::Internal(format!("blocking task failed: {e}")))?
}
