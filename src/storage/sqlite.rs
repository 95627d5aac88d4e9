//! SQLite backend
//!
//! Four tables keyed per the storage contract. Schema creation is idempotent;
//! later additive columns and indexes are applied defensively so reopening an
//! older database upgrades it in place. The vote apply runs inside a single
//! transaction; dropping it unrolled rolls everything back.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::error::RepError;
use crate::model::{
    ActorId, Reputation, TopCategory, VoteLogEntry, VoteOutcome, VoteState, VoteValue,
};
use crate::score::ScoreFunction;
use crate::storage::{Storage, REMOVED_REASON};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    score: Arc<dyn ScoreFunction>,
}

impl SqliteStorage {
    /// Open or create the database file. WAL keeps concurrent readers cheap;
    /// the busy timeout bounds how long a caller waits on a locked database.
    pub fn open(
        path: &Path,
        busy_timeout_ms: u64,
        score: Arc<dyn ScoreFunction>,
    ) -> Result<Self, RepError> {
        info!("Opening SQLite reputation database at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;

        Ok(Self {
            conn: Mutex::new(conn),
            score,
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory(score: Arc<dyn ScoreFunction>) -> Result<Self, RepError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            score,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RepError> {
        self.conn
            .lock()
            .map_err(|e| RepError::Internal(format!("connection lock poisoned: {e}")))
    }

    fn ensure_player(&self, conn: &Connection, actor: ActorId, name: Option<&str>) -> Result<(), RepError> {
        let default_score = self.score.default_score();
        conn.execute(
            "INSERT OR IGNORE INTO rep_players (uuid, name, likes, dislikes, score, updated, seen, ip_hash)
             VALUES (?1, ?2, 0, 0, ?3, ?4, 0, NULL)",
            params![
                actor.to_string(),
                name,
                default_score,
                crate::model::now_millis()
            ],
        )?;

        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            conn.execute(
                "UPDATE rep_players SET name = ?1 WHERE uuid = ?2",
                params![name, actor.to_string()],
            )?;
        }
        Ok(())
    }

    fn update_counters(
        tx: &Transaction,
        target: ActorId,
        like_delta: i64,
        dislike_delta: i64,
    ) -> Result<(), RepError> {
        // counters clamp at zero even if a racing change slipped past us
        tx.execute(
            "UPDATE rep_players
             SET likes = MAX(likes + ?1, 0), dislikes = MAX(dislikes + ?2, 0)
             WHERE uuid = ?3",
            params![like_delta, dislike_delta, target.to_string()],
        )?;
        Ok(())
    }

    fn add_tag_count(
        tx: &Transaction,
        target: ActorId,
        tag: Option<&str>,
        delta: i64,
    ) -> Result<(), RepError> {
        let Some(tag) = tag.filter(|t| !t.trim().is_empty()) else {
            return Ok(());
        };

        tx.execute(
            "INSERT INTO rep_tags (target, tag, count) VALUES (?1, ?2, MAX(?3, 0))
             ON CONFLICT(target, tag) DO UPDATE SET count = MAX(count + ?3, 0)",
            params![target.to_string(), tag, delta],
        )?;
        Ok(())
    }

    fn insert_vote_log(
        tx: &Transaction,
        target: ActorId,
        voter: ActorId,
        value: VoteValue,
        reason: Option<&str>,
        at_ms: i64,
    ) -> Result<(), RepError> {
        // resolve the voter's display name once, at insert time
        let voter_name: Option<String> = tx
            .query_row(
                "SELECT name FROM rep_players WHERE uuid = ?1",
                params![voter.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        tx.execute(
            "INSERT INTO rep_vote_log (target, voter, voter_name, value, reason, time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target.to_string(),
                voter.to_string(),
                voter_name,
                value.as_int(),
                reason,
                at_ms
            ],
        )?;
        Ok(())
    }

    fn upsert_vote(
        tx: &Transaction,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
        reason: Option<&str>,
        at_ms: i64,
    ) -> Result<(), RepError> {
        tx.execute(
            "INSERT INTO rep_votes (voter, target, value, reason, last_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(voter, target) DO UPDATE SET
                 value = excluded.value,
                 reason = excluded.reason,
                 last_time = excluded.last_time",
            params![
                voter.to_string(),
                target.to_string(),
                value.as_int(),
                reason,
                at_ms
            ],
        )?;
        Ok(())
    }

    fn clear_vote(
        tx: &Transaction,
        voter: ActorId,
        target: ActorId,
        at_ms: i64,
    ) -> Result<(), RepError> {
        tx.execute(
            "UPDATE rep_votes SET value = NULL, reason = NULL, last_time = ?1
             WHERE voter = ?2 AND target = ?3",
            params![at_ms, voter.to_string(), target.to_string()],
        )?;
        Ok(())
    }

    fn recalc_score(&self, tx: &Transaction, target: ActorId, at_ms: i64) -> Result<(), RepError> {
        let counters: Option<(i64, i64)> = tx
            .query_row(
                "SELECT likes, dislikes FROM rep_players WHERE uuid = ?1",
                params![target.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((likes, dislikes)) = counters else {
            return Ok(());
        };

        let score = self.score.score(likes.max(0) as u32, dislikes.max(0) as u32);
        tx.execute(
            "UPDATE rep_players SET score = ?1, updated = ?2 WHERE uuid = ?3",
            params![score, at_ms, target.to_string()],
        )?;
        Ok(())
    }

    fn read_reputation(conn: &Connection, actor: ActorId) -> Result<Option<Reputation>, RepError> {
        let rep = conn
            .query_row(
                "SELECT name, likes, dislikes, score, seen FROM rep_players WHERE uuid = ?1",
                params![actor.to_string()],
                |row| {
                    Ok(Reputation {
                        id: actor,
                        name: row.get(0)?,
                        likes: row.get::<_, i64>(1)?.max(0) as u32,
                        dislikes: row.get::<_, i64>(2)?.max(0) as u32,
                        score: row.get(3)?,
                        seen: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(rep)
    }
}

impl Storage for SqliteStorage {
    fn init(&self) -> Result<(), RepError> {
        let conn = self.lock()?;

        conn.execute_batch(BASE_SCHEMA)?;

        // additive columns: an already-upgraded database rejects these, which
        // is fine
        for ddl in [
            "ALTER TABLE rep_players ADD COLUMN seen INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE rep_players ADD COLUMN ip_hash TEXT",
        ] {
            if let Err(e) = conn.execute(ddl, []) {
                debug!("Skipping additive column ({e})");
            }
        }

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_rep_players_score ON rep_players(score)",
            "CREATE INDEX IF NOT EXISTS idx_rep_players_seen_score ON rep_players(seen, score)",
            "CREATE INDEX IF NOT EXISTS idx_rep_votes_voter_time ON rep_votes(voter, last_time)",
            "CREATE INDEX IF NOT EXISTS idx_rep_vote_log_target_time ON rep_vote_log(target, time)",
            "CREATE INDEX IF NOT EXISTS idx_rep_tags_target_count ON rep_tags(target, count)",
        ] {
            if let Err(e) = conn.execute(ddl, []) {
                debug!("Skipping index ({e})");
            }
        }

        // backfill: anyone already voted on counts as seen
        if let Err(e) = conn.execute(
            "UPDATE rep_players SET seen = 1 WHERE (likes + dislikes) > 0",
            [],
        ) {
            debug!("Seen backfill skipped ({e})");
        }

        info!("SQLite reputation schema ready");
        Ok(())
    }

    fn close(&self) -> Result<(), RepError> {
        // the connection closes on drop; nothing to flush beyond WAL
        Ok(())
    }

    fn get_or_create(&self, actor: ActorId, name: Option<&str>) -> Result<Reputation, RepError> {
        let conn = self.lock()?;
        self.ensure_player(&conn, actor, name)?;
        Self::read_reputation(&conn, actor)?.ok_or_else(|| {
            RepError::Internal(format!("player row vanished after insert: {actor}"))
        })
    }

    fn last_known_name(&self, actor: ActorId) -> Result<Option<String>, RepError> {
        let conn = self.lock()?;
        let name: Option<Option<String>> = conn
            .query_row(
                "SELECT name FROM rep_players WHERE uuid = ?1",
                params![actor.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.flatten())
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

        let order = match category {
            TopCategory::Score => "score DESC, (likes + dislikes) DESC",
            TopCategory::Likes => "likes DESC, score DESC, (likes + dislikes) DESC",
            TopCategory::Dislikes => "dislikes DESC, score ASC, (likes + dislikes) DESC",
            TopCategory::Votes => "(likes + dislikes) DESC, score DESC",
        };

        let conn = self.lock()?;
        let sql = format!(
            "SELECT uuid, name, likes, dislikes, score FROM rep_players
             WHERE seen = 1 ORDER BY {order} LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            let uuid: String = row.get(0)?;
            Ok((
                uuid,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (uuid, name, likes, dislikes, score) = row?;
            let id = uuid
                .parse::<ActorId>()
                .map_err(|e| RepError::Internal(format!("bad uuid in rep_players: {e}")))?;
            out.push(Reputation {
                id,
                name,
                likes: likes.max(0) as u32,
                dislikes: dislikes.max(0) as u32,
                score,
                seen: true,
            });
        }
        Ok(out)
    }

    fn vote_state(&self, voter: ActorId, target: ActorId) -> Result<Option<VoteState>, RepError> {
        let conn = self.lock()?;
        let state = conn
            .query_row(
                "SELECT value, reason, last_time FROM rep_votes WHERE voter = ?1 AND target = ?2",
                params![voter.to_string(), target.to_string()],
                |row| {
                    Ok(VoteState {
                        value: row.get::<_, Option<i64>>(0)?.map(VoteValue::from_int),
                        reason: row.get(1)?,
                        last_time: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
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
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        self.ensure_player(&tx, target, target_name)?;
        self.ensure_player(&tx, voter, None)?;

        let existing: Option<(Option<i64>, Option<String>)> = tx
            .query_row(
                "SELECT value, reason FROM rep_votes WHERE voter = ?1 AND target = ?2",
                params![voter.to_string(), target.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let prior_value = existing.as_ref().and_then(|(v, _)| v.map(VoteValue::from_int));
        let prior_reason = existing.and_then(|(_, r)| r);

        let outcome = match prior_value {
            None => {
                Self::upsert_vote(&tx, voter, target, value, reason, at_ms)?;
                match value {
                    VoteValue::Like => Self::update_counters(&tx, target, 1, 0)?,
                    VoteValue::Dislike => Self::update_counters(&tx, target, 0, 1)?,
                }
                Self::add_tag_count(&tx, target, reason, 1)?;
                Self::insert_vote_log(&tx, target, voter, value, reason, at_ms)?;
                VoteOutcome::Created
            }
            Some(prior) if prior == value => {
                Self::clear_vote(&tx, voter, target, at_ms)?;
                match value {
                    VoteValue::Like => Self::update_counters(&tx, target, -1, 0)?,
                    VoteValue::Dislike => Self::update_counters(&tx, target, 0, -1)?,
                }
                Self::add_tag_count(&tx, target, prior_reason.as_deref(), -1)?;
                Self::insert_vote_log(&tx, target, voter, value, Some(REMOVED_REASON), at_ms)?;
                VoteOutcome::Removed
            }
            Some(_) => {
                Self::upsert_vote(&tx, voter, target, value, reason, at_ms)?;
                match value {
                    VoteValue::Like => Self::update_counters(&tx, target, 1, -1)?,
                    VoteValue::Dislike => Self::update_counters(&tx, target, -1, 1)?,
                }
                Self::add_tag_count(&tx, target, prior_reason.as_deref(), -1)?;
                Self::add_tag_count(&tx, target, reason, 1)?;
                Self::insert_vote_log(&tx, target, voter, value, reason, at_ms)?;
                VoteOutcome::Changed
            }
        };

        // receiving a vote makes the target rankable
        tx.execute(
            "UPDATE rep_players SET seen = 1 WHERE uuid = ?1",
            params![target.to_string()],
        )?;

        self.recalc_score(&tx, target, at_ms)?;
        tx.commit()?;

        debug!("Applied vote {voter} -> {target}: {outcome:?}");
        Ok(outcome)
    }

    fn count_votes_by_voter_since(&self, voter: ActorId, since_ms: i64) -> Result<u32, RepError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rep_votes
             WHERE voter = ?1 AND last_time >= ?2 AND value IS NOT NULL",
            params![voter.to_string(), since_ms],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }

    fn mark_seen(
        &self,
        actor: ActorId,
        name: Option<&str>,
        ip_hash: Option<&str>,
    ) -> Result<(), RepError> {
        let conn = self.lock()?;
        self.ensure_player(&conn, actor, name)?;
        conn.execute(
            "UPDATE rep_players
             SET seen = 1,
                 name = COALESCE(?1, name),
                 ip_hash = COALESCE(?2, ip_hash),
                 updated = ?3
             WHERE uuid = ?4",
            params![name, ip_hash, crate::model::now_millis(), actor.to_string()],
        )?;
        Ok(())
    }

    fn rank(&self, actor: ActorId) -> Result<Option<u64>, RepError> {
        let conn = self.lock()?;

        let own: Option<(f64, i64)> = conn
            .query_row(
                "SELECT score, (likes + dislikes) FROM rep_players WHERE uuid = ?1 AND seen = 1",
                params![actor.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((score, votes)) = own else {
            return Ok(None);
        };

        // strictly better, or tied-but-earlier by the deterministic order
        let ahead: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rep_players WHERE seen = 1 AND (
                 score > ?1
                 OR (score = ?1 AND (likes + dislikes) > ?2)
                 OR (score = ?1 AND (likes + dislikes) = ?2 AND uuid < ?3)
             )",
            params![score, votes, actor.to_string()],
            |row| row.get(0),
        )?;

        Ok(Some(ahead.max(0) as u64 + 1))
    }

    fn top_tags(&self, target: ActorId, limit: u32) -> Result<Vec<(String, u32)>, RepError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tag, count FROM rep_tags
             WHERE target = ?1 AND count > 0
             ORDER BY count DESC, tag ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![target.to_string(), limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (tag, count) = row?;
            out.push((tag, count.max(0) as u32));
        }
        Ok(out)
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

        let conn = self.lock()?;
        let sql = if include_voter_name {
            "SELECT value, reason, time, voter_name FROM rep_vote_log
             WHERE target = ?1 ORDER BY time DESC LIMIT ?2"
        } else {
            "SELECT value, reason, time, NULL FROM rep_vote_log
             WHERE target = ?1 ORDER BY time DESC LIMIT ?2"
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![target.to_string(), limit], |row| {
            Ok(VoteLogEntry {
                value: VoteValue::from_int(row.get(0)?),
                reason: row.get(1)?,
                time: row.get(2)?,
                voter_name: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(RepError::from)
    }

    fn ip_hash(&self, actor: ActorId) -> Result<Option<String>, RepError> {
        let conn = self.lock()?;
        let hash: Option<Option<String>> = conn
            .query_row(
                "SELECT ip_hash FROM rep_players WHERE uuid = ?1",
                params![actor.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }
}

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rep_players (
    uuid TEXT PRIMARY KEY NOT NULL,
    name TEXT,
    likes INTEGER NOT NULL DEFAULT 0,
    dislikes INTEGER NOT NULL DEFAULT 0,
    score REAL NOT NULL DEFAULT 5.0,
    updated INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rep_votes (
    voter TEXT NOT NULL,
    target TEXT NOT NULL,
    value INTEGER,
    reason TEXT,
    last_time INTEGER NOT NULL,
    PRIMARY KEY (voter, target)
);

CREATE TABLE IF NOT EXISTS rep_vote_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target TEXT NOT NULL,
    voter TEXT,
    voter_name TEXT,
    value INTEGER NOT NULL,
    reason TEXT,
    time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rep_tags (
    target TEXT NOT NULL,
    tag TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (target, tag)
);
"#;
