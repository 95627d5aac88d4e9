//! Pre-vote policy enforcement
//!
//! A fixed chain of checks runs before any vote is resolved. Order matters:
//! the cheap identity checks go first, the ones that need a storage read go
//! last, and the first failing rule wins. Callers surface the `DenyReason`
//! through their notifier; a denial is never an error.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::config::{AntiAbuseConfig, IpMode};
use crate::error::RepError;
use crate::interaction::InteractionTracker;
use crate::model::{ActorId, VoteValue};
use crate::presence::{Capabilities, Capability, Presence};
use crate::storage::{blocking, Storage};

/// Why a vote was refused. Carries whatever the caller needs to render a
/// useful message (remaining waits, limits) without reading config itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DenyReason {
    SelfVote,
    TargetOffline,
    TargetNeverSeen,
    ReasonRequired,
    GlobalCooldown { wait_secs: u64 },
    InteractionRequired,
    DailyLimit { limit: u32 },
    SameNetwork,
    SameNetworkCooldown { wait_secs: u64 },
    SameTargetCooldown { wait_secs: u64 },
    ChangeVoteCooldown { wait_secs: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

pub struct PolicyChain {
    cfg: AntiAbuseConfig,
    storage: Arc<dyn Storage>,
    presence: Arc<dyn Presence>,
    caps: Arc<dyn Capabilities>,
    tracker: Option<Arc<InteractionTracker>>,
    /// voter -> last accepted vote (ms), feeds the global cooldown
    cooldowns: DashMap<ActorId, i64>,
}

impl PolicyChain {
    pub fn new(
        cfg: AntiAbuseConfig,
        storage: Arc<dyn Storage>,
        presence: Arc<dyn Presence>,
        caps: Arc<dyn Capabilities>,
        tracker: Option<Arc<InteractionTracker>>,
    ) -> Self {
        Self {
            cfg,
            storage,
            presence,
            caps,
            tracker,
            cooldowns: DashMap::new(),
        }
    }

    /// Runs every rule in order and returns the first denial, or `Allow`.
    /// Storage is only touched once the local rules have all passed.
    pub async fn evaluate(
        &self,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
        now_ms: i64,
    ) -> Result<Decision, RepError> {
        if self.cfg.prevent_self_vote && voter == target {
            return Ok(Decision::Deny(DenyReason::SelfVote));
        }

        if self.cfg.require_target_online && !self.presence.is_online(&target) {
            return Ok(Decision::Deny(DenyReason::TargetOffline));
        }

        if self.cfg.require_played_before
            && !self.presence.is_online(&target)
            && !self.presence.has_played_before(&target)
        {
            return Ok(Decision::Deny(DenyReason::TargetNeverSeen));
        }

        let cooldown_bypass = self.caps.has(&voter, Capability::CooldownBypass);

        if !cooldown_bypass && self.cfg.cooldowns.global_secs > 0 {
            if let Some(last) = self.cooldowns.get(&voter).map(|e| *e.value()) {
                if let Some(wait) = wait_secs(last, self.cfg.cooldowns.global_secs, now_ms) {
                    return Ok(Decision::Deny(DenyReason::GlobalCooldown { wait_secs: wait }));
                }
            }
        }

        if self.cfg.interaction.enabled && !self.caps.has(&voter, Capability::InteractionBypass) {
            let valid_ms = self.cfg.interaction.valid_secs.saturating_mul(1000) as i64;
            let seen = self
                .tracker
                .as_ref()
                .map(|t| t.has_recent_interaction(&voter, &target, valid_ms))
                .unwrap_or(false);
            if !seen {
                return Ok(Decision::Deny(DenyReason::InteractionRequired));
            }
        }

        if self.cfg.daily_limit.enabled && self.cfg.daily_limit.max_votes_per_day > 0 && !cooldown_bypass
        {
            let midnight = local_midnight_ms(now_ms);
            let storage = Arc::clone(&self.storage);
            let count =
                blocking(move || storage.count_votes_by_voter_since(voter, midnight)).await?;
            if count >= self.cfg.daily_limit.max_votes_per_day {
                return Ok(Decision::Deny(DenyReason::DailyLimit {
                    limit: self.cfg.daily_limit.max_votes_per_day,
                }));
            }
        }

        // the remaining rules all need the stored edge between voter and target
        let storage = Arc::clone(&self.storage);
        let state = blocking(move || storage.vote_state(voter, target)).await?;

        if self.cfg.ip_protection.enabled && !self.caps.has(&voter, Capability::IpBypass) {
            let storage = Arc::clone(&self.storage);
            let pair = blocking(move || {
                let voter_hash = storage.ip_hash(voter)?;
                let target_hash = storage.ip_hash(target)?;
                Ok::<_, RepError>((voter_hash, target_hash))
            })
            .await?;

            if let (Some(v), Some(t)) = pair {
                if v == t {
                    match self.cfg.ip_protection.mode {
                        IpMode::Deny => {
                            return Ok(Decision::Deny(DenyReason::SameNetwork));
                        }
                        IpMode::Cooldown => {
                            let last = state.as_ref().map(|s| s.last_time).unwrap_or(0);
                            if let Some(wait) =
                                wait_secs(last, self.cfg.ip_protection.cooldown_secs, now_ms)
                            {
                                return Ok(Decision::Deny(DenyReason::SameNetworkCooldown {
                                    wait_secs: wait,
                                }));
                            }
                        }
                    }
                }
            }
        }

        if !cooldown_bypass {
            if let Some(state) = state.as_ref() {
                if let Some(wait) =
                    wait_secs(state.last_time, self.cfg.cooldowns.same_target_secs, now_ms)
                {
                    return Ok(Decision::Deny(DenyReason::SameTargetCooldown {
                        wait_secs: wait,
                    }));
                }

                // flipping an existing vote has its own, longer window
                if state.value.is_some() && state.value != Some(value) {
                    if let Some(wait) =
                        wait_secs(state.last_time, self.cfg.cooldowns.change_vote_secs, now_ms)
                    {
                        return Ok(Decision::Deny(DenyReason::ChangeVoteCooldown {
                            wait_secs: wait,
                        }));
                    }
                }
            }
        }

        Ok(Decision::Allow)
    }

    /// Records an accepted vote for the global cooldown.
    pub fn stamp(&self, voter: ActorId, now_ms: i64) {
        self.cooldowns.insert(voter, now_ms);
    }

    pub fn clear(&self) {
        debug!("Clearing {} global cooldown entries", self.cooldowns.len());
        self.cooldowns.clear();
    }
}

/// Remaining wait in whole seconds, rounded up, or `None` when the window
/// has elapsed (or is disabled with a zero width).
fn wait_secs(last_ms: i64, window_secs: u64, now_ms: i64) -> Option<u64> {
    if window_secs == 0 || last_ms <= 0 {
        return None;
    }
    let deadline = last_ms.saturating_add((window_secs as i64).saturating_mul(1000));
    let left = deadline - now_ms;
    if left <= 0 {
        None
    } else {
        Some(((left + 999) / 1000) as u64)
    }
}

/// Millisecond timestamp of the most recent local midnight. Falls back to
/// `now_ms` when the clock cannot be interpreted, which only disables the
/// quota for that call.
fn local_midnight_ms(now_ms: i64) -> i64 {
    let Some(now) = Local.timestamp_millis_opt(now_ms).single() else {
        return now_ms;
    };
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|midnight| midnight.timestamp_millis())
        .unwrap_or(now_ms)
}
