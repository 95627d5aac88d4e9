//! Reputation service
//!
//! The one entry point hosts embed. It wires the storage backend, the cache,
//! the policy chain, and the proximity tracker together, and exposes async
//! methods that hop to the blocking pool for any storage work.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::RepCache;
use crate::config::{Config, VoterNameMode};
use crate::error::RepError;
use crate::ident::network_identity_hash;
use crate::interaction::InteractionTracker;
use crate::model::{
    now_millis, ActorId, Reputation, TopCategory, VoteLogEntry, VoteOutcome, VoteValue,
};
use crate::policy::{Decision, DenyReason, PolicyChain};
use crate::presence::{Capabilities, Capability, Notifier, Presence};
use crate::score::{ScoreFunction, WeightedScore};
use crate::storage::{blocking, Storage};

pub struct ReputationService {
    cfg: Config,
    storage: Arc<dyn Storage>,
    cache: RepCache,
    policy: PolicyChain,
    presence: Arc<dyn Presence>,
    caps: Arc<dyn Capabilities>,
    notifier: Arc<dyn Notifier>,
    tracker: Option<Arc<InteractionTracker>>,
    ip_salt: String,
}

impl ReputationService {
    /// Opens the configured backend and starts the proximity sampler when
    /// interaction checks are enabled. `ip_salt` seeds the network identity
    /// hash and must stay stable across restarts for same-network detection
    /// to work.
    pub fn start(
        cfg: Config,
        presence: Arc<dyn Presence>,
        caps: Arc<dyn Capabilities>,
        notifier: Arc<dyn Notifier>,
        ip_salt: impl Into<String>,
    ) -> Result<Self, RepError> {
        let score: Arc<dyn ScoreFunction> = Arc::new(WeightedScore::new(cfg.score.clone()));
        let storage = crate::storage::open(&cfg.storage, score, cfg.history.limit)?;
        Self::with_storage(cfg, storage, presence, caps, notifier, ip_salt)
    }

    /// Same as [`start`](Self::start) but over an already opened backend.
    pub fn with_storage(
        cfg: Config,
        storage: Arc<dyn Storage>,
        presence: Arc<dyn Presence>,
        caps: Arc<dyn Capabilities>,
        notifier: Arc<dyn Notifier>,
        ip_salt: impl Into<String>,
    ) -> Result<Self, RepError> {
        let cache = if cfg.cache.enabled {
            RepCache::new(&cfg.cache)
        } else {
            RepCache::disabled()
        };

        let tracker = if cfg.anti_abuse.interaction.enabled {
            let tracker = Arc::new(InteractionTracker::new());
            tracker.start(Arc::clone(&presence), cfg.anti_abuse.interaction.clone());
            Some(tracker)
        } else {
            None
        };

        let policy = PolicyChain::new(
            cfg.anti_abuse.clone(),
            Arc::clone(&storage),
            Arc::clone(&presence),
            Arc::clone(&caps),
            tracker.as_ref().map(Arc::clone),
        );

        info!(
            backend = ?cfg.storage.backend,
            cache = cfg.cache.enabled,
            interaction = cfg.anti_abuse.interaction.enabled,
            "Reputation service started"
        );

        Ok(Self {
            cfg,
            storage,
            cache,
            policy,
            presence,
            caps,
            notifier,
            tracker,
            ip_salt: ip_salt.into(),
        })
    }

    /// Stops the sampler and flushes the backend.
    pub async fn shutdown(&self) -> Result<(), RepError> {
        if let Some(tracker) = &self.tracker {
            tracker.shutdown();
        }
        self.policy.clear();
        self.cache.clear();
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.close()).await?;
        info!("Reputation service stopped");
        Ok(())
    }

    pub fn tracker(&self) -> Option<&Arc<InteractionTracker>> {
        self.tracker.as_ref()
    }

    /// Casts a vote with no tag. Refused with `ReasonRequired` when the
    /// configuration demands one.
    pub async fn vote(
        &self,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
    ) -> Result<Option<VoteOutcome>, RepError> {
        if self.cfg.reasons.enabled && self.cfg.reasons.require_reason {
            self.notifier.denied(&voter, &DenyReason::ReasonRequired);
            return Ok(None);
        }
        self.vote_inner(voter, target, value, None).await
    }

    /// Casts a vote carrying a tag reason. The reason is dropped entirely
    /// when reasons are disabled; blank reasons count as absent.
    pub async fn vote_with_reason(
        &self,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
        reason: &str,
    ) -> Result<Option<VoteOutcome>, RepError> {
        let reason = Some(reason)
            .filter(|_| self.cfg.reasons.enabled)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        if reason.is_none() && self.cfg.reasons.enabled && self.cfg.reasons.require_reason {
            self.notifier.denied(&voter, &DenyReason::ReasonRequired);
            return Ok(None);
        }

        self.vote_inner(voter, target, value, reason).await
    }

    async fn vote_inner(
        &self,
        voter: ActorId,
        target: ActorId,
        value: VoteValue,
        reason: Option<String>,
    ) -> Result<Option<VoteOutcome>, RepError> {
        let now = now_millis();

        match self.policy.evaluate(voter, target, value, now).await? {
            Decision::Deny(reason) => {
                debug!(%voter, %target, ?reason, "Vote refused");
                self.notifier.denied(&voter, &reason);
                Ok(None)
            }
            Decision::Allow => {
                self.policy.stamp(voter, now);

                let storage = Arc::clone(&self.storage);
                let target_name = self.presence.display_name(&target);
                let outcome = blocking(move || {
                    storage.apply_vote(
                        voter,
                        target,
                        value,
                        now,
                        target_name.as_deref(),
                        reason.as_deref(),
                    )
                })
                .await?;

                self.cache.invalidate(&target);
                debug!(%voter, %target, ?outcome, "Vote applied");
                Ok(Some(outcome))
            }
        }
    }

    /// Reputation record for `actor`, creating a blank one on first sight.
    /// Served from the cache within its TTL.
    pub async fn reputation(&self, actor: ActorId) -> Result<Reputation, RepError> {
        if let Some(hit) = self.cache.get(&actor) {
            return Ok(hit);
        }

        let storage = Arc::clone(&self.storage);
        let name = self.presence.display_name(&actor);
        let rep = blocking(move || storage.get_or_create(actor, name.as_deref())).await?;
        self.cache.put(rep.clone());
        Ok(rep)
    }

    pub async fn top(
        &self,
        category: TopCategory,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Reputation>, RepError> {
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.get_top(category, limit, offset)).await
    }

    /// 1-based leaderboard position, `None` for actors never voted on.
    pub async fn rank(&self, actor: ActorId) -> Result<Option<u64>, RepError> {
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.rank(actor)).await
    }

    pub async fn top_tags(
        &self,
        target: ActorId,
        limit: u32,
    ) -> Result<Vec<(String, u32)>, RepError> {
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.top_tags(target, limit)).await
    }

    /// Recent vote log for `target`, newest first, clipped to the configured
    /// history limit. Whether `viewer` gets voter names depends on the
    /// history mode.
    pub async fn history(
        &self,
        viewer: ActorId,
        target: ActorId,
    ) -> Result<Vec<VoteLogEntry>, RepError> {
        let include = self.should_include_voter_name(&viewer);
        let limit = self.cfg.history.limit;
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.recent_votes(target, limit, include)).await
    }

    pub async fn last_known_name(&self, actor: ActorId) -> Result<Option<String>, RepError> {
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.last_known_name(actor)).await
    }

    /// Marks an actor as observed online, refreshing its stored name and
    /// network identity hash. Hosts call this on every join.
    pub async fn mark_seen(&self, actor: ActorId, address: Option<&str>) -> Result<(), RepError> {
        let name = self.presence.display_name(&actor);
        let hash = address.map(|addr| network_identity_hash(addr, &self.ip_salt));
        let storage = Arc::clone(&self.storage);
        blocking(move || storage.mark_seen(actor, name.as_deref(), hash.as_deref())).await?;
        self.cache.invalidate(&actor);
        Ok(())
    }

    /// Best-effort sweep over currently online actors, used at startup to
    /// backfill the seen flag. Individual failures are logged and skipped.
    pub async fn mark_seen_all(&self) {
        for actor in self.presence.online_actors() {
            if let Err(e) = self.mark_seen(actor, None).await {
                warn!(%actor, "Failed to mark actor as seen: {e}");
            }
        }
    }

    fn should_include_voter_name(&self, viewer: &ActorId) -> bool {
        match self.cfg.history.voter_name_mode {
            VoterNameMode::Always => true,
            VoterNameMode::Anonymous => false,
            VoterNameMode::Capability => self.caps.has(viewer, Capability::ViewVoterNames),
        }
    }
}
