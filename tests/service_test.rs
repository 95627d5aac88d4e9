//! End-to-end service behavior over an in-memory SQLite backend, with stubbed
//! presence and capability hooks and a recording notifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use reputation_core::config::{Config, VoterNameMode};
use reputation_core::model::{TopCategory, VoteOutcome, VoteValue};
use reputation_core::policy::DenyReason;
use reputation_core::presence::{Capabilities, Capability, Notifier, Position, Presence};
use reputation_core::score::{ScoreFunction, WeightedScore};
use reputation_core::service::ReputationService;
use reputation_core::storage::sqlite::SqliteStorage;
use reputation_core::storage::Storage;
use reputation_core::ActorId;

fn actor(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

#[derive(Default)]
struct StubPresence {
    online: Mutex<Vec<ActorId>>,
    played: Mutex<Vec<ActorId>>,
    names: Mutex<HashMap<ActorId, String>>,
}

impl StubPresence {
    fn with_online(actors: &[ActorId]) -> Arc<Self> {
        let p = Self::default();
        *p.online.lock().unwrap() = actors.to_vec();
        Arc::new(p)
    }

    fn name(&self, actor: ActorId, name: &str) {
        self.names.lock().unwrap().insert(actor, name.to_string());
    }
}

impl Presence for StubPresence {
    fn is_online(&self, actor: &ActorId) -> bool {
        self.online.lock().unwrap().contains(actor)
    }

    fn has_played_before(&self, actor: &ActorId) -> bool {
        self.played.lock().unwrap().contains(actor)
    }

    fn position(&self, _actor: &ActorId) -> Option<Position> {
        None
    }

    fn online_actors(&self) -> Vec<ActorId> {
        self.online.lock().unwrap().clone()
    }

    fn display_name(&self, actor: &ActorId) -> Option<String> {
        self.names.lock().unwrap().get(actor).cloned()
    }
}

struct StubCaps(Vec<(ActorId, Capability)>);

impl Capabilities for StubCaps {
    fn has(&self, actor: &ActorId, cap: Capability) -> bool {
        self.0.iter().any(|(a, c)| a == actor && *c == cap)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    denials: Mutex<Vec<(ActorId, DenyReason)>>,
}

impl RecordingNotifier {
    fn last(&self) -> Option<DenyReason> {
        self.denials.lock().unwrap().last().map(|(_, r)| r.clone())
    }
}

impl Notifier for RecordingNotifier {
    fn denied(&self, voter: &ActorId, reason: &DenyReason) {
        self.denials.lock().unwrap().push((*voter, reason.clone()));
    }
}

struct Harness {
    service: ReputationService,
    presence: Arc<StubPresence>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(tweak: impl FnOnce(&mut Config), caps: Vec<(ActorId, Capability)>) -> Harness {
    let mut cfg = Config::default();
    // defaults sized for tests; individual tests override what they exercise
    cfg.anti_abuse.cooldowns.global_secs = 0;
    cfg.anti_abuse.cooldowns.same_target_secs = 0;
    cfg.anti_abuse.cooldowns.change_vote_secs = 0;
    cfg.anti_abuse.require_played_before = false;
    cfg.anti_abuse.interaction.enabled = false;
    tweak(&mut cfg);

    let score: Arc<dyn ScoreFunction> = Arc::new(WeightedScore::new(cfg.score.clone()));
    let storage = SqliteStorage::open_in_memory(score).unwrap();
    storage.init().unwrap();

    let presence = StubPresence::with_online(&[actor(1), actor(2)]);
    let notifier = Arc::new(RecordingNotifier::default());
    let service = ReputationService::with_storage(
        cfg,
        Arc::new(storage),
        presence.clone(),
        Arc::new(StubCaps(caps)),
        notifier.clone(),
        "test-salt",
    )
    .unwrap();

    Harness {
        service,
        presence,
        notifier,
    }
}

#[tokio::test]
async fn vote_lifecycle_created_changed_removed() {
    let h = harness(|_| {}, vec![]);
    let (voter, target) = (actor(1), actor(2));

    let first = h
        .service
        .vote_with_reason(voter, target, VoteValue::Like, "kind")
        .await
        .unwrap();
    assert_eq!(first, Some(VoteOutcome::Created));

    let flipped = h
        .service
        .vote_with_reason(voter, target, VoteValue::Dislike, "rude")
        .await
        .unwrap();
    assert_eq!(flipped, Some(VoteOutcome::Changed));

    let retracted = h
        .service
        .vote(voter, target, VoteValue::Dislike)
        .await
        .unwrap();
    assert_eq!(retracted, Some(VoteOutcome::Removed));

    let rep = h.service.reputation(target).await.unwrap();
    assert_eq!((rep.likes, rep.dislikes), (0, 0));
    assert!(h.service.top_tags(target, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn self_vote_is_refused_through_the_notifier() {
    let h = harness(|_| {}, vec![]);
    let a = actor(1);

    let outcome = h.service.vote(a, a, VoteValue::Like).await.unwrap();
    assert_eq!(outcome, None, "a denial is not an error and not an outcome");
    assert_eq!(h.notifier.last(), Some(DenyReason::SelfVote));
}

#[tokio::test]
async fn global_cooldown_starts_after_an_accepted_vote() {
    let h = harness(
        |cfg| cfg.anti_abuse.cooldowns.global_secs = 20,
        vec![],
    );
    let voter = actor(1);

    assert!(h
        .service
        .vote(voter, actor(2), VoteValue::Like)
        .await
        .unwrap()
        .is_some());

    let second = h.service.vote(voter, actor(3), VoteValue::Like).await.unwrap();
    assert_eq!(second, None);
    match h.notifier.last() {
        Some(DenyReason::GlobalCooldown { wait_secs }) => {
            assert!(wait_secs >= 1 && wait_secs <= 20)
        }
        other => panic!("expected global cooldown, got {other:?}"),
    }
}

#[tokio::test]
async fn cooldown_bypass_capability_skips_the_window() {
    let voter = actor(1);
    let h = harness(
        |cfg| cfg.anti_abuse.cooldowns.global_secs = 20,
        vec![(voter, Capability::CooldownBypass)],
    );

    assert!(h.service.vote(voter, actor(2), VoteValue::Like).await.unwrap().is_some());
    assert!(h.service.vote(voter, actor(3), VoteValue::Like).await.unwrap().is_some());
}

#[tokio::test]
async fn same_target_cooldown_blocks_the_retraction() {
    let h = harness(
        |cfg| cfg.anti_abuse.cooldowns.same_target_secs = 600,
        vec![],
    );
    let (voter, target) = (actor(1), actor(2));

    assert!(h.service.vote(voter, target, VoteValue::Like).await.unwrap().is_some());
    // a different target is still fine
    assert!(h.service.vote(voter, actor(3), VoteValue::Like).await.unwrap().is_some());

    let again = h.service.vote(voter, target, VoteValue::Like).await.unwrap();
    assert_eq!(again, None);
    assert!(matches!(
        h.notifier.last(),
        Some(DenyReason::SameTargetCooldown { .. })
    ));
}

#[tokio::test]
async fn flip_cooldown_applies_only_to_value_changes() {
    let h = harness(
        |cfg| cfg.anti_abuse.cooldowns.change_vote_secs = 1_800,
        vec![],
    );
    let (voter, target) = (actor(1), actor(2));

    assert!(h.service.vote(voter, target, VoteValue::Like).await.unwrap().is_some());

    let flip = h.service.vote(voter, target, VoteValue::Dislike).await.unwrap();
    assert_eq!(flip, None);
    assert!(matches!(
        h.notifier.last(),
        Some(DenyReason::ChangeVoteCooldown { .. })
    ));

    // same value is a retraction, not a flip, so the window does not apply
    let retract = h.service.vote(voter, target, VoteValue::Like).await.unwrap();
    assert_eq!(retract, Some(VoteOutcome::Removed));
}

#[tokio::test]
async fn daily_limit_counts_only_accepted_votes() {
    let h = harness(
        |cfg| {
            cfg.anti_abuse.daily_limit.enabled = true;
            cfg.anti_abuse.daily_limit.max_votes_per_day = 2;
        },
        vec![],
    );
    let voter = actor(1);

    assert!(h.service.vote(voter, actor(2), VoteValue::Like).await.unwrap().is_some());
    assert!(h.service.vote(voter, actor(3), VoteValue::Like).await.unwrap().is_some());

    let third = h.service.vote(voter, actor(4), VoteValue::Like).await.unwrap();
    assert_eq!(third, None);
    assert_eq!(h.notifier.last(), Some(DenyReason::DailyLimit { limit: 2 }));
}

#[tokio::test]
async fn target_never_seen_is_refused_when_required() {
    let h = harness(|cfg| cfg.anti_abuse.require_played_before = true, vec![]);

    // actor(5) is neither online nor known to the host
    let outcome = h.service.vote(actor(1), actor(5), VoteValue::Like).await.unwrap();
    assert_eq!(outcome, None);
    assert_eq!(h.notifier.last(), Some(DenyReason::TargetNeverSeen));

    // an online target passes even with no history
    assert!(h.service.vote(actor(1), actor(2), VoteValue::Like).await.unwrap().is_some());
}

#[tokio::test]
async fn interaction_requirement_uses_recorded_proximity() {
    let h = harness(
        |cfg| {
            cfg.anti_abuse.interaction.enabled = true;
            cfg.anti_abuse.interaction.valid_secs = 600;
        },
        vec![],
    );
    let (voter, target) = (actor(1), actor(2));

    let blocked = h.service.vote(voter, target, VoteValue::Like).await.unwrap();
    assert_eq!(blocked, None);
    assert_eq!(h.notifier.last(), Some(DenyReason::InteractionRequired));

    let tracker = h.service.tracker().expect("tracker runs when enabled");
    tracker.record(voter, target, reputation_core::model::now_millis());

    let allowed = h.service.vote(voter, target, VoteValue::Like).await.unwrap();
    assert_eq!(allowed, Some(VoteOutcome::Created));

    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn same_network_votes_are_refused_in_deny_mode() {
    let h = harness(
        |cfg| cfg.anti_abuse.ip_protection.enabled = true,
        vec![],
    );
    let (voter, target) = (actor(1), actor(2));

    h.service.mark_seen(voter, Some("10.0.0.7")).await.unwrap();
    h.service.mark_seen(target, Some("10.0.0.7")).await.unwrap();

    let outcome = h.service.vote(voter, target, VoteValue::Like).await.unwrap();
    assert_eq!(outcome, None);
    assert_eq!(h.notifier.last(), Some(DenyReason::SameNetwork));

    // different addresses hash apart and pass
    h.service.mark_seen(target, Some("10.0.0.8")).await.unwrap();
    assert!(h.service.vote(voter, target, VoteValue::Like).await.unwrap().is_some());
}

#[tokio::test]
async fn required_reason_rejects_blank_and_missing_reasons() {
    let h = harness(|cfg| cfg.reasons.require_reason = true, vec![]);
    let (voter, target) = (actor(1), actor(2));

    assert_eq!(h.service.vote(voter, target, VoteValue::Like).await.unwrap(), None);
    assert_eq!(h.notifier.last(), Some(DenyReason::ReasonRequired));

    assert_eq!(
        h.service
            .vote_with_reason(voter, target, VoteValue::Like, "   ")
            .await
            .unwrap(),
        None
    );

    assert_eq!(
        h.service
            .vote_with_reason(voter, target, VoteValue::Like, "kind")
            .await
            .unwrap(),
        Some(VoteOutcome::Created)
    );
}

#[tokio::test]
async fn cache_serves_fresh_reads_and_invalidates_on_vote() {
    let h = harness(|cfg| cfg.cache.expire_secs = 300, vec![]);
    let (voter, target) = (actor(1), actor(2));

    let before = h.service.reputation(target).await.unwrap();
    assert_eq!(before.likes, 0);

    // cached copy is returned as-is
    let cached = h.service.reputation(target).await.unwrap();
    assert_eq!(cached.likes, before.likes);

    h.service.vote(voter, target, VoteValue::Like).await.unwrap();

    // the vote evicted the entry, so the next read sees the new counter
    let after = h.service.reputation(target).await.unwrap();
    assert_eq!(after.likes, 1);
}

#[tokio::test]
async fn history_voter_names_follow_the_configured_mode() {
    let viewer = actor(3);
    let h = harness(
        |cfg| cfg.history.voter_name_mode = VoterNameMode::Capability,
        vec![(viewer, Capability::ViewVoterNames)],
    );
    let (voter, target) = (actor(1), actor(2));
    h.presence.name(voter, "Ann");

    h.service.mark_seen(voter, None).await.unwrap();
    h.service.vote(voter, target, VoteValue::Like).await.unwrap();

    let privileged = h.service.history(viewer, target).await.unwrap();
    assert_eq!(privileged[0].voter_name.as_deref(), Some("Ann"));

    let plain = h.service.history(actor(4), target).await.unwrap();
    assert_eq!(plain[0].voter_name, None);
}

#[tokio::test]
async fn leaderboard_and_rank_reflect_votes() {
    let h = harness(|_| {}, vec![]);
    let (a, b) = (actor(10), actor(11));

    h.service.vote(actor(1), a, VoteValue::Like).await.unwrap();
    h.service.vote(actor(2), a, VoteValue::Like).await.unwrap();
    h.service.vote(actor(1), b, VoteValue::Dislike).await.unwrap();

    let top = h.service.top(TopCategory::Score, 10, 0).await.unwrap();
    assert_eq!(top.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);

    assert_eq!(h.service.rank(a).await.unwrap(), Some(1));
    assert_eq!(h.service.rank(b).await.unwrap(), Some(2));
    assert_eq!(h.service.rank(actor(99)).await.unwrap(), None);
}

#[tokio::test]
async fn mark_seen_all_sweeps_online_actors() {
    let h = harness(|_| {}, vec![]);
    h.presence.name(actor(1), "Ann");
    h.presence.name(actor(2), "Bea");

    h.service.mark_seen_all().await;

    assert_eq!(
        h.service.last_known_name(actor(1)).await.unwrap().as_deref(),
        Some("Ann")
    );
    let rep = h.service.reputation(actor(2)).await.unwrap();
    assert!(rep.seen);
    assert_eq!(rep.name.as_deref(), Some("Bea"));
}
