//! Host seams
//!
//! Presence, capabilities and denial delivery belong to the embedding host;
//! the core only consumes them through these traits.

use crate::model::ActorId;
use crate::policy::DenyReason;

/// A point in the host's world, for proximity sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn distance_sq(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// Who is present right now, and who has ever been here before.
pub trait Presence: Send + Sync {
    fn is_online(&self, actor: &ActorId) -> bool;

    /// Whether this identity has any history with the host at all.
    fn has_played_before(&self, actor: &ActorId) -> bool;

    /// Current position of an online actor, if the host tracks one.
    fn position(&self, actor: &ActorId) -> Option<Position>;

    fn online_actors(&self) -> Vec<ActorId>;

    /// Display name the host currently knows for this actor, online or not.
    fn display_name(&self, actor: &ActorId) -> Option<String> {
        let _ = actor;
        None
    }
}

/// Capabilities that relax individual policy rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Skip the global, per-target, flip and daily-quota checks.
    CooldownBypass,
    /// Skip the proximity-interaction requirement.
    InteractionBypass,
    /// Skip the same-network restriction.
    IpBypass,
    /// See voter names in vote history when the mode is capability-gated.
    ViewVoterNames,
}

pub trait Capabilities: Send + Sync {
    fn has(&self, actor: &ActorId, cap: Capability) -> bool;
}

/// Grants nothing; the safe default.
pub struct NoCapabilities;

impl Capabilities for NoCapabilities {
    fn has(&self, _actor: &ActorId, _cap: Capability) -> bool {
        false
    }
}

/// Side channel for policy denials. A denied vote never surfaces as an error
/// or an outcome; the host renders the reason to the voter however it wants.
pub trait Notifier: Send + Sync {
    fn denied(&self, voter: &ActorId, reason: &DenyReason);
}

/// Swallows every denial.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn denied(&self, _voter: &ActorId, _reason: &DenyReason) {}
}
