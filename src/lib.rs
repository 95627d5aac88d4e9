//! # reputation-core
//!
//! A per-actor reputation engine: likes and dislikes with a derived score,
//! tag reasons, vote history, leaderboards, and an ordered anti-abuse policy
//! chain in front of it all. Hosts embed [`ReputationService`] and supply
//! presence, capability and notification hooks through the traits in
//! [`presence`].
//!
//! Two persistence backends are available behind the [`storage::Storage`]
//! trait: an embedded SQLite database and a single YAML document. Both
//! resolve a vote the same three-way (created, changed, removed) and keep
//! the counters, the vote ledger, the tag histogram and the audit log in
//! step.

pub mod cache;
pub mod config;
pub mod error;
pub mod ident;
pub mod interaction;
pub mod model;
pub mod policy;
pub mod presence;
pub mod score;
pub mod service;
pub mod storage;

pub use cache::RepCache;
pub use config::{BackendKind, Config, IpMode, VoterNameMode};
pub use error::RepError;
pub use ident::network_identity_hash;
pub use interaction::InteractionTracker;
pub use model::{
    ActorId, Reputation, TopCategory, VoteLogEntry, VoteOutcome, VoteState, VoteValue,
};
pub use policy::{Decision, DenyReason, PolicyChain};
pub use presence::{
    Capabilities, Capability, NoCapabilities, Notifier, NullNotifier, Position, Presence,
};
pub use score::{ScoreFunction, WeightedScore};
pub use service::ReputationService;
pub use storage::{open, Storage};
