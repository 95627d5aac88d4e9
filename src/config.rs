//! Service configuration
//!
//! Loaded from TOML; every field has a serde default so a partial file (or no
//! file at all) yields a working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RepError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub score: ScoreConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub reasons: ReasonsConfig,
    #[serde(default)]
    pub anti_abuse: AntiAbuseConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RepError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| RepError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Which persistence backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Upper bound on waiting for the database when it is busy.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// YAML document for the file backend.
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
            busy_timeout_ms: default_busy_timeout(),
            file_path: default_file_path(),
        }
    }
}

fn default_backend() -> BackendKind { BackendKind::Sqlite }
fn default_sqlite_path() -> PathBuf { PathBuf::from("data.db") }
fn default_busy_timeout() -> u64 { 10_000 }
fn default_file_path() -> PathBuf { PathBuf::from("data.yml") }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a cached reputation snapshot stays valid.
    #[serde(default = "default_cache_expire")]
    pub expire_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expire_secs: default_cache_expire(),
        }
    }
}

fn default_cache_expire() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Score reported with no votes at all.
    #[serde(default = "default_score")]
    pub default: f64,

    #[serde(default = "default_like_weight")]
    pub like_weight: f64,

    #[serde(default = "default_dislike_weight")]
    pub dislike_weight: f64,

    #[serde(default = "default_score_min")]
    pub min: f64,

    #[serde(default = "default_score_max")]
    pub max: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            default: default_score(),
            like_weight: default_like_weight(),
            dislike_weight: default_dislike_weight(),
            min: default_score_min(),
            max: default_score_max(),
        }
    }
}

fn default_score() -> f64 { 5.0 }
fn default_like_weight() -> f64 { 0.1 }
fn default_dislike_weight() -> f64 { 0.1 }
fn default_score_min() -> f64 { 0.0 }
fn default_score_max() -> f64 { 10.0 }

/// How voter names appear in a target's vote history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoterNameMode {
    /// Names always shown.
    Always,
    /// Names never shown.
    Anonymous,
    /// Shown only to viewers holding the view-voter-names capability.
    Capability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Display limit for recent votes. The file backend prunes its log to a
    /// small multiple of this.
    #[serde(default = "default_history_limit")]
    pub limit: u32,

    #[serde(default = "default_voter_name_mode")]
    pub voter_name_mode: VoterNameMode,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            voter_name_mode: default_voter_name_mode(),
        }
    }
}

fn default_history_limit() -> u32 { 10 }
fn default_voter_name_mode() -> VoterNameMode { VoterNameMode::Capability }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When set, the reasonless vote path is rejected outright.
    #[serde(default)]
    pub require_reason: bool,
}

impl Default for ReasonsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_reason: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiAbuseConfig {
    #[serde(default = "default_true")]
    pub prevent_self_vote: bool,

    /// Deny votes against targets that are not currently online.
    #[serde(default)]
    pub require_target_online: bool,

    /// Deny votes against identities with no history (never online, never
    /// played before).
    #[serde(default = "default_true")]
    pub require_played_before: bool,

    #[serde(default)]
    pub cooldowns: CooldownConfig,

    #[serde(default)]
    pub daily_limit: DailyLimitConfig,

    #[serde(default)]
    pub interaction: InteractionConfig,

    #[serde(default)]
    pub ip_protection: IpProtectionConfig,
}

impl Default for AntiAbuseConfig {
    fn default() -> Self {
        Self {
            prevent_self_vote: true,
            require_target_online: false,
            require_played_before: true,
            cooldowns: CooldownConfig::default(),
            daily_limit: DailyLimitConfig::default(),
            interaction: InteractionConfig::default(),
            ip_protection: IpProtectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Minimum gap between any two votes from the same voter. Zero disables.
    #[serde(default = "default_global_cd")]
    pub global_secs: u64,

    /// Minimum gap between votes at the same target. Zero disables.
    #[serde(default = "default_same_target_cd")]
    pub same_target_secs: u64,

    /// Extra gap before flipping an existing vote. Zero disables.
    #[serde(default = "default_change_vote_cd")]
    pub change_vote_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            global_secs: default_global_cd(),
            same_target_secs: default_same_target_cd(),
            change_vote_secs: default_change_vote_cd(),
        }
    }
}

fn default_global_cd() -> u64 { 20 }
fn default_same_target_cd() -> u64 { 600 }
fn default_change_vote_cd() -> u64 { 1_800 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Active (non-retracted) votes allowed since local midnight. Zero
    /// disables.
    #[serde(default = "default_max_per_day")]
    pub max_votes_per_day: u32,
}

impl Default for DailyLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_votes_per_day: default_max_per_day(),
        }
    }
}

fn default_max_per_day() -> u32 { 20 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// Require a recent proximity interaction between voter and target.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sampling radius.
    #[serde(default = "default_radius")]
    pub radius: f64,

    /// Sampling tick period.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// How long a recorded interaction stays valid.
    #[serde(default = "default_interaction_valid")]
    pub valid_secs: u64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: default_radius(),
            sample_interval_secs: default_sample_interval(),
            valid_secs: default_interaction_valid(),
        }
    }
}

fn default_radius() -> f64 { 100.0 }
fn default_sample_interval() -> u64 { 2 }
fn default_interaction_valid() -> u64 { 600 }

/// Behavior when voter and target share a network identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    /// Same network always denies.
    Deny,
    /// Same network applies its own cooldown window instead.
    Cooldown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpProtectionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ip_mode")]
    pub mode: IpMode,

    #[serde(default = "default_ip_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for IpProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_ip_mode(),
            cooldown_secs: default_ip_cooldown(),
        }
    }
}

fn default_ip_mode() -> IpMode { IpMode::Deny }
fn default_ip_cooldown() -> u64 { 86_400 }

fn default_true() -> bool { true }
