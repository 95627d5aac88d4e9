//! Interaction tracker
//!
//! A periodic sampler records "observer saw observed nearby" timestamps into
//! a directional map. The proximity policy rule asks whether a voter has a
//! sufficiently recent record for the target. Records live only in memory;
//! restarting the tracker resets the window.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::InteractionConfig;
use crate::model::{now_millis, ActorId};
use crate::presence::Presence;

pub struct InteractionTracker {
    records: Arc<DashMap<ActorId, DashMap<ActorId, i64>>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl InteractionTracker {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Start the periodic sampling task. Must run inside a tokio runtime.
    pub fn start(&self, presence: Arc<dyn Presence>, cfg: InteractionConfig) {
        let records = Arc::clone(&self.records);
        let radius = cfg.radius;
        let period = std::time::Duration::from_secs(cfg.sample_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sample(presence.as_ref(), &records, radius, now_millis());
            }
        });

        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
        info!("Interaction tracker started (radius {radius}, every {period:?})");
    }

    /// Stop sampling and drop the whole window.
    pub fn shutdown(&self) {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        self.records.clear();
        debug!("Interaction tracker stopped");
    }

    /// Record an explicit interaction (hosts may feed direct events here in
    /// addition to the proximity sampler).
    pub fn record(&self, observer: ActorId, observed: ActorId, at_ms: i64) {
        self.records
            .entry(observer)
            .or_default()
            .insert(observed, at_ms);
    }

    /// Whether `voter` has seen `target` within the last `valid_ms`.
    pub fn has_recent_interaction(&self, voter: &ActorId, target: &ActorId, valid_ms: i64) -> bool {
        let Some(map) = self.records.get(voter) else {
            return false;
        };
        let Some(t) = map.get(target) else {
            return false;
        };
        now_millis() - *t <= valid_ms
    }
}

impl Default for InteractionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One sampling pass: every online actor observes every other online actor
/// within `radius`. Directional, so a mutual pair yields two records.
fn sample(
    presence: &dyn Presence,
    records: &DashMap<ActorId, DashMap<ActorId, i64>>,
    radius: f64,
    now_ms: i64,
) {
    let radius_sq = radius * radius;
    let online = presence.online_actors();

    for observer in &online {
        let Some(pos) = presence.position(observer) else {
            continue;
        };
        for observed in &online {
            if observed == observer {
                continue;
            }
            let Some(other) = presence.position(observed) else {
                continue;
            };
            if pos.distance_sq(&other) <= radius_sq {
                records
                    .entry(*observer)
                    .or_default()
                    .insert(*observed, now_ms);
            }
        }
    }
}
