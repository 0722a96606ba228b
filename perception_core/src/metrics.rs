//! Per-frame snapshot of pipeline health, for hosts that poll instead of
//! subscribing to refresh events.

use bevy::prelude::*;

use crate::resources::PerceptionFrame;
use crate::scheduler::{BatchScheduler, PerceptionCaches};
use crate::visibility_map::VisibilityMapService;

#[derive(Resource, Debug, Clone, Default)]
pub struct PerceptionMetrics {
    pub frame: u64,
    pub batches_run: u64,
    pub batches_failed: u64,
    pub last_batch_universe: u32,
    pub last_batch_pairs: u32,
    pub last_batch_changed: u32,
    /// Non-default pair states currently stored.
    pub stored_states: usize,
    pub concealed_pairs: usize,
    pub hidden_pairs: usize,
    pub undetected_pairs: usize,
    pub override_pairs: usize,
    pub sense_cache_entries: usize,
    pub los_cache_entries: usize,
    pub lighting_memo_entries: usize,
}

/// Runs at the end of the frame chain and copies counters out of the
/// scheduler, the map, and the caches.
pub fn collect_metrics(
    frame: Res<PerceptionFrame>,
    scheduler: Res<BatchScheduler>,
    map: Res<VisibilityMapService>,
    caches: Option<Res<PerceptionCaches>>,
    mut metrics: ResMut<PerceptionMetrics>,
) {
    metrics.frame = frame.0;
    metrics.batches_run = scheduler.stats.batches_run;
    metrics.batches_failed = scheduler.stats.batches_failed;
    metrics.last_batch_universe = scheduler.stats.last_universe;
    metrics.last_batch_pairs = scheduler.stats.last_pairs;
    metrics.last_batch_changed = scheduler.stats.last_changed;

    metrics.stored_states = map.stored_len();
    metrics.override_pairs = map.override_len();
    let (concealed, hidden, undetected) = map.count_by_state();
    metrics.concealed_pairs = concealed;
    metrics.hidden_pairs = hidden;
    metrics.undetected_pairs = undetected;

    if let Some(caches) = caches {
        metrics.sense_cache_entries = caches.senses.len();
        metrics.los_cache_entries = caches.los.len();
        metrics.lighting_memo_entries = caches.lighting.memo_len();
    } else {
        metrics.sense_cache_entries = 0;
        metrics.los_cache_entries = 0;
        metrics.lighting_memo_entries = 0;
    }
}
