//! Batch scheduling for the perception pipeline.
//!
//! Three systems run in sequence each frame:
//! 1. `ingest_scene_events` - Scene-shaped triggers (walls, lights, effects, resets)
//! 2. `ingest_token_events` - Token moves and document changes
//! 3. `drive_scheduler` - Deadline checks and batch execution
//!
//! Triggers never compute anything directly. They mark tokens dirty and arm
//! a coalescing deadline on the scene clock; once the deadline passes and no
//! movement is in flight, one batch resolves every pair touching a dirty
//! token and applies the results atomically.

use std::sync::Arc;

use bevy::math::{Rect, Vec2};
use bevy::prelude::*;
use bevy::utils::HashSet;
use thiserror::Error;

use ahash::{AHashMap, AHashSet};
use perception_schema::{TokenId, VisibilityState, RANGE_UNLIMITED};

use crate::actor_doc::ActorDoc;
use crate::components::{ActorSheet, Token, TokenDocFlags, TokenPlacement};
use crate::decision::{decide_visibility, PairContext};
use crate::geometry::{
    line_of_sight, los_fingerprint, sound_blocked, walls_overlapping_span, ElevationFilterCache,
    LosCache, WallIndex,
};
use crate::lighting::{LightRegistry, LightingCache};
use crate::perception_config::{PerceptionConfig, PerceptionConfigHandle};
use crate::quadtree::SpatialIndex;
use crate::refresh::{PerceptionRefreshEvent, RefreshEnvelope, RefreshHub};
use crate::resources::{PerceptionFrame, PositionOverrides, SceneClock, SceneContext, ViewportRect};
use crate::senses::{resolve_cached, SenseCache, SensingCapabilities};
use crate::visibility_map::VisibilityMapService;

/// A token began or continued moving. Re-arms the movement quiet period and
/// records the in-flight destination.
#[derive(Event, Debug, Clone, Copy)]
pub struct TokenMovedEvent {
    pub entity: Entity,
    pub position: Vec2,
}

/// A token's committed document changed (placement, sheet, embedded light).
#[derive(Event, Debug, Clone, Copy)]
pub struct TokenChangedEvent {
    pub entity: Entity,
}

/// A token left the scene. Cleans every record keyed by it, both the durable
/// `TokenId` records and the entity-keyed in-flight state.
#[derive(Event, Debug, Clone, Copy)]
pub struct TokenRemovedEvent {
    pub entity: Entity,
    pub token: TokenId,
}

/// Wall geometry changed. Sight caches die and everything recomputes.
#[derive(Event, Debug, Clone, Copy, Default)]
pub struct WallsChangedEvent;

/// Light or darkness sources changed.
#[derive(Event, Debug, Clone, Copy, Default)]
pub struct LightsChangedEvent;

/// An effect or condition on a token changed; its sense memo is stale.
#[derive(Event, Debug, Clone, Copy)]
pub struct EffectsChangedEvent {
    pub entity: Entity,
}

/// The host tore the scene down or swapped to another one.
#[derive(Event, Debug, Clone, Copy, Default)]
pub struct SceneResetEvent;

/// Host-requested recompute of every pair.
#[derive(Event, Debug, Clone, Copy, Default)]
pub struct FullRecomputeRequested;

/// Where the scheduler currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    #[default]
    Idle,
    /// Absorbing triggers until the deadline passes on the scene clock.
    Coalescing { deadline_ms: u64 },
    /// A batch is resolving right now.
    Processing,
}

/// Running totals plus a snapshot of the most recent batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub batches_run: u64,
    pub batches_failed: u64,
    pub last_universe: u32,
    pub last_pairs: u32,
    pub last_changed: u32,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("scene bounds are degenerate: {0:?}")]
    DegenerateBounds(Rect),
    #[error("scene grid scale is unusable (grid_size_px {grid_size_px}, feet_per_square {feet_per_square})")]
    InvalidGridScale {
        grid_size_px: f32,
        feet_per_square: f32,
    },
}

/// The coalescing state machine.
#[derive(Resource, Debug, Default)]
pub struct BatchScheduler {
    phase: SchedulerPhase,
    pending: HashSet<Entity>,
    full_recompute: bool,
    movement_quiet_until: Option<u64>,
    pub stats: BatchStats,
}

impl BatchScheduler {
    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_full_recompute(&self) -> bool {
        self.full_recompute
    }

    /// Marks one token dirty and arms the deadline if nothing is armed yet.
    /// Triggers landing mid-window do not push the deadline out.
    pub fn enqueue_token(&mut self, entity: Entity, now_ms: u64, delay_ms: u64) {
        self.pending.insert(entity);
        self.arm(now_ms, delay_ms);
    }

    /// Marks the whole scene dirty.
    pub fn enqueue_all(&mut self, now_ms: u64, delay_ms: u64) {
        self.full_recompute = true;
        self.arm(now_ms, delay_ms);
    }

    /// Pushes the movement quiet deadline out. Batches hold off while any
    /// token is still animating.
    pub fn note_movement(&mut self, now_ms: u64, quiet_ms: u64) {
        let quiet_until = now_ms.saturating_add(quiet_ms);
        self.movement_quiet_until = Some(
            self.movement_quiet_until
                .map_or(quiet_until, |present| present.max(quiet_until)),
        );
    }

    fn arm(&mut self, now_ms: u64, delay_ms: u64) {
        if self.phase == SchedulerPhase::Idle {
            self.phase = SchedulerPhase::Coalescing {
                deadline_ms: now_ms.saturating_add(delay_ms),
            };
        }
    }

    /// Whether a batch should run right now.
    pub fn ready(&self, now_ms: u64) -> bool {
        let SchedulerPhase::Coalescing { deadline_ms } = self.phase else {
            return false;
        };
        if now_ms < deadline_ms {
            return false;
        }
        if let Some(quiet_until) = self.movement_quiet_until {
            if now_ms < quiet_until {
                return false;
            }
        }
        self.full_recompute || !self.pending.is_empty()
    }

    /// Drains the dirty set and enters the processing phase.
    pub fn take_batch(&mut self) -> (Vec<Entity>, bool) {
        let entities: Vec<Entity> = self.pending.drain().collect();
        let full = self.full_recompute;
        self.full_recompute = false;
        self.movement_quiet_until = None;
        self.phase = SchedulerPhase::Processing;
        (entities, full)
    }

    /// Leaves the processing phase. Work that accumulated while processing
    /// re-arms immediately instead of waiting for a fresh trigger.
    pub fn exit_processing(&mut self, now_ms: u64) {
        self.phase = if self.pending.is_empty() && !self.full_recompute {
            SchedulerPhase::Idle
        } else {
            SchedulerPhase::Coalescing {
                deadline_ms: now_ms,
            }
        };
    }

    /// Forgets everything queued. Counters survive; they are lifetime totals.
    pub fn reset(&mut self) {
        self.phase = SchedulerPhase::Idle;
        self.pending.clear();
        self.full_recompute = false;
        self.movement_quiet_until = None;
    }
}

/// Releases the processing phase when dropped, so a batch that errors or
/// panics can never wedge the scheduler in `Processing`.
struct ProcessingReset<'a> {
    scheduler: &'a mut BatchScheduler,
    now_ms: u64,
}

impl Drop for ProcessingReset<'_> {
    fn drop(&mut self) {
        self.scheduler.exit_processing(self.now_ms);
    }
}

/// Every cache the batch consults, kept under one resource so invalidation
/// has a single home.
#[derive(Resource, Debug, Default)]
pub struct PerceptionCaches {
    pub senses: SenseCache,
    pub lighting: LightingCache,
    pub los: LosCache,
    pub elevation: ElevationFilterCache,
}

impl PerceptionCaches {
    pub fn clear_all(&mut self) {
        self.senses.clear();
        self.lighting.clear();
        self.los.clear();
        self.elevation.clear();
    }
}

/// Step 1: Fold scene-shaped triggers into scheduler and cache state.
#[allow(clippy::too_many_arguments)] // event ingestion touches every store
pub fn ingest_scene_events(
    mut scheduler: ResMut<BatchScheduler>,
    clock: Res<SceneClock>,
    config: Res<PerceptionConfigHandle>,
    mut caches: ResMut<PerceptionCaches>,
    mut map: ResMut<VisibilityMapService>,
    mut overrides: ResMut<PositionOverrides>,
    tokens: Query<&Token>,
    mut reset_events: EventReader<SceneResetEvent>,
    mut walls_events: EventReader<WallsChangedEvent>,
    mut lights_events: EventReader<LightsChangedEvent>,
    mut effects_events: EventReader<EffectsChangedEvent>,
    mut removed_events: EventReader<TokenRemovedEvent>,
    mut full_events: EventReader<FullRecomputeRequested>,
) {
    let now_ms = clock.now_ms;
    let delay_ms = config.0.coalesce.batch_delay_ms;

    if reset_events.read().next().is_some() {
        tracing::info!(target: "umbra::scheduler", "scheduler.scene_reset");
        scheduler.reset();
        caches.clear_all();
        map.clear();
        overrides.clear_all();
        // Remaining triggers described the torn-down scene.
        walls_events.clear();
        lights_events.clear();
        effects_events.clear();
        removed_events.clear();
        full_events.clear();
        return;
    }

    if walls_events.read().next().is_some() {
        tracing::debug!(target: "umbra::scheduler", "scheduler.walls_changed");
        caches.los.clear();
        caches.elevation.clear();
        scheduler.enqueue_all(now_ms, delay_ms);
    }

    if lights_events.read().next().is_some() {
        tracing::debug!(target: "umbra::scheduler", "scheduler.lights_changed");
        caches.lighting.clear();
        scheduler.enqueue_all(now_ms, delay_ms);
    }

    for event in effects_events.read() {
        if let Ok(token) = tokens.get(event.entity) {
            caches.senses.invalidate(token.id);
        }
        scheduler.enqueue_token(event.entity, now_ms, delay_ms);
    }

    for event in removed_events.read() {
        map.remove_token(event.token);
        caches.senses.invalidate(event.token);
        caches.los.retain_tokens(|candidate| candidate != event.token);
        overrides.clear(event.entity);
    }

    if full_events.read().next().is_some() {
        scheduler.enqueue_all(now_ms, delay_ms);
    }
}

/// Step 2: Fold token moves and document changes into the dirty set.
pub fn ingest_token_events(
    mut scheduler: ResMut<BatchScheduler>,
    clock: Res<SceneClock>,
    config: Res<PerceptionConfigHandle>,
    mut overrides: ResMut<PositionOverrides>,
    mut moved_events: EventReader<TokenMovedEvent>,
    mut changed_events: EventReader<TokenChangedEvent>,
) {
    let now_ms = clock.now_ms;
    let delay_ms = config.0.coalesce.batch_delay_ms;
    let quiet_ms = config.0.coalesce.movement_quiet_ms;

    for event in moved_events.read() {
        overrides.set(event.entity, event.position);
        scheduler.enqueue_token(event.entity, now_ms, delay_ms);
        scheduler.note_movement(now_ms, quiet_ms);
    }

    for event in changed_events.read() {
        // A committed document supersedes any in-flight destination.
        overrides.clear(event.entity);
        scheduler.enqueue_token(event.entity, now_ms, delay_ms);
    }
}

/// Step 3: Run a batch when the deadline has passed and movement is quiet.
#[allow(clippy::too_many_arguments)] // the batch reads the whole scene
pub fn drive_scheduler(
    mut scheduler: ResMut<BatchScheduler>,
    clock: Res<SceneClock>,
    frame: Res<PerceptionFrame>,
    config: Res<PerceptionConfigHandle>,
    scene: Res<SceneContext>,
    walls: Option<Res<WallIndex>>,
    lights: Res<LightRegistry>,
    overrides: Res<PositionOverrides>,
    viewport: Option<Res<ViewportRect>>,
    mut spatial: ResMut<SpatialIndex>,
    mut caches: ResMut<PerceptionCaches>,
    mut map: ResMut<VisibilityMapService>,
    hub: Option<Res<RefreshHub>>,
    mut refresh_events: EventWriter<PerceptionRefreshEvent>,
    tokens: Query<(
        Entity,
        &Token,
        &TokenPlacement,
        Option<&ActorSheet>,
        Option<&TokenDocFlags>,
    )>,
) {
    let now_ms = clock.now_ms;
    if !scheduler.ready(now_ms) {
        return;
    }

    let cfg = config.0.as_ref();
    let (changed_entities, full_recompute) = scheduler.take_batch();

    tracing::info!(
        target: "umbra::scheduler",
        frame = frame.0,
        changed = changed_entities.len(),
        full = full_recompute,
        "visibility.batch START"
    );

    let outcome = {
        let _reset = ProcessingReset {
            scheduler: &mut scheduler,
            now_ms,
        };
        run_batch(
            &changed_entities,
            full_recompute,
            now_ms,
            cfg,
            &scene,
            walls.as_deref(),
            &lights,
            &overrides,
            viewport.as_deref(),
            &mut spatial,
            &mut caches,
            &mut map,
            &tokens,
        )
    };

    match outcome {
        Ok(report) => {
            scheduler.stats.batches_run += 1;
            scheduler.stats.last_universe = report.universe as u32;
            scheduler.stats.last_pairs = report.pairs as u32;
            scheduler.stats.last_changed = report.changed as u32;
            tracing::info!(
                target: "umbra::scheduler",
                frame = frame.0,
                universe = report.universe,
                pairs = report.pairs,
                changed = report.changed,
                "visibility.batch END"
            );
            if report.changed > 0 {
                refresh_events.send(PerceptionRefreshEvent {
                    frame: frame.0,
                    changed_pairs: report.changed as u32,
                });
                if let Some(hub) = hub.as_deref() {
                    hub.publish(RefreshEnvelope {
                        frame: frame.0,
                        changed_pairs: report.changed as u32,
                        clock_ms: now_ms,
                    });
                }
            }
        }
        Err(err) => {
            scheduler.stats.batches_failed += 1;
            tracing::error!(
                target: "umbra::scheduler",
                frame = frame.0,
                error = %err,
                "visibility.batch FAILED - state unchanged"
            );
        }
    }
}

/// Step 4: Advance the frame counter.
pub fn advance_frame(mut frame: ResMut<PerceptionFrame>) {
    frame.0 += 1;
}

struct BatchToken {
    entity: Entity,
    token: TokenId,
    placement: TokenPlacement,
    /// Override-resolved center actually used for this batch.
    position: Vec2,
    sheet: Arc<ActorDoc>,
}

struct BatchReport {
    universe: usize,
    pairs: usize,
    changed: usize,
}

type TokenQuery<'w, 's, 'a, 'b, 'c, 'd> = Query<
    'w,
    's,
    (
        Entity,
        &'a Token,
        &'b TokenPlacement,
        Option<&'c ActorSheet>,
        Option<&'d TokenDocFlags>,
    ),
>;

#[allow(clippy::too_many_arguments)]
fn run_batch(
    changed_entities: &[Entity],
    full_recompute: bool,
    now_ms: u64,
    cfg: &PerceptionConfig,
    scene: &SceneContext,
    walls: Option<&WallIndex>,
    lights: &LightRegistry,
    overrides: &PositionOverrides,
    viewport: Option<&ViewportRect>,
    spatial: &mut SpatialIndex,
    caches: &mut PerceptionCaches,
    map: &mut VisibilityMapService,
    tokens: &TokenQuery,
) -> Result<BatchReport, BatchError> {
    if scene.grid_size_px <= 0.0 || scene.feet_per_square <= 0.0 {
        return Err(BatchError::InvalidGridScale {
            grid_size_px: scene.grid_size_px,
            feet_per_square: scene.feet_per_square,
        });
    }
    if scene.bounds.width() <= 0.0 || scene.bounds.height() <= 0.0 {
        return Err(BatchError::DegenerateBounds(scene.bounds));
    }

    let _span = tracing::debug_span!(
        target: "umbra::scheduler",
        "run_batch",
        full = full_recompute,
        los_enabled = cfg.line_of_sight.enabled,
    )
    .entered();

    let fallback_sheet = Arc::new(ActorDoc::default());

    // Universe: every token that participates in visibility at all.
    let mut universe: Vec<BatchToken> = Vec::new();
    for (entity, token, placement, sheet, doc_flags) in tokens.iter() {
        if doc_flags.map_or(false, |flags| flags.hidden) {
            continue;
        }
        let sheet = sheet
            .map(|sheet| Arc::clone(&sheet.0))
            .unwrap_or_else(|| Arc::clone(&fallback_sheet));
        if matches!(sheet.actor_type(), Some("loot") | Some("hazard")) {
            continue;
        }
        if sheet.defeated() {
            continue;
        }
        universe.push(BatchToken {
            entity,
            token: token.id,
            placement: *placement,
            position: overrides.resolve(entity, placement.center),
            sheet,
        });
    }

    // Viewport restriction. Dirty tokens stay in even when parked outside,
    // and an empty cut falls back to the whole universe.
    if cfg.viewport.enabled {
        if let Some(rect) = viewport.and_then(|viewport| viewport.rect) {
            let padded = Rect::from_corners(
                rect.min - Vec2::splat(cfg.viewport.padding_px),
                rect.max + Vec2::splat(cfg.viewport.padding_px),
            );
            let changed_set: HashSet<Entity> = changed_entities.iter().copied().collect();
            let (kept, outside): (Vec<BatchToken>, Vec<BatchToken>) =
                universe.into_iter().partition(|entry| {
                    padded.contains(entry.position) || changed_set.contains(&entry.entity)
                });
            universe = if kept.is_empty() { outside } else { kept };
        }
    }

    let universe_len = universe.len();
    let index_of: AHashMap<Entity, usize> = universe
        .iter()
        .enumerate()
        .map(|(index, entry)| (entry.entity, index))
        .collect();

    let dirty: Vec<usize> = if full_recompute {
        (0..universe_len).collect()
    } else {
        changed_entities
            .iter()
            .filter_map(|entity| index_of.get(entity).copied())
            .collect()
    };

    if dirty.is_empty() {
        return Ok(BatchReport {
            universe: universe_len,
            pairs: 0,
            changed: 0,
        });
    }

    spatial.rebuild(
        scene.bounds,
        universe.iter().map(|entry| (entry.entity, entry.position)),
    );
    caches
        .lighting
        .begin_batch(lights, scene, &cfg.lighting, now_ms);

    // Ordered pairs that need fresh answers: every pair with a dirty token
    // on either side, each evaluated exactly once.
    let mut pair_set: AHashSet<(usize, usize)> = AHashSet::new();
    for &dirty_index in &dirty {
        // Dirty token as target: every other token re-examines it.
        for observer_index in 0..universe_len {
            if observer_index != dirty_index {
                pair_set.insert((observer_index, dirty_index));
            }
        }
        // Dirty token as observer: targets within its sense reach.
        let observer = &universe[dirty_index];
        let caps = resolve_cached(
            &mut caches.senses,
            observer.token,
            &observer.sheet,
            &cfg.senses,
            now_ms,
        );
        let reach_px = scene.feet_to_px(max_sense_range_ft(&caps));
        for target_entity in spatial.query_circle(observer.position, reach_px) {
            if let Some(&target_index) = index_of.get(&target_entity) {
                if target_index != dirty_index {
                    pair_set.insert((dirty_index, target_index));
                }
            }
        }
    }

    let sneak_guarded: AHashSet<TokenId> = universe
        .iter()
        .filter(|entry| entry.sheet.sneak_active())
        .map(|entry| entry.token)
        .collect();

    let empty_walls: Vec<crate::geometry::WallSegment> = Vec::new();
    let mut results: Vec<(TokenId, TokenId, VisibilityState)> =
        Vec::with_capacity(pair_set.len());

    for (observer_index, target_index) in pair_set {
        let observer = &universe[observer_index];
        let target = &universe[target_index];

        let caps = resolve_cached(
            &mut caches.senses,
            observer.token,
            &observer.sheet,
            &cfg.senses,
            now_ms,
        );
        let ctx = pair_context(
            observer, target, now_ms, cfg, scene, walls, lights, caches, &empty_walls,
        );
        let state = decide_visibility(&caps, &ctx);
        results.push((observer.token, target.token, state));
    }

    let pairs = results.len();
    let changed = map.apply_batch(&results, &sneak_guarded);

    Ok(BatchReport {
        universe: universe_len,
        pairs,
        changed,
    })
}

/// Resolves the geometric and environmental half of one pair.
#[allow(clippy::too_many_arguments)]
fn pair_context(
    observer: &BatchToken,
    target: &BatchToken,
    now_ms: u64,
    cfg: &PerceptionConfig,
    scene: &SceneContext,
    walls: Option<&WallIndex>,
    lights: &LightRegistry,
    caches: &mut PerceptionCaches,
    empty_walls: &[crate::geometry::WallSegment],
) -> PairContext {
    let distance_ft = scene.distance_feet(observer.position, target.position);
    let target_light = caches
        .lighting
        .sample(target.position, lights, scene, &cfg.lighting);

    let (observer_bottom, observer_top) =
        observer.placement.vertical_span_ft(scene.feet_per_square);
    let (target_bottom, target_top) = target.placement.vertical_span_ft(scene.feet_per_square);
    let span_lo = observer_bottom.min(target_bottom);
    let span_hi = observer_top.max(target_top);

    let (line_of_sight_granted, pair_sound_blocked) = match walls {
        Some(index) => {
            let filtered = walls_overlapping_span(
                &mut caches.elevation,
                index,
                span_lo,
                span_hi,
                now_ms,
                cfg.line_of_sight.cache_ttl_ms,
            );
            let fingerprint = los_fingerprint(
                observer.position,
                observer.placement.elevation_ft,
                target.position,
                target.placement.elevation_ft,
                index.revision(),
            );
            let granted = match caches.los.get(
                observer.token,
                target.token,
                fingerprint,
                now_ms,
                cfg.line_of_sight.cache_ttl_ms,
            ) {
                Some(granted) => granted,
                None => {
                    let granted = line_of_sight(
                        observer.position,
                        target.position,
                        &target.placement,
                        &filtered,
                        &cfg.line_of_sight,
                        scene,
                    );
                    caches.los.insert(
                        observer.token,
                        target.token,
                        fingerprint,
                        granted,
                        now_ms,
                    );
                    granted
                }
            };
            let blocked = sound_blocked(observer.position, target.position, &filtered);
            (granted, blocked)
        }
        // No wall data: sight fails open, sound passes.
        None => {
            let granted = line_of_sight(
                observer.position,
                target.position,
                &target.placement,
                empty_walls,
                &cfg.line_of_sight,
                scene,
            );
            (granted, false)
        }
    };

    let silence = observer.sheet.silence_active() || target.sheet.silence_active();

    PairContext {
        distance_ft,
        target_light,
        line_of_sight: line_of_sight_granted,
        sound_blocked: pair_sound_blocked || silence,
    }
}

/// Longest reach of any channel, for bounding spatial queries. Unlimited
/// senses make the reach unbounded.
fn max_sense_range_ft(caps: &SensingCapabilities) -> f32 {
    let mut max_range = 0.0f32;
    for range in caps.precise.values().chain(caps.imprecise.values()) {
        if !range.is_finite() {
            return RANGE_UNLIMITED;
        }
        max_range = max_range.max(*range);
    }
    max_range
}
