//! Wall geometry: line of sight and sound propagation.
//!
//! Sight runs on one of two paths. When the filtered wall set contains no
//! limited-sight walls, a single center-to-center ray against normal walls
//! answers the question. As soon as limited walls are involved the engine
//! falls back to sampling nine points on the target footprint, because
//! limited walls only block after a ray crosses enough distinct ones and a
//! binary center ray cannot express that.

use ahash::AHashMap;
use bevy::math::Vec2;
use bevy::prelude::Resource;
use std::hash::Hasher;
use std::sync::Arc;

use perception_schema::{BlockMode, DoorState, TokenId, WallSide};

use crate::components::TokenPlacement;
use crate::hashing::FnvHasher;
use crate::perception_config::LineOfSightConfig;
use crate::resources::SceneContext;

/// Tolerance for the parallel test in segment intersection.
const PARALLEL_EPSILON: f32 = 1e-6;

/// Two limited-wall crossings closer than this count as one. Walls that share
/// a corner produce coincident intersection points, and a ray grazing that
/// corner has pierced one barrier, not two.
const LIMITED_DEDUPE_EPSILON_PX: f32 = 0.1;

/// One wall segment as pushed by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    pub a: Vec2,
    pub b: Vec2,
    pub sight: BlockMode,
    pub sound: BlockMode,
    pub door: DoorState,
    pub direction: WallSide,
    /// Vertical extent in feet. `None` on either end means unbounded.
    pub bottom_ft: Option<f32>,
    pub top_ft: Option<f32>,
}

impl WallSegment {
    pub fn solid(a: Vec2, b: Vec2) -> Self {
        Self {
            a,
            b,
            sight: BlockMode::Normal,
            sound: BlockMode::Normal,
            door: DoorState::NotADoor,
            direction: WallSide::Both,
            bottom_ft: None,
            top_ft: None,
        }
    }

    pub fn with_sight(mut self, sight: BlockMode) -> Self {
        self.sight = sight;
        self
    }

    pub fn with_sound(mut self, sound: BlockMode) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_door(mut self, door: DoorState) -> Self {
        self.door = door;
        self
    }

    pub fn with_direction(mut self, direction: WallSide) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_span_ft(mut self, bottom: f32, top: f32) -> Self {
        self.bottom_ft = Some(bottom);
        self.top_ft = Some(top);
        self
    }

    /// Whether this wall can interrupt sight at all right now.
    pub fn blocks_sight(&self) -> bool {
        self.sight != BlockMode::None && self.door != DoorState::Open
    }

    pub fn blocks_sound(&self) -> bool {
        self.sound != BlockMode::None && self.door != DoorState::Open
    }

    /// Whether the wall's vertical extent overlaps `[lo_ft, hi_ft]`.
    pub fn overlaps_span_ft(&self, lo_ft: f32, hi_ft: f32) -> bool {
        let bottom = self.bottom_ft.unwrap_or(f32::NEG_INFINITY);
        let top = self.top_ft.unwrap_or(f32::INFINITY);
        bottom <= hi_ft && top >= lo_ft
    }

    /// One-way walls only stop rays coming from their blocking side. A ray
    /// origin collinear with the wall is treated as unblocked.
    pub fn faces_origin(&self, origin: Vec2) -> bool {
        match self.direction {
            WallSide::Both => true,
            WallSide::Left | WallSide::Right => {
                let side = cross2(self.b - self.a, origin - self.a);
                if side.abs() <= PARALLEL_EPSILON {
                    false
                } else if side > 0.0 {
                    self.direction == WallSide::Left
                } else {
                    self.direction == WallSide::Right
                }
            }
        }
    }
}

fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Intersection point of two closed segments, or `None` when they do not
/// cross. Parallel and collinear pairs never intersect here; a ray sliding
/// along a wall is not considered to pierce it.
pub fn segment_intersection(p1: Vec2, p2: Vec2, q1: Vec2, q2: Vec2) -> Option<Vec2> {
    let d1 = p2 - p1;
    let d2 = q2 - q1;
    let denom = cross2(d1, d2);
    if denom.abs() <= PARALLEL_EPSILON {
        return None;
    }
    let offset = q1 - p1;
    let t = cross2(offset, d2) / denom;
    let u = cross2(offset, d1) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(p1 + d1 * t)
    } else {
        None
    }
}

/// Authoritative wall set for the scene. The revision counter feeds cache
/// fingerprints so stale sight answers die with the walls that produced them.
#[derive(Resource, Debug, Default)]
pub struct WallIndex {
    walls: Vec<WallSegment>,
    revision: u64,
}

impl WallIndex {
    pub fn replace_walls(&mut self, walls: Vec<WallSegment>) {
        self.walls = walls;
        self.revision = self.revision.wrapping_add(1);
        tracing::debug!(
            target: "umbra::geometry",
            wall_count = self.walls.len(),
            revision = self.revision,
            "walls.replaced"
        );
    }

    pub fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn walls(&self) -> &[WallSegment] {
        &self.walls
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.walls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walls.is_empty()
    }
}

/// Memo of elevation-filtered wall sets, keyed by the quantized span and the
/// wall revision it was cut from.
#[derive(Debug, Default)]
pub struct ElevationFilterCache {
    entries: AHashMap<(i64, i64, u64), FilteredWalls>,
}

#[derive(Debug, Clone)]
struct FilteredWalls {
    walls: Arc<Vec<WallSegment>>,
    computed_at_ms: u64,
}

impl ElevationFilterCache {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Walls whose vertical extent overlaps `[lo_ft, hi_ft]`, served from the
/// memo when the span was filtered recently against the same wall revision.
pub fn walls_overlapping_span(
    cache: &mut ElevationFilterCache,
    index: &WallIndex,
    lo_ft: f32,
    hi_ft: f32,
    now_ms: u64,
    ttl_ms: u64,
) -> Arc<Vec<WallSegment>> {
    let key = (quantize_ft(lo_ft), quantize_ft(hi_ft), index.revision());
    if let Some(hit) = cache.entries.get(&key) {
        if now_ms.saturating_sub(hit.computed_at_ms) <= ttl_ms {
            return Arc::clone(&hit.walls);
        }
    }
    let walls: Arc<Vec<WallSegment>> = Arc::new(
        index
            .walls()
            .iter()
            .filter(|wall| wall.overlaps_span_ft(lo_ft, hi_ft))
            .copied()
            .collect(),
    );
    cache.entries.insert(
        key,
        FilteredWalls {
            walls: Arc::clone(&walls),
            computed_at_ms: now_ms,
        },
    );
    walls
}

fn quantize_ft(value: f32) -> i64 {
    if value.is_finite() {
        value.round() as i64
    } else if value > 0.0 {
        i64::MAX
    } else {
        i64::MIN
    }
}

/// Whether the observer can draw sight to the target through `walls`.
///
/// `walls` must already be elevation-filtered. Positions are the resolved
/// centers, which may differ from the committed placement mid-movement.
pub fn line_of_sight(
    observer_pos: Vec2,
    target_pos: Vec2,
    target: &TokenPlacement,
    walls: &[WallSegment],
    config: &LineOfSightConfig,
    scene: &SceneContext,
) -> bool {
    if !config.enabled {
        return true;
    }

    let sight_walls: Vec<&WallSegment> = walls
        .iter()
        .filter(|wall| wall.blocks_sight() && wall.faces_origin(observer_pos))
        .collect();
    if sight_walls.is_empty() {
        return true;
    }

    let has_limited = sight_walls
        .iter()
        .any(|wall| wall.sight == BlockMode::Limited);

    if !has_limited {
        // Fast path: one ray, first normal hit wins.
        return !sight_walls
            .iter()
            .any(|wall| segment_intersection(observer_pos, target_pos, wall.a, wall.b).is_some());
    }

    let half = target.half_extents_px(scene.grid_size_px);
    let samples = footprint_samples(target_pos, half, config.sample_inset_px);
    samples.iter().any(|sample| {
        sample_visible(
            observer_pos,
            *sample,
            &sight_walls,
            config.limited_wall_threshold,
        )
    })
}

/// Nine probe points on a token footprint: center, inset corners, inset edge
/// midpoints. Tiny tokens collapse toward the center rather than inverting.
pub fn footprint_samples(center: Vec2, half_extents: Vec2, inset_px: f32) -> [Vec2; 9] {
    let hx = (half_extents.x - inset_px).max(0.0);
    let hy = (half_extents.y - inset_px).max(0.0);
    [
        center,
        center + Vec2::new(-hx, -hy),
        center + Vec2::new(hx, -hy),
        center + Vec2::new(-hx, hy),
        center + Vec2::new(hx, hy),
        center + Vec2::new(0.0, -hy),
        center + Vec2::new(0.0, hy),
        center + Vec2::new(-hx, 0.0),
        center + Vec2::new(hx, 0.0),
    ]
}

fn sample_visible(
    origin: Vec2,
    sample: Vec2,
    sight_walls: &[&WallSegment],
    limited_threshold: u32,
) -> bool {
    let mut limited_hits: Vec<Vec2> = Vec::new();
    for wall in sight_walls {
        let Some(hit) = segment_intersection(origin, sample, wall.a, wall.b) else {
            continue;
        };
        match wall.sight {
            BlockMode::Normal => return false,
            BlockMode::Limited => {
                let duplicate = limited_hits
                    .iter()
                    .any(|seen| seen.distance(hit) <= LIMITED_DEDUPE_EPSILON_PX);
                if !duplicate {
                    limited_hits.push(hit);
                }
            }
            BlockMode::None => {}
        }
    }
    (limited_hits.len() as u32) < limited_threshold
}

/// Whether sound is cut between the two points. Only normal sound walls
/// block; limited sound walls attenuate without silencing, which this model
/// rounds down to "not blocked".
pub fn sound_blocked(observer_pos: Vec2, target_pos: Vec2, walls: &[WallSegment]) -> bool {
    walls.iter().any(|wall| {
        wall.sound == BlockMode::Normal
            && wall.blocks_sound()
            && wall.faces_origin(observer_pos)
            && segment_intersection(observer_pos, target_pos, wall.a, wall.b).is_some()
    })
}

/// Directional sight-check memo. Entries are only trusted while both the
/// fingerprint of their inputs and the TTL hold.
#[derive(Debug, Default)]
pub struct LosCache {
    entries: AHashMap<(TokenId, TokenId), LosCacheEntry>,
}

#[derive(Debug, Clone, Copy)]
struct LosCacheEntry {
    granted: bool,
    fingerprint: u64,
    computed_at_ms: u64,
}

impl LosCache {
    pub fn get(
        &self,
        observer: TokenId,
        target: TokenId,
        fingerprint: u64,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Option<bool> {
        self.entries.get(&(observer, target)).and_then(|entry| {
            let fresh = now_ms.saturating_sub(entry.computed_at_ms) <= ttl_ms;
            (fresh && entry.fingerprint == fingerprint).then_some(entry.granted)
        })
    }

    pub fn insert(
        &mut self,
        observer: TokenId,
        target: TokenId,
        fingerprint: u64,
        granted: bool,
        now_ms: u64,
    ) {
        self.entries.insert(
            (observer, target),
            LosCacheEntry {
                granted,
                fingerprint,
                computed_at_ms: now_ms,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn retain_tokens(&mut self, alive: impl Fn(TokenId) -> bool) {
        self.entries
            .retain(|(observer, target), _| alive(*observer) && alive(*target));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Fingerprint of everything a cached sight answer depends on.
pub fn los_fingerprint(
    observer_pos: Vec2,
    observer_elevation_ft: f32,
    target_pos: Vec2,
    target_elevation_ft: f32,
    wall_revision: u64,
) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_quantized(observer_pos.x);
    hasher.write_quantized(observer_pos.y);
    hasher.write_quantized(observer_elevation_ft);
    hasher.write_quantized(target_pos.x);
    hasher.write_quantized(target_pos.y);
    hasher.write_quantized(target_elevation_ft);
    hasher.write_u64(wall_revision);
    hasher.finish()
}
