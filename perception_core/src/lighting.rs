//! Illumination sampling.
//!
//! Darkness sources are authoritative: wherever one covers a point, emitted
//! light does not matter and the sample reports darkness at the strongest
//! covering rank. Outside darkness regions, placed lights grade the point
//! bright or dim by radius containment, and the scene's ambient darkness
//! slider fills in everywhere else.

use ahash::AHashMap;
use bevy::math::Vec2;
use bevy::prelude::Resource;
use std::hash::Hasher;

use perception_schema::{LightLevel, LightSample, HEIGHTENED_DARKNESS_RANK};

use crate::hashing::FnvHasher;
use crate::perception_config::LightingConfig;
use crate::resources::SceneContext;

/// Region boundary of a darkness source. Containment is tested against the
/// actual shape; a bounding-box approximation would both over- and
/// under-include points near curved or concave edges.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceShape {
    Circle { center: Vec2, radius_px: f32 },
    Polygon { points: Vec<Vec2> },
}

impl SourceShape {
    pub fn contains(&self, point: Vec2) -> bool {
        match self {
            SourceShape::Circle { center, radius_px } => {
                center.distance_squared(point) <= radius_px * radius_px
            }
            SourceShape::Polygon { points } => polygon_contains(points, point),
        }
    }
}

/// Even-odd ray cast. Points on an edge may land on either side; darkness
/// boundaries are not contested at sub-pixel precision.
fn polygon_contains(points: &[Vec2], point: Vec2) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[j];
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// One light emitter on the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSource {
    pub center: Vec2,
    pub bright_radius_px: f32,
    pub dim_radius_px: f32,
    pub active: bool,
}

impl LightSource {
    pub fn new(center: Vec2, bright_radius_px: f32, dim_radius_px: f32) -> Self {
        Self {
            center,
            bright_radius_px,
            dim_radius_px,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    fn covers(&self, point: Vec2, radius_px: f32) -> bool {
        self.center.distance_squared(point) <= radius_px * radius_px
    }
}

/// One darkness region on the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct DarknessSource {
    pub shape: SourceShape,
    pub rank: u8,
    /// Explicitly flagged magical, for sources below the heightened rank.
    pub magical: bool,
    pub active: bool,
}

impl DarknessSource {
    pub fn circle(center: Vec2, radius_px: f32, rank: u8) -> Self {
        Self {
            shape: SourceShape::Circle { center, radius_px },
            rank,
            magical: false,
            active: true,
        }
    }

    pub fn polygon(points: Vec<Vec2>, rank: u8) -> Self {
        Self {
            shape: SourceShape::Polygon { points },
            rank,
            magical: false,
            active: true,
        }
    }

    pub fn flagged_magical(mut self) -> Self {
        self.magical = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Scene light and darkness sources as pushed by the host.
#[derive(Resource, Debug, Default)]
pub struct LightRegistry {
    lights: Vec<LightSource>,
    darks: Vec<DarknessSource>,
}

impl LightRegistry {
    pub fn replace_lights(&mut self, lights: Vec<LightSource>) {
        tracing::debug!(
            target: "umbra::lighting",
            light_count = lights.len(),
            "lights.replaced"
        );
        self.lights = lights;
    }

    pub fn replace_darkness(&mut self, darks: Vec<DarknessSource>) {
        tracing::debug!(
            target: "umbra::lighting",
            darkness_count = darks.len(),
            "darkness.replaced"
        );
        self.darks = darks;
    }

    pub fn clear(&mut self) {
        self.lights.clear();
        self.darks.clear();
    }

    pub fn lights(&self) -> &[LightSource] {
        &self.lights
    }

    pub fn darkness(&self) -> &[DarknessSource] {
        &self.darks
    }

    pub fn len(&self) -> usize {
        self.lights.len() + self.darks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty() && self.darks.is_empty()
    }
}

/// Uncached illumination lookup for one point.
pub fn sample_light(
    point: Vec2,
    registry: &LightRegistry,
    scene: &SceneContext,
    config: &LightingConfig,
) -> LightSample {
    // Darkness regions first. The strongest covering rank wins; a magical
    // flag on any covering source carries into the sample.
    let mut strongest_rank: Option<u8> = None;
    let mut magical = false;
    for source in registry
        .darkness()
        .iter()
        .filter(|source| source.active && source.shape.contains(point))
    {
        strongest_rank = Some(strongest_rank.map_or(source.rank, |rank| rank.max(source.rank)));
        magical = magical || source.magical || source.rank >= HEIGHTENED_DARKNESS_RANK;
    }
    if let Some(rank) = strongest_rank {
        return LightSample {
            level: LightLevel::Darkness,
            magical_darkness: magical,
            darkness_rank: rank,
        };
    }

    let mut best: Option<LightLevel> = None;
    for source in registry.lights().iter().filter(|source| source.active) {
        if source.covers(point, source.bright_radius_px) {
            best = Some(LightLevel::Bright);
            break;
        }
        if source.covers(point, source.dim_radius_px) {
            best = Some(LightLevel::Dim);
        }
    }
    match best {
        Some(LightLevel::Bright) => LightSample::bright(),
        Some(LightLevel::Dim) => LightSample::dim(),
        _ => ambient_sample(scene, config),
    }
}

fn ambient_sample(scene: &SceneContext, config: &LightingConfig) -> LightSample {
    if scene.global_illumination {
        return LightSample::bright();
    }
    if scene.darkness_level >= config.dark_ambient_threshold {
        LightSample::darkness()
    } else if scene.darkness_level >= config.dim_ambient_threshold {
        LightSample::dim()
    } else {
        LightSample::bright()
    }
}

/// Fingerprint of everything that feeds illumination answers. When this
/// changes, every memoized sample is garbage.
pub fn environment_fingerprint(registry: &LightRegistry, scene: &SceneContext) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_quantized(scene.darkness_level);
    hasher.write_u8(u8::from(scene.global_illumination));
    hasher.write_usize(registry.lights().len());
    for source in registry.lights() {
        hasher.write_quantized(source.center.x);
        hasher.write_quantized(source.center.y);
        hasher.write_quantized(source.bright_radius_px);
        hasher.write_quantized(source.dim_radius_px);
        hasher.write_u8(u8::from(source.active));
    }
    hasher.write_usize(registry.darkness().len());
    for source in registry.darkness() {
        match &source.shape {
            SourceShape::Circle { center, radius_px } => {
                hasher.write_u8(0);
                hasher.write_quantized(center.x);
                hasher.write_quantized(center.y);
                hasher.write_quantized(*radius_px);
            }
            SourceShape::Polygon { points } => {
                hasher.write_u8(1);
                hasher.write_usize(points.len());
                for point in points {
                    hasher.write_quantized(point.x);
                    hasher.write_quantized(point.y);
                }
            }
        }
        hasher.write_u8(source.rank);
        hasher.write_u8(u8::from(source.magical));
        hasher.write_u8(u8::from(source.active));
    }
    hasher.finish()
}

/// Memo of per-position light samples, valid for one environment fingerprint
/// at a time.
#[derive(Debug, Default)]
pub struct LightingCache {
    samples: AHashMap<(i64, i64), LightSample>,
    fingerprint: u64,
    refreshed_at_ms: u64,
}

impl LightingCache {
    /// Prepares the memo for a batch. Samples survive from previous batches
    /// only while the environment fingerprint matches and the TTL holds.
    pub fn begin_batch(
        &mut self,
        registry: &LightRegistry,
        scene: &SceneContext,
        config: &LightingConfig,
        now_ms: u64,
    ) {
        let fingerprint = environment_fingerprint(registry, scene);
        let fresh = now_ms.saturating_sub(self.refreshed_at_ms) <= config.cache_ttl_ms;
        if fingerprint != self.fingerprint || !fresh {
            self.samples.clear();
            self.fingerprint = fingerprint;
        }
        self.refreshed_at_ms = now_ms;
    }

    /// Memoized sample lookup, snapping the position to the configured grid.
    pub fn sample(
        &mut self,
        point: Vec2,
        registry: &LightRegistry,
        scene: &SceneContext,
        config: &LightingConfig,
    ) -> LightSample {
        let key = quantize_point(point, config.position_quantize_px);
        if let Some(sample) = self.samples.get(&key) {
            return *sample;
        }
        let sample = sample_light(point, registry, scene, config);
        self.samples.insert(key, sample);
        sample
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.fingerprint = 0;
        self.refreshed_at_ms = 0;
    }

    pub fn memo_len(&self) -> usize {
        self.samples.len()
    }
}

fn quantize_point(point: Vec2, quantize_px: f32) -> (i64, i64) {
    let step = quantize_px.max(1.0);
    (
        (point.x / step).round() as i64,
        (point.y / step).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LightingConfig {
        LightingConfig::default()
    }

    fn dark_scene(darkness: f32) -> SceneContext {
        SceneContext {
            darkness_level: darkness,
            ..SceneContext::default()
        }
    }

    #[test]
    fn ambient_bands_follow_thresholds() {
        let registry = LightRegistry::default();
        let cfg = config();
        assert_eq!(
            sample_light(Vec2::ZERO, &registry, &dark_scene(0.0), &cfg).level,
            LightLevel::Bright
        );
        assert_eq!(
            sample_light(Vec2::ZERO, &registry, &dark_scene(0.3), &cfg).level,
            LightLevel::Dim
        );
        let dark = sample_light(Vec2::ZERO, &registry, &dark_scene(0.8), &cfg);
        assert_eq!(dark.level, LightLevel::Darkness);
        assert!(!dark.magical_darkness);
        assert_eq!(dark.darkness_rank, 0);
    }

    #[test]
    fn global_illumination_overrides_ambient_darkness() {
        let registry = LightRegistry::default();
        let scene = SceneContext {
            darkness_level: 1.0,
            global_illumination: true,
            ..SceneContext::default()
        };
        assert_eq!(
            sample_light(Vec2::ZERO, &registry, &scene, &config()).level,
            LightLevel::Bright
        );
    }

    #[test]
    fn emitted_light_grades_by_radius() {
        let mut registry = LightRegistry::default();
        registry.replace_lights(vec![LightSource::new(Vec2::ZERO, 100.0, 300.0)]);
        let scene = dark_scene(1.0);
        let cfg = config();

        assert_eq!(
            sample_light(Vec2::new(50.0, 0.0), &registry, &scene, &cfg).level,
            LightLevel::Bright
        );
        assert_eq!(
            sample_light(Vec2::new(200.0, 0.0), &registry, &scene, &cfg).level,
            LightLevel::Dim
        );
        assert_eq!(
            sample_light(Vec2::new(500.0, 0.0), &registry, &scene, &cfg).level,
            LightLevel::Darkness
        );
    }

    #[test]
    fn darkness_source_beats_emitted_light() {
        let mut registry = LightRegistry::default();
        registry.replace_lights(vec![LightSource::new(Vec2::ZERO, 500.0, 800.0)]);
        registry.replace_darkness(vec![DarknessSource::circle(Vec2::ZERO, 200.0, 2)]);
        let sample = sample_light(
            Vec2::new(100.0, 0.0),
            &registry,
            &SceneContext::default(),
            &config(),
        );
        assert_eq!(sample.level, LightLevel::Darkness);
        assert_eq!(sample.darkness_rank, 2);
        assert!(!sample.magical_darkness);

        // Outside the darkness region the light works again.
        let lit = sample_light(
            Vec2::new(400.0, 0.0),
            &registry,
            &SceneContext::default(),
            &config(),
        );
        assert_eq!(lit.level, LightLevel::Bright);
    }

    #[test]
    fn strongest_darkness_rank_wins_and_heightened_rank_is_magical() {
        let mut registry = LightRegistry::default();
        registry.replace_darkness(vec![
            DarknessSource::circle(Vec2::ZERO, 300.0, 2),
            DarknessSource::circle(Vec2::ZERO, 300.0, 5),
        ]);
        let sample = sample_light(Vec2::ZERO, &registry, &SceneContext::default(), &config());
        assert_eq!(sample.darkness_rank, 5);
        assert!(sample.magical_darkness);
    }

    #[test]
    fn low_rank_darkness_can_still_be_flagged_magical() {
        let mut registry = LightRegistry::default();
        registry
            .replace_darkness(vec![DarknessSource::circle(Vec2::ZERO, 300.0, 2).flagged_magical()]);
        let sample = sample_light(Vec2::ZERO, &registry, &SceneContext::default(), &config());
        assert!(sample.magical_darkness);
        assert_eq!(sample.darkness_rank, 2);
    }

    #[test]
    fn magical_flag_merges_across_overlapping_darkness() {
        let mut registry = LightRegistry::default();
        registry.replace_darkness(vec![
            DarknessSource::circle(Vec2::ZERO, 300.0, 3),
            DarknessSource::circle(Vec2::ZERO, 200.0, 2).flagged_magical(),
        ]);
        let sample = sample_light(Vec2::ZERO, &registry, &SceneContext::default(), &config());
        assert_eq!(sample.darkness_rank, 3);
        assert!(sample.magical_darkness);
    }

    #[test]
    fn polygon_darkness_uses_true_containment() {
        // L-shaped region. Its bounding box covers (250, 250) but the shape
        // itself does not.
        let points = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(300.0, 0.0),
            Vec2::new(300.0, 100.0),
            Vec2::new(100.0, 100.0),
            Vec2::new(100.0, 300.0),
            Vec2::new(0.0, 300.0),
        ];
        let mut registry = LightRegistry::default();
        registry.replace_darkness(vec![DarknessSource::polygon(points, 3)]);
        let scene = SceneContext::default();
        let cfg = config();

        assert_eq!(
            sample_light(Vec2::new(50.0, 50.0), &registry, &scene, &cfg).level,
            LightLevel::Darkness
        );
        assert_eq!(
            sample_light(Vec2::new(50.0, 250.0), &registry, &scene, &cfg).level,
            LightLevel::Darkness
        );
        assert_eq!(
            sample_light(Vec2::new(250.0, 250.0), &registry, &scene, &cfg).level,
            LightLevel::Bright
        );
    }

    #[test]
    fn degenerate_polygon_covers_nothing() {
        let mut registry = LightRegistry::default();
        registry.replace_darkness(vec![DarknessSource::polygon(
            vec![Vec2::ZERO, Vec2::new(100.0, 0.0)],
            3,
        )]);
        assert_eq!(
            sample_light(Vec2::new(50.0, 0.0), &registry, &SceneContext::default(), &config())
                .level,
            LightLevel::Bright
        );
    }

    #[test]
    fn inactive_sources_are_ignored() {
        let mut registry = LightRegistry::default();
        registry.replace_lights(vec![LightSource::new(Vec2::ZERO, 300.0, 600.0).inactive()]);
        registry.replace_darkness(vec![DarknessSource::circle(Vec2::ZERO, 300.0, 5).inactive()]);
        let sample = sample_light(Vec2::ZERO, &registry, &dark_scene(1.0), &config());
        assert_eq!(sample.level, LightLevel::Darkness);
        assert!(!sample.magical_darkness);
    }

    #[test]
    fn memo_coalesces_nearby_points() {
        let mut cache = LightingCache::default();
        let registry = LightRegistry::default();
        let scene = SceneContext::default();
        let cfg = config();

        cache.begin_batch(&registry, &scene, &cfg, 0);
        cache.sample(Vec2::new(0.0, 0.0), &registry, &scene, &cfg);
        cache.sample(Vec2::new(3.0, 2.0), &registry, &scene, &cfg);
        assert_eq!(cache.memo_len(), 1);
        cache.sample(Vec2::new(50.0, 0.0), &registry, &scene, &cfg);
        assert_eq!(cache.memo_len(), 2);
    }

    #[test]
    fn memo_survives_batches_while_environment_is_stable() {
        let mut cache = LightingCache::default();
        let registry = LightRegistry::default();
        let scene = SceneContext::default();
        let cfg = config();

        cache.begin_batch(&registry, &scene, &cfg, 0);
        cache.sample(Vec2::ZERO, &registry, &scene, &cfg);
        assert_eq!(cache.memo_len(), 1);

        cache.begin_batch(&registry, &scene, &cfg, 1_000);
        assert_eq!(cache.memo_len(), 1);

        // Ambient change rewrites the fingerprint and drops the memo.
        let darker = dark_scene(0.9);
        cache.begin_batch(&registry, &darker, &cfg, 1_100);
        assert_eq!(cache.memo_len(), 0);
    }

    #[test]
    fn memo_expires_after_ttl() {
        let mut cache = LightingCache::default();
        let registry = LightRegistry::default();
        let scene = SceneContext::default();
        let cfg = config();

        cache.begin_batch(&registry, &scene, &cfg, 0);
        cache.sample(Vec2::ZERO, &registry, &scene, &cfg);
        cache.begin_batch(&registry, &scene, &cfg, cfg.cache_ttl_ms + 1);
        assert_eq!(cache.memo_len(), 0);
    }

    #[test]
    fn fingerprint_tracks_source_movement() {
        let mut registry = LightRegistry::default();
        let scene = SceneContext::default();
        registry.replace_lights(vec![LightSource::new(Vec2::ZERO, 100.0, 200.0)]);
        let before = environment_fingerprint(&registry, &scene);
        registry.replace_lights(vec![LightSource::new(Vec2::new(10.0, 0.0), 100.0, 200.0)]);
        let after = environment_fingerprint(&registry, &scene);
        assert_ne!(before, after);
    }

    #[test]
    fn fingerprint_tracks_darkness_toggling() {
        let mut registry = LightRegistry::default();
        let scene = SceneContext::default();
        registry.replace_darkness(vec![DarknessSource::circle(Vec2::ZERO, 100.0, 3)]);
        let before = environment_fingerprint(&registry, &scene);
        registry.replace_darkness(vec![DarknessSource::circle(Vec2::ZERO, 100.0, 3).inactive()]);
        let after = environment_fingerprint(&registry, &scene);
        assert_ne!(before, after);
    }
}
