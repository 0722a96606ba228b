use bevy::{
    math::{Rect, Vec2},
    prelude::*,
};
use bevy::utils::HashMap;

/// Scene-level geometry and environment the host pushes once per scene load.
#[derive(Resource, Debug, Clone)]
pub struct SceneContext {
    /// Playable area, in scene pixels.
    pub bounds: Rect,
    /// Edge length of one grid square, in pixels.
    pub grid_size_px: f32,
    /// Real-world distance one grid square represents.
    pub feet_per_square: f32,
    /// Scene-wide darkness slider, 0.0 (full day) to 1.0 (pitch black).
    pub darkness_level: f32,
    /// Scenes flagged as globally illuminated never fall below bright light.
    pub global_illumination: bool,
}

impl Default for SceneContext {
    fn default() -> Self {
        Self {
            bounds: Rect::new(0.0, 0.0, 4_000.0, 4_000.0),
            grid_size_px: 100.0,
            feet_per_square: 5.0,
            darkness_level: 0.0,
            global_illumination: false,
        }
    }
}

impl SceneContext {
    /// Converts a pixel distance to feet using the scene's grid scale.
    pub fn px_to_feet(&self, px: f32) -> f32 {
        if self.grid_size_px <= 0.0 {
            return 0.0;
        }
        px / self.grid_size_px * self.feet_per_square
    }

    pub fn feet_to_px(&self, feet: f32) -> f32 {
        if self.feet_per_square <= 0.0 {
            return 0.0;
        }
        feet / self.feet_per_square * self.grid_size_px
    }

    /// Euclidean distance between two scene points, in feet.
    pub fn distance_feet(&self, a: Vec2, b: Vec2) -> f32 {
        self.px_to_feet(a.distance(b))
    }
}

/// Milliseconds of scene time. Advanced explicitly by the host each frame, so
/// tests can drive coalescing deadlines without real sleeps.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct SceneClock {
    pub now_ms: u64,
}

impl SceneClock {
    pub fn advance(&mut self, dt_ms: u64) {
        self.now_ms = self.now_ms.saturating_add(dt_ms);
    }
}

/// Frame counter for the perception pipeline. Incremented once per update.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct PerceptionFrame(pub u64);

/// In-flight movement destinations, keyed by entity. While a token is
/// animating toward a destination the batch must evaluate it there, not at
/// the stale committed position.
#[derive(Resource, Debug, Clone, Default)]
pub struct PositionOverrides {
    positions: HashMap<Entity, Vec2>,
}

impl PositionOverrides {
    pub fn set(&mut self, entity: Entity, position: Vec2) {
        self.positions.insert(entity, position);
    }

    pub fn clear(&mut self, entity: Entity) {
        self.positions.remove(&entity);
    }

    pub fn get(&self, entity: Entity) -> Option<Vec2> {
        self.positions.get(&entity).copied()
    }

    pub fn resolve(&self, entity: Entity, committed: Vec2) -> Vec2 {
        self.get(entity).unwrap_or(committed)
    }

    pub fn clear_all(&mut self) {
        self.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// The rectangle of the scene the host currently shows. Batches restrict work
/// to tokens near it when set; `None` means compute everywhere.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct ViewportRect {
    pub rect: Option<Rect>,
}

impl ViewportRect {
    pub fn covering(rect: Rect) -> Self {
        Self { rect: Some(rect) }
    }

    pub fn unbounded() -> Self {
        Self { rect: None }
    }
}
