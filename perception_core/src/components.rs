use std::sync::Arc;

use bevy::prelude::*;
use perception_schema::TokenId;

use crate::actor_doc::ActorDoc;

/// Marker tying a runtime entity to its stable token identifier.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub id: TokenId,
}

impl Token {
    pub fn new(id: u64) -> Self {
        Self { id: TokenId(id) }
    }
}

/// Where a token sits on the scene and how much space it takes up.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct TokenPlacement {
    /// Center of the occupied rectangle, in scene pixels.
    pub center: Vec2,
    /// Bottom of the token's vertical span, in feet.
    pub elevation_ft: f32,
    /// Footprint width in grid squares.
    pub width: f32,
    /// Footprint height in grid squares.
    pub height: f32,
}

impl TokenPlacement {
    pub fn at(center: Vec2) -> Self {
        Self {
            center,
            elevation_ft: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    pub fn with_elevation(mut self, elevation_ft: f32) -> Self {
        self.elevation_ft = elevation_ft;
        self
    }

    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Half extents of the occupied rectangle, in scene pixels.
    pub fn half_extents_px(&self, grid_size_px: f32) -> Vec2 {
        Vec2::new(
            self.width * grid_size_px * 0.5,
            self.height * grid_size_px * 0.5,
        )
    }

    /// Vertical span as `(bottom_ft, top_ft)`. A creature is treated as tall
    /// as its larger footprint dimension.
    pub fn vertical_span_ft(&self, feet_per_square: f32) -> (f32, f32) {
        let height_ft = self.width.max(self.height).max(1.0) * feet_per_square;
        (self.elevation_ft, self.elevation_ft + height_ft)
    }
}

/// The raw actor document backing a token. Shared, since a host can point
/// several tokens at one actor.
#[derive(Component, Debug, Clone)]
pub struct ActorSheet(pub Arc<ActorDoc>);

impl ActorSheet {
    pub fn new(doc: ActorDoc) -> Self {
        Self(Arc::new(doc))
    }

    pub fn doc(&self) -> &ActorDoc {
        &self.0
    }
}

/// Host-side document flags that affect whether a token takes part in
/// visibility at all.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct TokenDocFlags {
    /// Hidden at the scene level by the operator. Excluded from batches.
    pub hidden: bool,
}
