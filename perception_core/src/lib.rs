//! Automatic visibility resolution for grid-based tabletop scenes.
//!
//! Builds a headless Bevy [`App`] that folds host-reported activity (token
//! moves, document updates, wall and light edits) into a persisted
//! observer/target visibility matrix. Hosts send trigger events, advance the
//! scene clock through [`run_frame`], and read results from
//! [`VisibilityMapService`] or a [`RefreshHub`] subscription.

mod actor_doc;
mod components;
mod decision;
mod geometry;
mod hashing;
mod lighting;
pub mod metrics;
mod perception_config;
mod quadtree;
mod refresh;
mod resources;
mod scheduler;
mod senses;
mod visibility_map;

use bevy::prelude::*;

pub use actor_doc::ActorDoc;
pub use components::{ActorSheet, Token, TokenDocFlags, TokenPlacement};
pub use decision::{decide_visibility, PairContext};
pub use geometry::{
    line_of_sight, segment_intersection, sound_blocked, ElevationFilterCache, LosCache, WallIndex,
    WallSegment,
};
pub use lighting::{
    sample_light, DarknessSource, LightRegistry, LightSource, LightingCache, SourceShape,
};
pub use metrics::PerceptionMetrics;
pub use perception_config::{
    load_perception_config_from_env, PerceptionConfig, PerceptionConfigError,
    PerceptionConfigHandle, PerceptionConfigMetadata,
};
pub use quadtree::SpatialIndex;
pub use refresh::{PerceptionRefreshEvent, RefreshEnvelope, RefreshHub};
pub use resources::{PerceptionFrame, PositionOverrides, SceneClock, SceneContext, ViewportRect};
pub use scheduler::{
    BatchError, BatchScheduler, BatchStats, EffectsChangedEvent, FullRecomputeRequested,
    LightsChangedEvent, PerceptionCaches, SceneResetEvent, SchedulerPhase, TokenChangedEvent,
    TokenMovedEvent, TokenRemovedEvent, WallsChangedEvent,
};
pub use senses::{resolve_capabilities, resolve_cached, SenseCache, SensingCapabilities};
pub use visibility_map::VisibilityMapService;

/// Construct a Bevy [`App`] configured with the perception pipeline, loading
/// configuration from the environment.
pub fn build_perception_app() -> App {
    let (config, _metadata) = load_perception_config_from_env();
    build_perception_app_with(PerceptionConfigHandle::new(config))
}

/// Construct the pipeline around an explicit configuration handle. Every
/// collaborator is a plainly inserted resource; nothing is process-global,
/// so side-by-side apps in one process stay independent.
pub fn build_perception_app_with(config: PerceptionConfigHandle) -> App {
    let mut app = App::new();

    app.insert_resource(config)
        .insert_resource(SceneContext::default())
        .insert_resource(SceneClock::default())
        .insert_resource(PerceptionFrame::default())
        .insert_resource(PositionOverrides::default())
        .insert_resource(ViewportRect::default())
        .insert_resource(SpatialIndex::default())
        .insert_resource(PerceptionCaches::default())
        .insert_resource(BatchScheduler::default())
        .insert_resource(WallIndex::default())
        .insert_resource(LightRegistry::default())
        .insert_resource(VisibilityMapService::default())
        .insert_resource(RefreshHub::default())
        .add_plugins(MinimalPlugins)
        .add_event::<TokenMovedEvent>()
        .add_event::<TokenChangedEvent>()
        .add_event::<TokenRemovedEvent>()
        .add_event::<WallsChangedEvent>()
        .add_event::<LightsChangedEvent>()
        .add_event::<EffectsChangedEvent>()
        .add_event::<SceneResetEvent>()
        .add_event::<FullRecomputeRequested>()
        .add_event::<PerceptionRefreshEvent>()
        .add_systems(
            Update,
            (
                scheduler::ingest_scene_events,
                scheduler::ingest_token_events,
                scheduler::drive_scheduler,
                scheduler::advance_frame,
            )
                .chain(),
        );

    app
}

/// Advance the scene clock by `elapsed_ms` and run one pipeline frame.
///
/// Each call processes the chained systems configured in
/// [`build_perception_app`] (event ingestion → scheduler drive → frame
/// advance). Time exists only through this clock, so tests and hosts decide
/// how fast it moves.
pub fn run_frame(app: &mut App, elapsed_ms: u64) {
    app.world.resource_mut::<SceneClock>().advance(elapsed_ms);
    app.update();
}
